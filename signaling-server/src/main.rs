use log::error;
use presence_signaling::{start, RelayConfig};

#[tokio::main]
async fn main() {
    // Healthcheck mode: exit 0 if server is running (port in use), exit 1 if not
    if std::env::args().any(|a| a == "--healthcheck") {
        use std::net::TcpListener;
        let port = RelayConfig::from_env().bind_addr.port();
        match TcpListener::bind(("127.0.0.1", port)) {
            Ok(_) => std::process::exit(1), // Port free = server NOT running
            Err(_) => std::process::exit(0), // Port in use = server IS running (healthy)
        }
    }

    env_logger::init();
    let config = RelayConfig::from_env();

    match start(config).await {
        Ok(relay) => relay.join().await,
        Err(e) => {
            error!("Failed to bind: {}", e);
            std::process::exit(1);
        }
    }
}
