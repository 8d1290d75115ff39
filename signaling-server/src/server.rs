use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use log::{error, info};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::RelayConfig;
use crate::connection::{handle_connection, parse_admission};
use crate::maintenance::{spawn_prober, spawn_sweeper};
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct StatusResponse {
    connections: usize,
    rooms: usize,
    registry_size: usize,
    uptime_seconds: u64,
}

fn with_cors(builder: hyper::http::response::Builder) -> hyper::http::response::Builder {
    builder
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type")
}

// ============================================
// Main Request Handler
// ============================================

pub async fn handle_request(
    mut req: Request<Body>,
    app: Arc<AppState>,
    remote: SocketAddr,
) -> Result<Response<Body>, Infallible> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    if method == Method::OPTIONS {
        return Ok(with_cors(Response::builder())
            .status(StatusCode::NO_CONTENT)
            .header("Access-Control-Max-Age", "86400")
            .body(Body::empty())
            .unwrap());
    }

    // WebSocket upgrade (any path; the address rides in the query string)
    if hyper_tungstenite::is_upgrade_request(&req) {
        let admission = parse_admission(req.uri().query());
        return match hyper_tungstenite::upgrade(&mut req, None) {
            Ok((response, websocket)) => {
                tokio::spawn(async move {
                    match websocket.await {
                        Ok(ws) => handle_connection(ws, admission, remote, app).await,
                        Err(e) => error!("WebSocket handshake with {} failed: {}", remote, e),
                    }
                });
                Ok(response)
            }
            Err(e) => {
                error!("WebSocket upgrade error: {}", e);
                Ok(Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .body(Body::from("Invalid WebSocket upgrade request"))
                    .unwrap())
            }
        };
    }

    match (method, path.as_str()) {
        (Method::GET, "/health") => Ok(with_cors(Response::builder())
            .status(StatusCode::OK)
            .body(Body::from("ok"))
            .unwrap()),
        (Method::GET, "/status") => {
            let (connections, rooms) = {
                let sig = app.signaling.lock().await;
                (sig.connection_count(), sig.room_count())
            };
            let registry_size = app.registry.lock().await.len();
            let status = StatusResponse {
                connections,
                rooms,
                registry_size,
                uptime_seconds: app.started_at.elapsed().as_secs(),
            };
            let json = serde_json::to_string(&status).unwrap_or_else(|_| "{}".to_string());
            Ok(with_cors(Response::builder())
                .status(StatusCode::OK)
                .header("Content-Type", "application/json")
                .body(Body::from(json))
                .unwrap())
        }
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from(
                "Not found. Use /health, /status, or upgrade to WebSocket with ?address=<address>.",
            ))
            .unwrap()),
    }
}

// ============================================
// Startup
// ============================================

/// A running relay: HTTP/WebSocket listener plus its background tasks.
pub struct RelayHandle {
    pub local_addr: SocketAddr,
    pub app: Arc<AppState>,
    server: JoinHandle<()>,
    prober: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl RelayHandle {
    /// Wait until the listener stops.
    pub async fn join(self) {
        let _ = self.server.await;
        self.prober.abort();
        self.sweeper.abort();
    }

    pub fn shutdown(&self) {
        self.server.abort();
        self.prober.abort();
        self.sweeper.abort();
    }
}

/// Bind the listener and start the prober and sweeper.
pub async fn start(config: RelayConfig) -> Result<RelayHandle, hyper::Error> {
    let app = Arc::new(AppState::new(&config));

    #[cfg(feature = "postgres")]
    attach_database(&app, &config).await;

    let svc_app = app.clone();
    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let app = svc_app.clone();
        let remote = conn.remote_addr();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle_request(req, app.clone(), remote)))
        }
    });

    let server = Server::try_bind(&config.bind_addr)?.serve(make_svc);
    let local_addr = server.local_addr();

    let server = tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Server error: {}", e);
        }
    });
    let prober = spawn_prober(app.signaling.clone(), config.probe_interval);
    let sweeper = spawn_sweeper(app.clone(), config.sweep_interval);

    info!("Signaling relay listening on http://{}", local_addr);
    info!("WebSocket endpoint: ws://{}/?address=<address>", local_addr);
    info!(
        "Liveness probe every {:?}, registry sweep every {:?}, peer loss policy {:?}",
        config.probe_interval, config.sweep_interval, config.peer_loss
    );

    Ok(RelayHandle {
        local_addr,
        app,
        server,
        prober,
        sweeper,
    })
}

// Optional Postgres durability for the registry
#[cfg(feature = "postgres")]
async fn attach_database(app: &Arc<AppState>, config: &RelayConfig) {
    use crate::state::backends::{connect_db, load_reservations_db};
    use log::warn;

    let Some(db_url) = config.db_url.as_deref() else {
        info!("Postgres disabled (SIGNALING_DB_URL not set).");
        return;
    };

    match connect_db(db_url).await {
        Ok(pool) => {
            match load_reservations_db(&pool).await {
                Ok(entries) => {
                    let mut registry = app.registry.lock().await;
                    let count = entries.len();
                    for entry in entries {
                        registry.restore(entry);
                    }
                    info!("Loaded {} reservations from Postgres", count);
                }
                Err(e) => warn!("Failed to load reservations: {}", e),
            }
            app.backends.lock().await.db = Some(pool);
            info!("Postgres enabled (SIGNALING_DB_URL set).");
        }
        Err(e) => warn!("Failed to connect to Postgres; continuing without DB: {}", e),
    }
}
