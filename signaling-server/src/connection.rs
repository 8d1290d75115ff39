use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use hyper_tungstenite::tungstenite::Message;
use log::{debug, error, info, warn};
use presence_protocol::{
    encode_signal, peek_type, Envelope, Signal, TYPE_PING, TYPE_RELEASE_REQUEST,
    TYPE_RESERVE_REQUEST,
};
use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::state::{AppState, ConnId, ConnSender, Outbound};

pub const MAX_ADDRESS_LEN: usize = 64;

/// How an upgraded connection takes part in the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Join the two-party room keyed by this address
    Room(String),
    /// Registry traffic only, never joins a room
    Registry,
}

fn decode_query_value(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(s) => s.into_owned(),
        Err(_) => raw.to_string(),
    }
}

/// Read the admission parameters from the upgrade request's query string.
pub fn parse_admission(query: Option<&str>) -> Result<Admission, RelayError> {
    let mut address = None;
    let mut registry_mode = false;

    for pair in query.unwrap_or("").split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "address" => address = Some(decode_query_value(value)),
            "mode" => registry_mode = decode_query_value(value) == "registry",
            _ => {}
        }
    }

    if registry_mode {
        return Ok(Admission::Registry);
    }

    let address = address.map(|a| a.trim().to_string()).unwrap_or_default();
    validate_address(&address)?;
    Ok(Admission::Room(address))
}

pub fn validate_address(address: &str) -> Result<(), RelayError> {
    if address.is_empty() {
        return Err(RelayError::MissingAddress);
    }
    let well_formed = address.len() <= MAX_ADDRESS_LEN
        && address
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !well_formed {
        return Err(RelayError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

fn send_signal(sender: &ConnSender, signal: &Signal) {
    match encode_signal(signal) {
        Ok(json) => {
            let _ = sender.send(Outbound::Frame(Message::Text(json)));
        }
        Err(e) => warn!("Failed to encode {}: {}", signal.kind(), e),
    }
}

// ============================================
// WebSocket Connection Handler
// ============================================

pub async fn handle_connection(
    ws: hyper_tungstenite::WebSocketStream<hyper::upgrade::Upgraded>,
    admission: Result<Admission, RelayError>,
    addr: SocketAddr,
    app: Arc<AppState>,
) {
    let (mut ws_sender, mut ws_receiver) = ws.split();
    let conn_id: ConnId = uuid::Uuid::new_v4().to_string();
    info!("WebSocket connection {} established from {}", conn_id, addr);

    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    // Writer task: channel -> socket. Terminate drops the socket without a close handshake.
    let mut send_task = tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            match item {
                Outbound::Frame(msg) => {
                    if ws_sender.send(msg).await.is_err() {
                        break;
                    }
                }
                Outbound::Terminate => break,
            }
        }
    });

    let admitted = match admission {
        Ok(Admission::Room(address)) => {
            let joined = app
                .signaling
                .lock()
                .await
                .join(conn_id.clone(), &address, tx.clone());
            joined.map(|_| Admission::Room(address))
        }
        Ok(Admission::Registry) => {
            app.signaling.lock().await.attach(conn_id.clone(), tx.clone());
            Ok(Admission::Registry)
        }
        Err(e) => Err(e),
    };

    let admission = match admitted {
        Ok(admission) => admission,
        Err(e) => {
            warn!("Rejecting connection {} from {}: {}", conn_id, addr, e);
            send_signal(
                &tx,
                &Signal::Error {
                    message: e.wire_code().to_string(),
                },
            );
            let _ = tx.send(Outbound::Frame(Message::Close(None)));
            drop(tx);
            let _ = send_task.await;
            return;
        }
    };

    loop {
        tokio::select! {
            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = route_text(&app, &conn_id, &admission, &text, &tx).await {
                            warn!("Dropping frame from {}: {}", conn_id, e);
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        app.signaling.lock().await.mark_alive(&conn_id);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Outbound::Frame(Message::Pong(data)));
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Connection {} closed by client", conn_id);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error on {}: {}", conn_id, e);
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut send_task => {
                info!("Connection {} terminated", conn_id);
                break;
            }
        }
    }

    // Clean up when connection closes
    app.signaling.lock().await.detach(&conn_id);
    send_task.abort();
}

/// Route one inbound text frame. Pings are answered here, registry requests are
/// consumed, everything else goes verbatim to the room peer.
pub async fn route_text(
    app: &AppState,
    conn_id: &str,
    admission: &Admission,
    text: &str,
    reply: &ConnSender,
) -> Result<(), String> {
    let kind = peek_type(text).map_err(|e| format!("malformed envelope: {}", e))?;

    match kind.as_str() {
        TYPE_PING => {
            send_signal(reply, &Signal::Pong);
            Ok(())
        }
        TYPE_RESERVE_REQUEST | TYPE_RELEASE_REQUEST => {
            let envelope = Envelope::decode(text).map_err(|e| format!("bad {}: {}", kind, e))?;
            apply_registry_request(app, envelope.signal).await
        }
        _ => match admission {
            Admission::Registry => {
                debug!("Ignoring {} on registry connection {}", kind, conn_id);
                Ok(())
            }
            Admission::Room(_) => {
                let forwarded = app
                    .signaling
                    .lock()
                    .await
                    .forward(conn_id, text)
                    .map_err(|e| e.to_string())?;
                if !forwarded {
                    debug!("No peer to receive {} from {}", kind, conn_id);
                }
                Ok(())
            }
        },
    }
}

async fn apply_registry_request(app: &AppState, signal: Signal) -> Result<(), String> {
    match signal {
        Signal::ReserveRequest {
            address,
            nickname,
            hours,
        } => {
            validate_address(address.trim()).map_err(|e| e.to_string())?;
            let entry = app
                .registry
                .lock()
                .await
                .reserve(address.trim(), &nickname, hours)
                .map_err(|e| e.to_string())?;
            info!("Reserved {} for {}h", entry.address, hours);

            #[cfg(feature = "postgres")]
            {
                let db = app.backends.lock().await.db.clone();
                if let Some(pool) = db {
                    if let Err(e) = crate::state::backends::upsert_reservation_db(&pool, &entry).await {
                        warn!("Failed to persist reservation: {}", e);
                    }
                }
            }
            Ok(())
        }
        Signal::ReleaseRequest { address } => {
            let released = app.registry.lock().await.release(address.trim());
            info!("Released {} (existed: {})", address, released.is_some());

            #[cfg(feature = "postgres")]
            {
                let db = app.backends.lock().await.db.clone();
                if let Some(pool) = db {
                    if let Err(e) = crate::state::backends::delete_reservation_db(&pool, address.trim()).await {
                        warn!("Failed to delete reservation: {}", e);
                    }
                }
            }
            Ok(())
        }
        other => Err(format!("{} is not a registry request", other.kind())),
    }
}
