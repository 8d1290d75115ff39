use presence_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("A presence session is already active on this device")]
    AlreadyActive,
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Timed out connecting to relay")]
    Timeout,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Session is closed")]
    SessionClosed,
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}
