use presence_protocol::{
    ERR_INVALID_ADDRESS, ERR_INVALID_TTL, ERR_MISSING_ADDRESS, ERR_ROOM_FULL,
    ERR_UNKNOWN_CONNECTION,
};
use thiserror::Error;

/// Admission and routing errors raised by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("Room {0} already holds two members")]
    RoomFull(String),
    #[error("Connection did not carry an address")]
    MissingAddress,
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Unknown connection {0}")]
    UnknownConnection(String),
    #[error("Reservation ttl of {0}h is out of range")]
    InvalidTtl(u32),
}

impl RelayError {
    /// Code sent to the client in the `error` envelope before close.
    pub fn wire_code(&self) -> &'static str {
        match self {
            RelayError::RoomFull(_) => ERR_ROOM_FULL,
            RelayError::MissingAddress => ERR_MISSING_ADDRESS,
            RelayError::InvalidAddress(_) => ERR_INVALID_ADDRESS,
            RelayError::UnknownConnection(_) => ERR_UNKNOWN_CONNECTION,
            RelayError::InvalidTtl(_) => ERR_INVALID_TTL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_error_has_its_own_wire_code() {
        assert_eq!(RelayError::RoomFull("R".into()).wire_code(), "room_full");
        assert_eq!(RelayError::MissingAddress.wire_code(), "missing_address");
        assert_eq!(RelayError::InvalidAddress("x".into()).wire_code(), "invalid_address");
        assert_eq!(
            RelayError::UnknownConnection("c".into()).wire_code(),
            "unknown_connection"
        );
        assert_eq!(RelayError::InvalidTtl(7).wire_code(), "invalid_ttl");
    }
}
