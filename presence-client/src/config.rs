use std::time::Duration;

pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:9001/";

/// Tunables for a presence session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the signaling relay (ws:// or wss://)
    pub relay_url: String,
    /// Application-level ping cadence while connected
    pub heartbeat_interval: Duration,
    /// Upper bound for the reconnect backoff
    pub max_reconnect_delay: Duration,
    /// Obstruction window length before the session collapses
    pub grace_period: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            heartbeat_interval: Duration::from_secs(8),
            max_reconnect_delay: Duration::from_secs(20),
            grace_period: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            ..Self::default()
        }
    }

    /// URL for joining the room keyed by `address`.
    pub fn session_url(&self, address: &str) -> String {
        format!(
            "{}{}address={}",
            self.relay_url,
            query_separator(&self.relay_url),
            urlencoding::encode(address)
        )
    }

    /// URL for registry-only traffic (reserve/release), never joins a room.
    pub fn registry_url(&self) -> String {
        format!("{}{}mode=registry", self.relay_url, query_separator(&self.relay_url))
    }
}

fn query_separator(url: &str) -> char {
    if url.contains('?') {
        '&'
    } else {
        '?'
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_session_cadence() {
        let config = ClientConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(8));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(20));
        assert_eq!(config.grace_period, Duration::from_secs(10));
    }

    #[test]
    fn session_url_carries_encoded_address() {
        let config = ClientConfig::new("wss://relay.example/ws");
        assert_eq!(config.session_url("ABC123"), "wss://relay.example/ws?address=ABC123");
        assert_eq!(config.session_url("a b"), "wss://relay.example/ws?address=a%20b");
    }

    #[test]
    fn registry_url_appends_to_existing_query() {
        let config = ClientConfig::new("ws://host/?token=x");
        assert_eq!(config.registry_url(), "ws://host/?token=x&mode=registry");
    }
}
