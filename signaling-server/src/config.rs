use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

pub const DEFAULT_PORT: u16 = 9001;
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 20;
pub const MIN_PROBE_INTERVAL_SECS: u64 = 10;
pub const MAX_PROBE_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_GRACE_SECS: u64 = 10;

/// What the surviving room member is told when its peer goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerLossPolicy {
    /// Soft notice: `peer_obstructed` with the grace period, peer may come back.
    #[default]
    Obstruct,
    /// Hard notice: `collapse` with reason `peer_left`.
    Collapse,
}

impl FromStr for PeerLossPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "obstruct" | "soft" => Ok(PeerLossPolicy::Obstruct),
            "collapse" | "hard" => Ok(PeerLossPolicy::Collapse),
            other => Err(format!("unknown peer loss policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    /// Transport-level liveness probe period
    pub probe_interval: Duration,
    /// Registry expiry sweep period
    pub sweep_interval: Duration,
    pub peer_loss: PeerLossPolicy,
    /// Seconds advertised to a survivor under `PeerLossPolicy::Obstruct`
    pub grace_seconds: u64,
    /// Postgres URL for durable reservations (only used with the `postgres` feature)
    pub db_url: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            probe_interval: Duration::from_secs(DEFAULT_PROBE_INTERVAL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            peer_loss: PeerLossPolicy::default(),
            grace_seconds: DEFAULT_GRACE_SECS,
            db_url: None,
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Bad values are logged and replaced by defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("SIGNALING_BIND_ADDR") {
            match raw.parse() {
                Ok(addr) => config.bind_addr = addr,
                Err(e) => warn!("Ignoring SIGNALING_BIND_ADDR={}: {}", raw, e),
            }
        }

        // Hosting platforms hand out the port separately.
        if let Some(raw) = lookup("PORT") {
            match raw.parse::<u16>() {
                Ok(port) => config.bind_addr.set_port(port),
                Err(e) => warn!("Ignoring PORT={}: {}", raw, e),
            }
        }

        if let Some(secs) = parse_secs(&lookup, "SIGNALING_PROBE_INTERVAL_SECS") {
            let clamped = secs.clamp(MIN_PROBE_INTERVAL_SECS, MAX_PROBE_INTERVAL_SECS);
            if clamped != secs {
                warn!(
                    "SIGNALING_PROBE_INTERVAL_SECS={} out of range, using {}",
                    secs, clamped
                );
            }
            config.probe_interval = Duration::from_secs(clamped);
        }

        if let Some(secs) = parse_secs(&lookup, "SIGNALING_SWEEP_INTERVAL_SECS") {
            config.sweep_interval = Duration::from_secs(secs.max(1));
        }

        if let Some(secs) = parse_secs(&lookup, "SIGNALING_GRACE_SECS") {
            config.grace_seconds = secs;
        }

        if let Some(raw) = lookup("SIGNALING_PEER_LOSS") {
            match raw.parse() {
                Ok(policy) => config.peer_loss = policy,
                Err(e) => warn!("Ignoring SIGNALING_PEER_LOSS: {}", e),
            }
        }

        config.db_url = lookup("SIGNALING_DB_URL").filter(|url| !url.trim().is_empty());
        config
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(secs) => Some(secs),
        Err(e) => {
            warn!("Ignoring {}={}: {}", key, raw, e);
            None
        }
    }
}
