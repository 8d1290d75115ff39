use std::time::Duration;

/// Delay before reconnect attempt number `retry`: `min(2^retry s, max)`.
pub fn reconnect_delay(retry: u32, max: Duration) -> Duration {
    let secs = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(max)
}
