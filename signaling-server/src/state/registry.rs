use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Reserved address binding. Advisory only; rooms never consult it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub address: String,
    pub nickname: String,
    pub expires_at: DateTime<Utc>,
}

/// Address registry state (address -> nickname/expiry)
pub struct RegistryState {
    entries: HashMap<String, RegistryEntry>,
}

impl RegistryState {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Upsert a reservation expiring `ttl_hours` from now. Last writer wins.
    pub fn reserve(
        &mut self,
        address: &str,
        nickname: &str,
        ttl_hours: u32,
    ) -> Result<RegistryEntry, RelayError> {
        self.reserve_at(address, nickname, ttl_hours, Utc::now())
    }

    /// Fails without touching the registry when the expiry falls outside the
    /// representable date range.
    pub fn reserve_at(
        &mut self,
        address: &str,
        nickname: &str,
        ttl_hours: u32,
        now: DateTime<Utc>,
    ) -> Result<RegistryEntry, RelayError> {
        let expires_at = now
            .checked_add_signed(Duration::hours(i64::from(ttl_hours)))
            .ok_or(RelayError::InvalidTtl(ttl_hours))?;
        let entry = RegistryEntry {
            address: address.to_string(),
            nickname: nickname.to_string(),
            expires_at,
        };
        self.entries.insert(entry.address.clone(), entry.clone());
        Ok(entry)
    }

    /// Reinsert an entry loaded from durable storage.
    pub fn restore(&mut self, entry: RegistryEntry) {
        self.entries.insert(entry.address.clone(), entry);
    }

    pub fn release(&mut self, address: &str) -> Option<RegistryEntry> {
        self.entries.remove(address)
    }

    /// Drop expired entries; returns how many went away.
    pub fn sweep(&mut self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before - self.entries.len()
    }

    pub fn get(&self, address: &str) -> Option<&RegistryEntry> {
        self.entries.get(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RegistryState {
    fn default() -> Self {
        Self::new()
    }
}
