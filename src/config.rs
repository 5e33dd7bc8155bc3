use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use wacore::signal::sender_key::SenderKeyLimits;

/// Tuning knobs of the relay engine. Every field has a default, so a
/// JSON file only needs the keys it changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub device_cache_ttl_secs: u64,
    pub device_cache_capacity: u64,
    pub recent_messages_enabled: bool,
    pub recent_messages_ttl_secs: u64,
    pub recent_messages_capacity: u64,
    pub session_fetch_batch_size: usize,
    pub use_cached_group_metadata: bool,
    pub group_metadata_ttl_secs: u64,
    pub max_sender_key_forward_jumps: u32,
    pub max_skipped_sender_keys: usize,
    pub query_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            device_cache_ttl_secs: 300,
            device_cache_capacity: 5_000,
            recent_messages_enabled: true,
            recent_messages_ttl_secs: 300,
            recent_messages_capacity: 1_000,
            session_fetch_batch_size: crate::session::SESSION_CHECK_BATCH_SIZE,
            use_cached_group_metadata: true,
            group_metadata_ttl_secs: 3_600,
            max_sender_key_forward_jumps: 2_000,
            max_skipped_sender_keys: 2_000,
            query_timeout_secs: 60,
        }
    }
}

impl RelayConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        Ok(Self::from_json(&raw)?)
    }

    pub fn device_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.device_cache_ttl_secs)
    }

    pub fn recent_messages_ttl(&self) -> Duration {
        Duration::from_secs(self.recent_messages_ttl_secs)
    }

    pub fn group_metadata_ttl(&self) -> Duration {
        Duration::from_secs(self.group_metadata_ttl_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn sender_key_limits(&self) -> SenderKeyLimits {
        SenderKeyLimits {
            max_forward_jumps: self.max_sender_key_forward_jumps,
            max_skipped_keys: self.max_skipped_sender_keys,
        }
    }
}
