//! Agent configuration - serde structs for the agent's JSON config file
//!
//! Pure types and parsing only; wiring lives in fabricsync-agent.

use crate::error::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Minimum wall time between tenant-worker ticks, in seconds.
    pub tenant_polling_yield_secs: u64,
    /// Reconciler tick period, in seconds.
    pub polling_interval_secs: u64,
    /// Heartbeat period, in seconds.
    pub report_interval_secs: u64,
    /// Peers whose heartbeat is older than this are not eligible to serve.
    pub agent_down_time_secs: u64,
    /// If our own heartbeat ages past this, the process self-terminates.
    pub max_down_time_secs: u64,
    /// Retry budget per object before it is marked FAILED (the purge limit).
    pub max_operation_retry: u32,
    /// Seconds between retries of the same object; -1 disables the cooldown.
    pub retry_cooldown_secs: i64,
    /// Ownership-tag value written under `<dn>/tag-<system_id>`.
    pub system_id: String,
    /// This agent instance's identifier; defaults to a random UUID.
    pub agent_id: String,
    /// Fabric controller endpoints.
    pub fabric_hosts: Vec<String>,
    /// When true, a single agent serves every root (no partitioning).
    pub single_agent_mode: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            tenant_polling_yield_secs: 2,
            polling_interval_secs: 10,
            report_interval_secs: 30,
            agent_down_time_secs: 75,
            max_down_time_secs: 600,
            max_operation_retry: 10,
            retry_cooldown_secs: 5,
            system_id: "fabricsync".to_string(),
            agent_id: uuid::Uuid::new_v4().to_string(),
            fabric_hosts: Vec::new(),
            single_agent_mode: false,
        }
    }
}

impl AgentConfig {
    /// Parse a JSON config file; missing fields fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::internal(format!("config read: {e}")))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn tenant_polling_yield(&self) -> Duration {
        Duration::from_secs(self.tenant_polling_yield_secs)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    /// Retries after which an unresolved operation is marked FAILED.
    pub fn purge_retry_limit(&self) -> u32 {
        self.max_operation_retry
    }

    /// Retries after which a diverging pair gets a one-shot universe reset.
    pub fn reset_retry_limit(&self) -> u32 {
        (self.max_operation_retry / 2).max(1)
    }

    /// Cooldown between retries of one object; `None` when disabled (-1).
    pub fn retry_cooldown(&self) -> Option<Duration> {
        u64::try_from(self.retry_cooldown_secs)
            .ok()
            .map(Duration::from_secs)
    }
}
