//! Serve controller - which roots does this agent instance own
//!
//! Peers register heartbeats in the store. Eligible peers (admin up, fresh
//! heartbeat, highest registered version) partition the known roots with
//! rendezvous hashing so every root has two servers; single-agent mode
//! short-circuits to "all of them". An agent whose own heartbeat aged past
//! `max_down_time` reports a fatal condition and lets the supervisor restart
//! the process.

use chrono::{Duration as ChronoDuration, Utc};
use fabricsync_core::{AgentConfig, AgentRecord, Error, Result, Store};
use ring::digest;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How many agents serve each root in multi-agent mode.
const SERVERS_PER_ROOT: usize = 2;

pub struct ServeController {
    store: Arc<dyn Store>,
    config: AgentConfig,
    version: String,
}

impl ServeController {
    pub fn new(store: Arc<dyn Store>, config: AgentConfig) -> Self {
        Self {
            store,
            config,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_version(store: Arc<dyn Store>, config: AgentConfig, version: &str) -> Self {
        Self {
            store,
            config,
            version: version.to_string(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.config.agent_id
    }

    /// Refresh this agent's heartbeat row.
    pub async fn send_heartbeat(&self, served_roots: Vec<String>) -> Result<()> {
        let record = AgentRecord {
            id: self.config.agent_id.clone(),
            version: self.version.clone(),
            admin_state_up: true,
            heartbeat: Utc::now(),
            served_roots,
        };
        self.store.upsert_agent(record).await
    }

    /// Bump our heartbeat timestamp without touching the served-roots list.
    pub async fn refresh_heartbeat(&self) -> Result<()> {
        let served = self
            .store
            .get_agent(&self.config.agent_id)
            .await?
            .map(|row| row.served_roots)
            .unwrap_or_default();
        self.send_heartbeat(served).await
    }

    /// Compute the set of roots this agent must serve right now.
    pub async fn calculate(&self) -> Result<Vec<String>> {
        // First run: make sure our own row exists before eligibility math.
        if self.store.get_agent(&self.config.agent_id).await?.is_none() {
            self.send_heartbeat(Vec::new()).await?;
        }
        let agents = self.store.list_agents().await?;
        let me = agents
            .iter()
            .find(|a| a.id == self.config.agent_id)
            .ok_or_else(|| Error::store("own agent row missing"))?;

        let max_down = ChronoDuration::seconds(self.config.max_down_time_secs as i64);
        if Utc::now() - me.heartbeat > max_down {
            warn!(agent = %me.id, "own heartbeat is stale beyond max_down_time");
            return Err(Error::HeartbeatExpired(me.id.clone()));
        }

        let mut roots: BTreeSet<String> = self.store.intent_roots().await?;
        roots.extend(self.store.tree_roots().await?);

        if self.config.single_agent_mode {
            return Ok(roots.into_iter().collect());
        }

        let eligible = eligible_agents(&agents, self.config.agent_down_time_secs);
        if !eligible.iter().any(|a| a.id == self.config.agent_id) {
            info!(agent = %self.config.agent_id, "not eligible, serving nothing");
            return Ok(Vec::new());
        }
        if eligible.len() <= 1 {
            return Ok(roots.into_iter().collect());
        }

        let served: Vec<String> = roots
            .into_iter()
            .filter(|root| {
                owners_for(root, &eligible)
                    .iter()
                    .any(|id| *id == self.config.agent_id)
            })
            .collect();
        debug!(agent = %self.config.agent_id, count = served.len(), "serve set calculated");
        Ok(served)
    }
}

/// Peers that may serve: admin up, fresh heartbeat, highest version around.
fn eligible_agents(agents: &[AgentRecord], down_time_secs: u64) -> Vec<AgentRecord> {
    let down = ChronoDuration::seconds(down_time_secs as i64);
    let now = Utc::now();
    let alive: Vec<&AgentRecord> = agents
        .iter()
        .filter(|a| a.admin_state_up && now - a.heartbeat < down)
        .collect();
    let Some(max_version) = alive.iter().map(|a| a.version.as_str()).max() else {
        return Vec::new();
    };
    let max_version = max_version.to_string();
    alive
        .into_iter()
        .filter(|a| a.version == max_version)
        .cloned()
        .collect()
}

/// The agents owning one root: the top scorers of a rendezvous hash over
/// `(root, agent_id)`. Deterministic across every agent that sees the same
/// peer list.
fn owners_for<'a>(root: &str, eligible: &'a [AgentRecord]) -> Vec<&'a str> {
    let mut scored: Vec<(Vec<u8>, &str)> = eligible
        .iter()
        .map(|agent| {
            let material = format!("{root}/{id}", id = agent.id);
            let score = digest::digest(&digest::SHA256, material.as_bytes())
                .as_ref()
                .to_vec();
            (score, agent.id.as_str())
        })
        .collect();
    scored.sort();
    scored
        .iter()
        .rev()
        .take(SERVERS_PER_ROOT)
        .map(|(_, id)| *id)
        .collect()
}
