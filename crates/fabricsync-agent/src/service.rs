//! Agent service - wires the reconciler and heartbeat tasks together
//!
//! `run` drives the whole agent until cancelled and returns the process
//! exit code; `perform_harakiri` is the only place that actually exits, so
//! every other component stays testable.

use crate::reconcile::Reconciler;
use crate::serve::ServeController;
use fabricsync_core::{AgentConfig, Store};
use fabricsync_fabric::FabricClient;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct AgentService {
    config: AgentConfig,
    store: Arc<dyn Store>,
    client: Arc<dyn FabricClient>,
}

impl AgentService {
    pub fn new(config: AgentConfig, store: Arc<dyn Store>, client: Arc<dyn FabricClient>) -> Self {
        Self {
            config,
            store,
            client,
        }
    }

    /// Run the agent until `cancel` fires. Returns the exit code: 0 on a
    /// clean shutdown, non-zero when a fatal condition demands a restart.
    pub async fn run(self, cancel: CancellationToken) -> i32 {
        info!(agent = %self.config.agent_id, "agent service starting");

        let heartbeat = {
            let serve = ServeController::new(self.store.clone(), self.config.clone());
            let interval = self.config.report_interval();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {
                            if let Err(e) = serve.refresh_heartbeat().await {
                                warn!(error = %e, "heartbeat write failed");
                            }
                        }
                    }
                }
            })
        };

        let reconciler = Reconciler::new(self.config, self.store, self.client);
        let code = reconciler.run(cancel.child_token()).await;

        cancel.cancel();
        let _ = heartbeat.await;

        match code {
            Some(code) => {
                error!(code, "agent service exiting on fatal condition");
                code
            }
            None => {
                info!("agent service stopped");
                0
            }
        }
    }

    /// Run until a fatal condition, then terminate the process so the
    /// supervisor restarts it.
    pub async fn run_to_exit(self) -> ! {
        let code = self.run(CancellationToken::new()).await;
        perform_harakiri("agent service finished", code)
    }
}

/// Log and exit. The sole process-exit point in the agent.
pub fn perform_harakiri(reason: &str, code: i32) -> ! {
    error!(code, reason, "terminating for supervisor restart");
    std::process::exit(code)
}
