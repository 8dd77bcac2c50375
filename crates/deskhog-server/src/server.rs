//! Background action worker.
//!
//! `PortalServer` owns the work queue. [`PortalHandle`]s are cheap clones
//! used by the HTTP layer to submit actions and read status; `run` drains
//! the queue one action at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use deskhog_core::{
    ActionError, ActionKind, ActionOutcome, ActionPayload, Admission, Completion, ConfigError,
    Portal, Services, StatusSnapshot, SubmitError,
};

use crate::config::ServerConfig;

/// Poll period used while waiting for an outcome.
const OUTCOME_POLL: Duration = Duration::from_millis(25);

/// Accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub action_id: Uuid,
    pub kind: ActionKind,
}

/// Submit/poll access to a running server.
#[derive(Clone)]
pub struct PortalHandle {
    portal: Arc<Portal>,
    work_tx: mpsc::Sender<Admission>,
}

impl PortalHandle {
    /// Try to admit an action. Never waits for it to run.
    pub fn submit(&self, payload: ActionPayload) -> Result<SubmitReceipt, SubmitError> {
        let admission = self.portal.submit(payload)?;
        let receipt = SubmitReceipt {
            action_id: admission.request.id,
            kind: admission.request.kind(),
        };

        if let Err(e) = self.work_tx.try_send(admission) {
            let ticket = match &e {
                mpsc::error::TrySendError::Full(a) | mpsc::error::TrySendError::Closed(a) => {
                    a.ticket
                }
            };
            error!(ticket, "Action worker unavailable");
            let failed = Err(ActionError::Rejected("Action worker unavailable".to_string()));
            self.portal.complete(ticket, &failed);
            return Err(SubmitError::Busy("Action worker unavailable".to_string()));
        }
        Ok(receipt)
    }

    pub fn status(&self) -> StatusSnapshot {
        self.portal.status()
    }

    pub fn portal(&self) -> &Arc<Portal> {
        &self.portal
    }

    /// Wait until the outcome of `action_id` is recorded, up to `timeout`.
    pub async fn wait_for_outcome(&self, action_id: Uuid, timeout: Duration) -> Option<ActionOutcome> {
        let wait = async {
            loop {
                if let Some(outcome) = self.portal.dispatcher().snapshot().last_outcome {
                    if outcome.id == action_id {
                        return outcome;
                    }
                }
                tokio::time::sleep(OUTCOME_POLL).await;
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }
}

/// The portal server: the coordinator plus its action worker.
pub struct PortalServer {
    config: ServerConfig,
    portal: Arc<Portal>,
    work_tx: mpsc::Sender<Admission>,
    work_rx: mpsc::Receiver<Admission>,
}

impl PortalServer {
    /// Create a server, loading committed configuration through `services`.
    pub fn new(config: ServerConfig, services: Services) -> Result<Self, ConfigError> {
        let portal = Portal::new(config.portal_settings(), services)?;
        let (work_tx, work_rx) = mpsc::channel(4);

        Ok(Self {
            config,
            portal: Arc::new(portal),
            work_tx,
            work_rx,
        })
    }

    pub fn handle(&self) -> PortalHandle {
        PortalHandle {
            portal: self.portal.clone(),
            work_tx: self.work_tx.clone(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run the worker until every handle is dropped.
    pub async fn run(self) {
        let Self {
            config,
            portal,
            work_tx,
            mut work_rx,
        } = self;
        drop(work_tx);

        let boot = portal.clone();
        tokio::task::spawn_blocking(move || match boot.connect_saved() {
            Ok(true) => info!("Joined saved network"),
            Ok(false) => debug!("No saved network"),
            Err(e) => warn!("Could not join saved network: {}", e),
        });

        info!("Action worker started");
        while let Some(admission) = work_rx.recv().await {
            process(&config, &portal, admission).await;
        }
        info!("Action worker stopped");
    }
}

async fn process(config: &ServerConfig, portal: &Arc<Portal>, admission: Admission) {
    let ticket = admission.ticket;
    let kind = admission.request.kind();
    let deadline = config.watchdog_for(kind);
    debug!(ticket, %kind, ?deadline, "Running action");

    let worker = portal.clone();
    let mut task: JoinHandle<Result<Completion, ActionError>> =
        tokio::task::spawn_blocking(move || worker.execute(&admission));

    let joined = match tokio::time::timeout(deadline, &mut task).await {
        Ok(joined) => joined,
        Err(_) => {
            if portal.expire(ticket) {
                drain(portal, ticket, task).await;
                return;
            }
            info!(ticket, "Deadline passed while writing flash, waiting for the write");
            task.await
        }
    };

    let result = joined.unwrap_or_else(|e| {
        error!(ticket, %kind, "Action handler failed: {}", e);
        Err(ActionError::Internal)
    });

    if !portal.complete(ticket, &result) {
        return;
    }

    if let Ok(Completion {
        restart_required: true,
        ..
    }) = result
    {
        let delay = config.reboot_delay();
        info!(?delay, "Firmware committed, restarting");
        tokio::time::sleep(delay).await;
        portal.restart();
    }
}

/// Keep admission closed until the handler of an expired action returns.
/// Its result is discarded.
async fn drain(portal: &Portal, ticket: u64, task: JoinHandle<Result<Completion, ActionError>>) {
    match task.await {
        Ok(result) => debug!(ticket, ok = result.is_ok(), "Expired handler returned"),
        Err(e) => error!(ticket, "Expired handler failed: {}", e),
    }
    portal.release(ticket);
}
