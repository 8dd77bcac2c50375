//! Single-slot action dispatcher.
//!
//! At most one action is in flight. `submit` either admits a request and
//! marks the slot taken, or rejects it immediately; there is no wait queue.
//! Completing an action frees the slot and stores its outcome in a single
//! "last outcome" slot that the next completion replaces.
//!
//! Every admission gets a ticket. Completions carrying a ticket that is no
//! longer in flight (because the action was expired by the watchdog) are
//! ignored.
//!
//! An expired action publishes its timeout at once but keeps the slot
//! closed while its handler drains. Admission reopens on `release`. Handlers
//! commit through `with_current`, so a drained handler changes nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{ActionKind, ActionOutcome, ActionRequest, ActionStatus};
use crate::sync;

/// Message recorded when the watchdog expires an action.
pub const TIMED_OUT: &str = "timed out";

/// Wire status of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitStatus {
    Queued,
    Busy,
    Error,
}

/// Why a submission was not admitted. Rejections never change state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// Another action is in flight or its outcome is still being held.
    #[error("{0}")]
    Busy(String),

    /// The request itself cannot run (bad payload, failed precondition).
    #[error("{0}")]
    Invalid(String),
}

impl SubmitError {
    pub fn status(&self) -> SubmitStatus {
        match self {
            SubmitError::Busy(_) => SubmitStatus::Busy,
            SubmitError::Invalid(_) => SubmitStatus::Error,
        }
    }
}

/// An admitted request, owned by whoever executes it.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub ticket: u64,
    pub request: ActionRequest,
}

#[derive(Debug, Clone)]
struct InFlight {
    ticket: u64,
    id: Uuid,
    kind: ActionKind,
    submitted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Slot {
    next_ticket: u64,
    in_flight: Option<InFlight>,
    /// Ticket of an expired action whose handler has not returned yet.
    draining: Option<u64>,
    last_outcome: Option<ActionOutcome>,
    outcome_at: Option<Instant>,
}

/// Read-consistent view of the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherSnapshot {
    pub action_in_progress: Option<ActionKind>,
    pub in_flight_id: Option<Uuid>,
    pub in_flight_since: Option<DateTime<Utc>>,
    pub last_outcome: Option<ActionOutcome>,
}

#[derive(Debug)]
pub struct Dispatcher {
    outcome_hold: Duration,
    slot: RwLock<Slot>,
}

impl Dispatcher {
    /// Create a dispatcher that holds each outcome for at least
    /// `outcome_hold` before admitting the next action.
    pub fn new(outcome_hold: Duration) -> Self {
        Self {
            outcome_hold,
            slot: RwLock::new(Slot::default()),
        }
    }

    /// Try to admit `request`.
    ///
    /// `precheck` runs with the slot locked, after the busy checks, so a
    /// precondition it reads cannot change before the slot is taken.
    pub fn submit<F>(&self, request: ActionRequest, precheck: F) -> Result<Admission, SubmitError>
    where
        F: FnOnce() -> Result<(), String>,
    {
        let mut slot = sync::write(&self.slot);

        if let Some(current) = &slot.in_flight {
            debug!(kind = %request.kind(), busy_with = %current.kind, "Rejected: action in progress");
            return Err(SubmitError::Busy(format!(
                "Another action is in progress ({})",
                current.kind
            )));
        }
        if let Some(ticket) = slot.draining {
            debug!(kind = %request.kind(), ticket, "Rejected: expired action still draining");
            return Err(SubmitError::Busy(
                "Previous action is still finishing, try again shortly".to_string(),
            ));
        }
        if let Some(at) = slot.outcome_at {
            if at.elapsed() < self.outcome_hold {
                debug!(kind = %request.kind(), "Rejected: previous outcome still held");
                return Err(SubmitError::Busy(
                    "Previous action just finished, try again shortly".to_string(),
                ));
            }
        }

        precheck().map_err(SubmitError::Invalid)?;

        slot.next_ticket += 1;
        let ticket = slot.next_ticket;
        slot.in_flight = Some(InFlight {
            ticket,
            id: request.id,
            kind: request.kind(),
            submitted_at: request.submitted_at,
        });
        info!(ticket, kind = %request.kind(), id = %request.id, "Action queued");

        Ok(Admission { ticket, request })
    }

    /// Record the result of an admitted action and free the slot. Returns
    /// `false` if `ticket` is no longer in flight.
    pub fn complete(&self, ticket: u64, status: ActionStatus, message: impl Into<String>) -> bool {
        let mut slot = sync::write(&self.slot);
        finish(&mut slot, ticket, status, message.into())
    }

    /// Give up on `ticket`: record a timeout error and free the slot.
    /// Nothing new is admitted until `release(ticket)`.
    pub fn expire(&self, ticket: u64) -> bool {
        let mut slot = sync::write(&self.slot);
        let expired = finish(&mut slot, ticket, ActionStatus::Error, TIMED_OUT.to_string());
        if expired {
            slot.draining = Some(ticket);
            warn!(ticket, "Action timed out");
        }
        expired
    }

    /// The handler of an expired `ticket` has returned (or been given up
    /// on). Reopens admission.
    pub fn release(&self, ticket: u64) -> bool {
        let mut slot = sync::write(&self.slot);
        if slot.draining != Some(ticket) {
            return false;
        }
        slot.draining = None;
        debug!(ticket, "Expired action drained");
        true
    }

    /// Whether `ticket` is still the action in flight.
    pub fn is_current(&self, ticket: u64) -> bool {
        is_current(&sync::read(&self.slot), ticket)
    }

    /// Run `commit` only while `ticket` is in flight. The slot stays locked
    /// for the duration, so an expiry lands either before (and `None` is
    /// returned) or after the commit, never during it.
    pub fn with_current<T, F>(&self, ticket: u64, commit: F) -> Option<T>
    where
        F: FnOnce() -> T,
    {
        let slot = sync::write(&self.slot);
        if !is_current(&slot, ticket) {
            debug!(ticket, "Skipping commit of an action no longer in flight");
            return None;
        }
        Some(commit())
    }

    pub fn is_busy(&self) -> bool {
        let slot = sync::read(&self.slot);
        slot.in_flight.is_some() || slot.draining.is_some()
    }

    /// Kind of the action currently in flight.
    pub fn in_flight(&self) -> Option<ActionKind> {
        sync::read(&self.slot).in_flight.as_ref().map(|f| f.kind)
    }

    pub fn snapshot(&self) -> DispatcherSnapshot {
        let slot = sync::read(&self.slot);
        DispatcherSnapshot {
            action_in_progress: slot.in_flight.as_ref().map(|f| f.kind),
            in_flight_id: slot.in_flight.as_ref().map(|f| f.id),
            in_flight_since: slot.in_flight.as_ref().map(|f| f.submitted_at),
            last_outcome: slot.last_outcome.clone(),
        }
    }
}

fn is_current(slot: &Slot, ticket: u64) -> bool {
    matches!(&slot.in_flight, Some(current) if current.ticket == ticket)
}

fn finish(slot: &mut Slot, ticket: u64, status: ActionStatus, message: String) -> bool {
    let in_flight = match &slot.in_flight {
        Some(current) if current.ticket == ticket => current.clone(),
        _ => {
            debug!(ticket, "Discarding result of an action no longer in flight");
            return false;
        }
    };

    let outcome = ActionOutcome {
        id: in_flight.id,
        kind: in_flight.kind,
        status,
        message,
        completed_at: Utc::now(),
    };
    info!(
        ticket,
        kind = %outcome.kind,
        status = ?outcome.status,
        message = %outcome.message,
        "Action completed"
    );

    slot.in_flight = None;
    slot.last_outcome = Some(outcome);
    slot.outcome_at = Some(Instant::now());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActionPayload;
    use pretty_assertions::assert_eq;

    fn scan() -> ActionRequest {
        ActionRequest::new(ActionPayload::StartWifiScan)
    }

    fn ok() -> Result<(), String> {
        Ok(())
    }

    #[test]
    fn test_second_submit_is_busy() {
        let dispatcher = Dispatcher::new(Duration::ZERO);
        let first = dispatcher.submit(scan(), ok).unwrap();

        let err = dispatcher
            .submit(ActionRequest::new(ActionPayload::CheckOtaUpdate), ok)
            .unwrap_err();
        assert_eq!(err.status(), SubmitStatus::Busy);
        assert_eq!(dispatcher.in_flight(), Some(ActionKind::StartWifiScan));

        assert!(dispatcher.complete(first.ticket, ActionStatus::Success, "done"));
        let outcome = dispatcher.snapshot().last_outcome.unwrap();
        assert_eq!(outcome.id, first.request.id);
        assert_eq!(outcome.kind, ActionKind::StartWifiScan);
        assert_eq!(outcome.message, "done");
    }

    #[test]
    fn test_precheck_failure_leaves_slot_free() {
        let dispatcher = Dispatcher::new(Duration::ZERO);
        let err = dispatcher
            .submit(scan(), || Err("not now".to_string()))
            .unwrap_err();

        assert_eq!(err, SubmitError::Invalid("not now".to_string()));
        assert!(!dispatcher.is_busy());
        assert_eq!(dispatcher.snapshot().last_outcome, None);
    }

    #[test]
    fn test_precheck_not_run_when_busy() {
        let dispatcher = Dispatcher::new(Duration::ZERO);
        dispatcher.submit(scan(), ok).unwrap();

        let mut ran = false;
        let _ = dispatcher.submit(scan(), || {
            ran = true;
            Ok(())
        });
        assert!(!ran);
    }

    #[test]
    fn test_outcome_hold() {
        let dispatcher = Dispatcher::new(Duration::from_secs(60));
        let admission = dispatcher.submit(scan(), ok).unwrap();
        dispatcher.complete(admission.ticket, ActionStatus::Success, "ok");

        let err = dispatcher.submit(scan(), ok).unwrap_err();
        assert!(matches!(err, SubmitError::Busy(_)));
        assert!(!dispatcher.is_busy());
    }

    #[test]
    fn test_expire_discards_late_completion() {
        let dispatcher = Dispatcher::new(Duration::ZERO);
        let admission = dispatcher.submit(scan(), ok).unwrap();

        assert!(dispatcher.expire(admission.ticket));
        assert!(!dispatcher.complete(admission.ticket, ActionStatus::Success, "late"));

        let outcome = dispatcher.snapshot().last_outcome.unwrap();
        assert_eq!(outcome.status, ActionStatus::Error);
        assert_eq!(outcome.message, TIMED_OUT);
    }

    #[test]
    fn test_expired_action_blocks_admission_until_released() {
        let dispatcher = Dispatcher::new(Duration::ZERO);
        let admission = dispatcher.submit(scan(), ok).unwrap();
        assert!(dispatcher.expire(admission.ticket));

        let snapshot = dispatcher.snapshot();
        assert_eq!(snapshot.action_in_progress, None);
        assert_eq!(snapshot.last_outcome.unwrap().message, TIMED_OUT);

        let err = dispatcher.submit(scan(), ok).unwrap_err();
        assert_eq!(err.status(), SubmitStatus::Busy);
        assert!(dispatcher.is_busy());

        assert!(!dispatcher.release(admission.ticket + 1));
        assert!(dispatcher.release(admission.ticket));
        assert!(!dispatcher.is_busy());
        assert!(dispatcher.submit(scan(), ok).is_ok());
    }

    #[test]
    fn test_commit_skipped_once_expired() {
        let dispatcher = Dispatcher::new(Duration::ZERO);
        let admission = dispatcher.submit(scan(), ok).unwrap();

        assert!(dispatcher.is_current(admission.ticket));
        assert_eq!(dispatcher.with_current(admission.ticket, || 7), Some(7));

        dispatcher.expire(admission.ticket);

        let mut committed = false;
        let result = dispatcher.with_current(admission.ticket, || committed = true);
        assert_eq!(result, None);
        assert!(!committed);
        assert!(!dispatcher.is_current(admission.ticket));
    }

    #[test]
    fn test_previous_outcome_visible_while_next_in_flight() {
        let dispatcher = Dispatcher::new(Duration::ZERO);
        let first = dispatcher.submit(scan(), ok).unwrap();
        dispatcher.complete(first.ticket, ActionStatus::Error, "radio off");

        dispatcher
            .submit(ActionRequest::new(ActionPayload::CheckOtaUpdate), ok)
            .unwrap();
        let snapshot = dispatcher.snapshot();

        assert_eq!(snapshot.action_in_progress, Some(ActionKind::CheckOtaUpdate));
        assert_eq!(snapshot.last_outcome.unwrap().message, "radio off");
    }
}
