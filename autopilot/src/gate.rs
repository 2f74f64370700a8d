//! Synchronization primitives shared by the loop thread and the controller.
//!
//! - [`ConfirmationGate`]: single-slot rendezvous for human approve/deny.
//! - [`StopSignal`]: cooperative stop flag with interruptible sleeps.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::core::types::Decision;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("no confirmation is pending")]
    NoPendingRequest,
}

/// Outcome of a confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub decision: Decision,
    /// The gate was force-released (run stopping); the denial is implied.
    pub forced: bool,
}

#[derive(Debug, Default)]
struct Slot {
    pending: Option<Pending>,
    released: bool,
    /// Id handed to the most recent request; ids start at 1.
    last_id: u64,
}

#[derive(Debug)]
struct Pending {
    id: u64,
    prompt: String,
    decision: Option<Decision>,
}

/// At most one outstanding request. The loop thread blocks in [`request`]
/// until exactly one [`resolve`] arrives or the gate is force-released.
///
/// [`request`]: ConfirmationGate::request
/// [`resolve`]: ConfirmationGate::resolve
#[derive(Debug, Default)]
pub struct ConfirmationGate {
    slot: Mutex<Slot>,
    changed: Condvar,
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until a decision arrives. Must only be called by the loop thread.
    ///
    /// Once the gate has been force-released every request returns an implied
    /// denial immediately.
    pub fn request(&self, prompt: &str) -> Resolution {
        self.request_with(prompt, |_| {})
    }

    /// Like [`request`](Self::request), but runs `on_pending` with the
    /// request's id once it is installed and before blocking, so anything it
    /// publishes is only visible while [`resolve`](Self::resolve) can succeed.
    /// Not run when the gate was already released.
    pub fn request_with(&self, prompt: &str, on_pending: impl FnOnce(u64)) -> Resolution {
        let mut slot = lock(&self.slot);
        if slot.released {
            return Resolution {
                decision: Decision::Deny,
                forced: true,
            };
        }
        slot.last_id += 1;
        let id = slot.last_id;
        slot.pending = Some(Pending {
            id,
            prompt: prompt.to_string(),
            decision: None,
        });
        on_pending(id);
        debug!("waiting for confirmation");
        loop {
            if slot.released {
                slot.pending = None;
                return Resolution {
                    decision: Decision::Deny,
                    forced: true,
                };
            }
            if let Some(decision) = slot.pending.as_ref().and_then(|p| p.decision) {
                slot.pending = None;
                return Resolution {
                    decision,
                    forced: false,
                };
            }
            slot = self
                .changed
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Answer the outstanding request. Rejected when nothing is pending or the
    /// pending request already has its decision.
    pub fn resolve(&self, decision: Decision) -> Result<(), GateError> {
        self.resolve_matching(None, decision)
    }

    /// Answer request `id` only. A later request that replaced it counts as
    /// nothing pending, so an answer meant for one prompt never lands on the
    /// next.
    pub fn resolve_request(&self, id: u64, decision: Decision) -> Result<(), GateError> {
        self.resolve_matching(Some(id), decision)
    }

    fn resolve_matching(&self, id: Option<u64>, decision: Decision) -> Result<(), GateError> {
        let mut slot = lock(&self.slot);
        if slot.released {
            return Err(GateError::NoPendingRequest);
        }
        match slot.pending.as_mut() {
            Some(pending)
                if pending.decision.is_none() && id.is_none_or(|id| id == pending.id) =>
            {
                pending.decision = Some(decision);
                self.changed.notify_all();
                debug!(?decision, "confirmation resolved");
                Ok(())
            }
            _ => Err(GateError::NoPendingRequest),
        }
    }

    /// Release any waiter with an implied denial and refuse future requests.
    pub fn force_release(&self) {
        let mut slot = lock(&self.slot);
        slot.released = true;
        self.changed.notify_all();
    }

    pub fn pending_prompt(&self) -> Option<String> {
        let slot = lock(&self.slot);
        slot.pending
            .as_ref()
            .filter(|p| p.decision.is_none())
            .map(|p| p.prompt.clone())
    }
}

/// Cooperative stop flag checked by the loop at its suspension points.
#[derive(Debug, Default)]
pub struct StopSignal {
    requested: Mutex<bool>,
    changed: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        let mut requested = lock(&self.requested);
        *requested = true;
        self.changed.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        *lock(&self.requested)
    }

    /// Sleep for `duration` unless a stop arrives first. Returns `true` when a
    /// stop was requested (before or during the sleep).
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut requested = lock(&self.requested);
        while !*requested {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            if remaining.is_zero() {
                break;
            }
            let (guard, _) = self
                .changed
                .wait_timeout(requested, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            requested = guard;
        }
        *requested
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
