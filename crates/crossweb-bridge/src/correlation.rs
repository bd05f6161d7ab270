//! Correlation table for in-flight invocations
//!
//! Maps a request id to its single-use completion and deadline. Removing an
//! entry is the only way to settle it, so whichever of resolution and
//! timeout takes the lock first wins and the other becomes a no-op.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::debug;

use crossweb_core::BridgeResult;

/// Outcome delivered to the caller of `invoke`
pub type Completion = oneshot::Sender<BridgeResult<Value>>;

/// An invocation waiting for its resolution
#[derive(Debug)]
pub struct PendingInvocation {
    pub issued_at: Instant,
    pub deadline: Instant,
    completion: Completion,
    timer: Option<JoinHandle<()>>,
}

impl PendingInvocation {
    pub fn new(timeout: Duration, completion: Completion) -> Self {
        let issued_at = Instant::now();
        Self {
            issued_at,
            deadline: issued_at + timeout,
            completion,
            timer: None,
        }
    }

    /// Fire the completion. The receiver may already be gone.
    fn settle(self, outcome: BridgeResult<Value>) {
        if self.completion.send(outcome).is_err() {
            debug!("caller dropped before completion");
        }
    }
}

/// Pending invocations keyed by id
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<String, PendingInvocation>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingInvocation>> {
        // Every critical section is a single map operation, so the map is
        // consistent even if a holder panicked.
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new slot. Hands the slot back if the id is already in use.
    pub fn insert(&self, id: &str, pending: PendingInvocation) -> Result<(), PendingInvocation> {
        let mut table = self.lock();
        if table.contains_key(id) {
            return Err(pending);
        }
        table.insert(id.to_string(), pending);
        Ok(())
    }

    /// Attach the deadline timer to a slot; aborts it if the slot is gone
    pub fn attach_timer(&self, id: &str, timer: JoinHandle<()>) {
        let mut table = self.lock();
        match table.get_mut(id) {
            Some(pending) => pending.timer = Some(timer),
            None => timer.abort(),
        }
    }

    /// Settle a slot with a resolution. Unknown or already settled ids are ignored.
    pub fn complete(&self, id: &str, outcome: BridgeResult<Value>) -> bool {
        let Some(mut pending) = self.lock().remove(id) else {
            debug!(id, "resolution for unknown or settled id ignored");
            return false;
        };
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }
        pending.settle(outcome);
        true
    }

    /// Settle a slot from its own deadline timer
    pub fn expire(&self, id: &str, outcome: BridgeResult<Value>) -> bool {
        let removed = self.lock().remove(id);
        match removed {
            Some(pending) => {
                pending.settle(outcome);
                true
            }
            None => false,
        }
    }

    /// Settle every outstanding slot with the same failure
    pub fn fail_all(&self, outcome: impl Fn() -> BridgeResult<Value>) -> usize {
        let drained: Vec<PendingInvocation> = self.lock().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for mut pending in drained {
            if let Some(timer) = pending.timer.take() {
                timer.abort();
            }
            pending.settle(outcome());
        }
        count
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
