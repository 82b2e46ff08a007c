//! FIFO admission queue and its paced dispatcher.

use parking_lot::Mutex;
use releaseforge_common::{Error, Identity, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::gate::{gate, GateSignal, GateTrigger, ReadyGate};
use super::slot::TranscodeSlot;
use crate::config::DispatcherConfig;
use crate::state::{PipelineEvent, PipelineState};

/// What a pipeline task receives when its item is enqueued.
pub struct Admission {
    pub gate: ReadyGate,
    pub cancel: CancellationToken,
}

/// Result of an operator cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The item was waiting and has been removed from the queue.
    Dequeued,
    /// The item was running; its cancellation token fired.
    Signalled,
    NotFound,
}

/// Point-in-time view of the queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueSnapshot {
    /// Waiting items in admission order.
    pub waiting: Vec<Identity>,
    /// Admitted items still in their pipeline.
    pub running: Vec<Identity>,
    /// Item currently holding the transcode slot.
    pub slot_holder: Option<Identity>,
}

struct Waiting {
    identity: Identity,
    trigger: GateTrigger,
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueInner {
    waiting: VecDeque<Waiting>,
    running: HashMap<Identity, CancellationToken>,
}

impl QueueInner {
    fn holds(&self, identity: &Identity) -> bool {
        self.running.contains_key(identity) || self.waiting.iter().any(|w| &w.identity == identity)
    }
}

/// FIFO admission queue plus the process-wide transcode slot.
pub struct WorkQueue {
    inner: Mutex<QueueInner>,
    slot: TranscodeSlot,
    cadence: Duration,
    drain: Duration,
    state: Arc<PipelineState>,
}

impl WorkQueue {
    pub fn new(config: &DispatcherConfig, state: Arc<PipelineState>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(QueueInner::default()),
            slot: TranscodeSlot::new(),
            cadence: config.cadence(),
            drain: config.drain(),
            state,
        })
    }

    /// The transcode slot shared by every pipeline task.
    pub fn slot(&self) -> &TranscodeSlot {
        &self.slot
    }

    /// Whether `identity` is waiting or running.
    pub fn contains(&self, identity: &Identity) -> bool {
        self.inner.lock().holds(identity)
    }

    /// Append `identity` to the queue.
    ///
    /// Fails with a conflict if the identity is already waiting or running.
    pub fn enqueue(&self, identity: &Identity) -> Result<Admission> {
        let mut inner = self.inner.lock();

        if inner.holds(identity) {
            return Err(Error::conflict(format!("{} is already queued", identity)));
        }

        let (trigger, ready) = gate();
        let cancel = CancellationToken::new();
        inner.waiting.push_back(Waiting {
            identity: identity.clone(),
            trigger,
            cancel: cancel.clone(),
        });

        tracing::debug!(identity = %identity, position = inner.waiting.len(), "Enqueued item");

        Ok(Admission {
            gate: ready,
            cancel,
        })
    }

    /// Admit the oldest waiting item by firing its gate.
    ///
    /// Entries whose task has gone away are skipped.
    pub fn admit_next(&self) -> Option<Identity> {
        let mut inner = self.inner.lock();

        while let Some(entry) = inner.waiting.pop_front() {
            if entry.trigger.fire(GateSignal::Go) {
                inner.running.insert(entry.identity.clone(), entry.cancel);
                return Some(entry.identity);
            }
            tracing::debug!(identity = %entry.identity, "Skipping abandoned queue entry");
        }

        None
    }

    /// Forget a finished item.
    pub fn finish(&self, identity: &Identity) {
        let mut inner = self.inner.lock();
        inner.running.remove(identity);
        if let Some(pos) = inner.waiting.iter().position(|w| &w.identity == identity) {
            inner.waiting.remove(pos);
        }
    }

    /// Cancel a waiting or running item.
    pub fn cancel(&self, identity: &Identity) -> CancelOutcome {
        let mut inner = self.inner.lock();

        if let Some(pos) = inner.waiting.iter().position(|w| &w.identity == identity) {
            if let Some(entry) = inner.waiting.remove(pos) {
                entry.cancel.cancel();
                entry.trigger.fire(GateSignal::Cancelled);
                tracing::info!(identity = %identity, "Removed waiting item from queue");
                return CancelOutcome::Dequeued;
            }
        }

        if let Some(token) = inner.running.get(identity) {
            token.cancel();
            tracing::info!(identity = %identity, "Signalled running item to cancel");
            return CancelOutcome::Signalled;
        }

        CancelOutcome::NotFound
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let inner = self.inner.lock();
        let mut running: Vec<_> = inner.running.keys().cloned().collect();
        running.sort();

        QueueSnapshot {
            waiting: inner.waiting.iter().map(|w| w.identity.clone()).collect(),
            running,
            slot_holder: self.slot.holder(),
        }
    }

    /// Number of items waiting for admission.
    pub fn len(&self) -> usize {
        self.inner.lock().waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the dispatcher until `shutdown` fires.
    ///
    /// Each cycle admits at most one item, pauses for the drain interval after
    /// an admission, then sleeps for the cadence. On shutdown every waiting
    /// gate is dropped, which waiting tasks observe as a cancellation.
    pub async fn run_dispatcher(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!(
            cadence_secs = self.cadence.as_secs(),
            drain_secs = self.drain.as_secs(),
            "Dispatcher started"
        );

        loop {
            if let Some(identity) = self.admit_next() {
                tracing::info!(identity = %identity, "Admitted item");
                self.state
                    .broadcast(PipelineEvent::ItemAdmitted { identity });

                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.drain) => {}
                }
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.cadence) => {}
            }
        }

        let dropped = {
            let mut inner = self.inner.lock();
            let dropped = inner.waiting.len();
            inner.waiting.clear();
            dropped
        };
        tracing::info!(dropped, "Dispatcher shutting down");
    }
}
