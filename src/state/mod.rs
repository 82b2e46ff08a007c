//! Live pipeline state: outcome events and the per-(item, quality) status registry.

use dashmap::DashMap;
use releaseforge_common::{ArtifactHandle, Identity, QualityLabel, QualityState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Pipeline-wide event for subscribers (status CLI, tests, notification hooks).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The deduplicator accepted a candidate.
    ItemAccepted { identity: Identity, title: String },
    /// The dispatcher opened the item's ready gate.
    ItemAdmitted { identity: Identity },
    /// A quality moved to a new pipeline state.
    StateChanged {
        identity: Identity,
        quality: QualityLabel,
        state: QualityState,
    },
    /// A transcode progress sample.
    Progress {
        identity: Identity,
        quality: QualityLabel,
        percent: f32,
    },
    /// A quality was published and recorded.
    QualityUploaded {
        identity: Identity,
        quality: QualityLabel,
        artifact_handle: ArtifactHandle,
    },
    /// A quality reached a terminal failure.
    QualityFailed {
        identity: Identity,
        quality: QualityLabel,
        error: String,
    },
    /// Every requested quality of the item is uploaded.
    ItemCompleted { identity: Identity },
    /// The item ended with at least one failed quality.
    ItemFailed { identity: Identity, error: String },
    /// The item was cancelled by an operator.
    ItemCancelled { identity: Identity },
}

impl PipelineEvent {
    /// Identity the event refers to.
    pub fn identity(&self) -> &Identity {
        match self {
            Self::ItemAccepted { identity, .. }
            | Self::ItemAdmitted { identity }
            | Self::StateChanged { identity, .. }
            | Self::Progress { identity, .. }
            | Self::QualityUploaded { identity, .. }
            | Self::QualityFailed { identity, .. }
            | Self::ItemCompleted { identity }
            | Self::ItemFailed { identity, .. }
            | Self::ItemCancelled { identity } => identity,
        }
    }

    /// Whether the event ends the item's pipeline lifetime.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ItemCompleted { .. } | Self::ItemFailed { .. } | Self::ItemCancelled { .. }
        )
    }
}

/// Shared pipeline state: event channel plus live per-quality status.
pub struct PipelineState {
    statuses: DashMap<(Identity, QualityLabel), QualityState>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl PipelineState {
    pub fn new() -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Arc::new(Self {
            statuses: DashMap::new(),
            event_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    /// Broadcast an event to all subscribers.
    pub fn broadcast(&self, event: PipelineEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::trace!("No subscribers for pipeline event");
        }
    }

    /// Move `quality` of `identity` to `next`.
    ///
    /// Illegal transitions are ignored and logged. Returns whether the state
    /// changed.
    pub fn transition(&self, identity: &Identity, quality: &QualityLabel, next: QualityState) -> bool {
        let key = (identity.clone(), quality.clone());
        let changed = {
            let mut entry = self.statuses.entry(key).or_insert(QualityState::Pending);
            let current = *entry;
            if current == next {
                false
            } else if current.can_transition_to(next) {
                *entry = next;
                true
            } else {
                tracing::warn!(
                    identity = %identity,
                    quality = %quality,
                    from = %current,
                    to = %next,
                    "Ignoring illegal state transition"
                );
                false
            }
        };

        if changed {
            self.broadcast(PipelineEvent::StateChanged {
                identity: identity.clone(),
                quality: quality.clone(),
                state: next,
            });
        }

        changed
    }

    /// Current state of `quality` of `identity`, if it is tracked.
    pub fn state_of(&self, identity: &Identity, quality: &QualityLabel) -> Option<QualityState> {
        self.statuses
            .get(&(identity.clone(), quality.clone()))
            .map(|entry| *entry)
    }

    /// Drop every tracked quality of `identity`.
    pub fn forget_item(&self, identity: &Identity) {
        self.statuses.retain(|(id, _), _| id != identity);
    }

    /// All tracked (identity, quality, state) triples, sorted.
    pub fn snapshot(&self) -> Vec<(Identity, QualityLabel, QualityState)> {
        let mut entries: Vec<_> = self
            .statuses
            .iter()
            .map(|entry| {
                let (identity, quality) = entry.key().clone();
                (identity, quality, *entry.value())
            })
            .collect();
        entries.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        entries
    }
}
