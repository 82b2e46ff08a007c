//! Work queue coordination: FIFO admission, ready gates, and the transcode slot.

mod dispatcher;
mod gate;
mod reconcile;
mod slot;

pub use dispatcher::{Admission, CancelOutcome, QueueSnapshot, WorkQueue};
pub use gate::{GateSignal, ReadyGate};
pub use reconcile::{reconcile, ReconcileReport};
pub use slot::{SlotGuard, TranscodeSlot};
