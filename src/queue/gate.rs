//! Single-fire ready gates.

use tokio::sync::oneshot;

/// Signal carried by a ready gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateSignal {
    /// The dispatcher admitted the item.
    Go,
    /// The item was removed from the queue before admission.
    Cancelled,
}

/// Receiving half of a ready gate. Awaited once by the pipeline task.
#[derive(Debug)]
pub struct ReadyGate {
    rx: oneshot::Receiver<GateSignal>,
}

/// Sending half, held by the queue until the dispatcher fires it.
#[derive(Debug)]
pub(crate) struct GateTrigger {
    tx: oneshot::Sender<GateSignal>,
}

pub(crate) fn gate() -> (GateTrigger, ReadyGate) {
    let (tx, rx) = oneshot::channel();
    (GateTrigger { tx }, ReadyGate { rx })
}

impl GateTrigger {
    /// Fire the gate. Returns `false` if the waiting task is gone.
    pub(crate) fn fire(self, signal: GateSignal) -> bool {
        self.tx.send(signal).is_ok()
    }
}

impl ReadyGate {
    /// Wait for the gate to fire.
    ///
    /// A dropped trigger (queue shut down) reads as [`GateSignal::Cancelled`].
    pub async fn wait(self) -> GateSignal {
        self.rx.await.unwrap_or(GateSignal::Cancelled)
    }
}
