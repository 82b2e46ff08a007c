//! The single transcode slot.

use parking_lot::Mutex;
use releaseforge_common::{Error, Identity, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

const ACQUISITION_LOG_LEN: usize = 64;

struct SlotInner {
    semaphore: Arc<Semaphore>,
    acquisitions: AtomicU64,
    holders: AtomicUsize,
    peak_holders: AtomicUsize,
    holder: Mutex<Option<Identity>>,
    log: Mutex<VecDeque<(Identity, Instant)>>,
}

/// Process-wide mutual exclusion for the transcode stage.
///
/// Counts acquisitions and tracks the peak number of concurrent holders, so
/// exclusivity can be checked from outside.
#[derive(Clone)]
pub struct TranscodeSlot {
    inner: Arc<SlotInner>,
}

impl Default for TranscodeSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscodeSlot {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SlotInner {
                semaphore: Arc::new(Semaphore::new(1)),
                acquisitions: AtomicU64::new(0),
                holders: AtomicUsize::new(0),
                peak_holders: AtomicUsize::new(0),
                holder: Mutex::new(None),
                log: Mutex::new(VecDeque::with_capacity(ACQUISITION_LOG_LEN)),
            }),
        }
    }

    /// Wait for the slot. It is released when the returned guard drops.
    pub async fn acquire(&self, identity: &Identity) -> Result<SlotGuard> {
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::internal("transcode slot closed"))?;

        let holders = self.inner.holders.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_holders.fetch_max(holders, Ordering::SeqCst);
        self.inner.acquisitions.fetch_add(1, Ordering::SeqCst);
        *self.inner.holder.lock() = Some(identity.clone());

        {
            let mut log = self.inner.log.lock();
            if log.len() == ACQUISITION_LOG_LEN {
                log.pop_front();
            }
            log.push_back((identity.clone(), Instant::now()));
        }

        tracing::debug!(identity = %identity, "Acquired transcode slot");

        Ok(SlotGuard {
            inner: self.inner.clone(),
            identity: identity.clone(),
            _permit: permit,
        })
    }

    /// Total number of acquisitions so far.
    pub fn acquisitions(&self) -> u64 {
        self.inner.acquisitions.load(Ordering::SeqCst)
    }

    /// Number of current holders (0 or 1).
    pub fn holders(&self) -> usize {
        self.inner.holders.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous holders ever observed.
    pub fn peak_holders(&self) -> usize {
        self.inner.peak_holders.load(Ordering::SeqCst)
    }

    /// Identity of the item currently transcoding.
    pub fn holder(&self) -> Option<Identity> {
        self.inner.holder.lock().clone()
    }

    /// Recent acquisitions, oldest first.
    pub fn acquisition_log(&self) -> Vec<(Identity, Instant)> {
        self.inner.log.lock().iter().cloned().collect()
    }
}

/// Holds the transcode slot until dropped.
pub struct SlotGuard {
    inner: Arc<SlotInner>,
    identity: Identity,
    _permit: OwnedSemaphorePermit,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        {
            let mut holder = self.inner.holder.lock();
            if holder.as_ref() == Some(&self.identity) {
                *holder = None;
            }
        }
        self.inner.holders.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(identity = %self.identity, "Released transcode slot");
    }
}
