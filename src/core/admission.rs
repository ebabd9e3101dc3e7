//! Admission-controlled transfer queue with congestion control.
//!
//! The queue multiplexes any number of resumed transfers onto at most `executing_cap`
//! concurrently running ones. Pending transfers start in FIFO order.
//!
//! # Congestion control
//!
//! Starting many transport sessions in a burst destabilises the transport, so when congestion
//! control is enabled every scheduling pass is deferred by
//! `min(30ms, 8ms + executing_count)`. Only one pass is in flight at a time; a pass starts at most
//! one transfer and then schedules the next pass, so the *rate* of starts is bounded as well as
//! their count. With congestion control disabled passes run synchronously on the caller.
//!
//! # Locking
//!
//! `pending`, `executing`, and the dispatch flag live behind one `parking_lot::Mutex`. Transport
//! calls (`start`, `cancel`) are made after the lock is released, so a transport that reports
//! completion synchronously can re-enter the queue.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::loader::Transfer;
use super::spawn::Spawn;
use crate::config::QueueConfig;
use crate::util::serde::TransferId;

/// Default number of concurrently executing transfers.
pub const DEFAULT_EXECUTING_CAP: usize = 8;

const CONGESTION_BASE_DELAY_MS: u64 = 8;
const CONGESTION_MAX_DELAY_MS: u64 = 30;

/// Delay applied to a scheduling pass while `executing` transfers are running.
pub fn congestion_delay(executing: usize) -> Duration {
    let executing = u64::try_from(executing).unwrap_or(u64::MAX);
    Duration::from_millis(
        CONGESTION_BASE_DELAY_MS
            .saturating_add(executing)
            .min(CONGESTION_MAX_DELAY_MS),
    )
}

/// Result of [`AdmissionQueue::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The transfer was pending and was removed without touching the transport.
    Dequeued,
    /// The transfer was executing; a transport-level cancel was issued.
    Cancelled,
    /// The transfer was in neither set.
    NotQueued,
}

/// Point-in-time view of the queue, in admission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    /// Pending transfer ids, oldest first.
    pub pending: Vec<TransferId>,
    /// Executing transfer ids, in start order.
    pub executing: Vec<TransferId>,
    /// Capacity at the time of the snapshot.
    pub executing_cap: usize,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Transfer>,
    /// Executing transfers with their start sequence number.
    executing: HashMap<TransferId, (u64, Transfer)>,
    start_seq: u64,
    dispatch_in_flight: bool,
}

impl QueueState {
    fn is_pending(&self, id: TransferId) -> bool {
        self.pending.iter().any(|t| t.id() == id)
    }

    fn remove_pending(&mut self, id: TransferId) -> bool {
        match self.pending.iter().position(|t| t.id() == id) {
            Some(index) => {
                self.pending.remove(index);
                true
            }
            None => false,
        }
    }
}

struct QueueInner<S> {
    state: Mutex<QueueState>,
    executing_cap: AtomicUsize,
    congestion_control: AtomicBool,
    spawner: S,
}

/// Bounds the number of concurrently executing transfers.
pub struct AdmissionQueue<S> {
    inner: Arc<QueueInner<S>>,
}

impl<S> Clone for AdmissionQueue<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> AdmissionQueue<S>
where
    S: Spawn + Send + Sync + 'static,
{
    /// Create a queue from configuration.
    pub fn new(config: &QueueConfig, spawner: S) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                executing_cap: AtomicUsize::new(config.max_concurrent_transfers.max(1)),
                congestion_control: AtomicBool::new(config.congestion_control_enabled),
                spawner,
            }),
        }
    }

    /// Maximum number of concurrently executing transfers.
    pub fn executing_cap(&self) -> usize {
        self.inner.executing_cap.load(Ordering::Acquire)
    }

    /// Change the capacity (clamped to at least 1).
    ///
    /// Lowering the capacity never interrupts running transfers; it only delays new starts
    /// until enough of them finish.
    pub fn set_executing_cap(&self, cap: usize) {
        self.inner.executing_cap.store(cap.max(1), Ordering::Release);
        self.inner.set_needs_execute();
    }

    /// Whether scheduling passes are delayed.
    pub fn congestion_control_enabled(&self) -> bool {
        self.inner.congestion_control.load(Ordering::Acquire)
    }

    /// Enable or disable congestion control; read on every pass.
    pub fn set_congestion_control_enabled(&self, enabled: bool) {
        self.inner.congestion_control.store(enabled, Ordering::Release);
    }

    /// Queue `transfer` for execution. No-op if it is already pending or executing.
    pub fn resume(&self, transfer: &Transfer) {
        {
            let mut state = self.inner.state.lock();
            if state.executing.contains_key(&transfer.id()) || state.is_pending(transfer.id()) {
                return;
            }
            state.pending.push_back(transfer.clone());
            trace!(transfer = transfer.id(), pending = state.pending.len(), "transfer queued");
        }
        self.inner.set_needs_execute();
    }

    /// Withdraw a pending transfer without cancelling it. Executing transfers keep running.
    ///
    /// Returns true if the transfer was pending.
    pub fn suspend(&self, transfer: &Transfer) -> bool {
        self.inner.state.lock().remove_pending(transfer.id())
    }

    /// Remove `transfer`, cancelling it at the transport if it was executing.
    pub fn cancel(&self, transfer: &Transfer) -> CancelOutcome {
        let outcome = {
            let mut state = self.inner.state.lock();
            if state.remove_pending(transfer.id()) {
                CancelOutcome::Dequeued
            } else if state.executing.remove(&transfer.id()).is_some() {
                CancelOutcome::Cancelled
            } else {
                CancelOutcome::NotQueued
            }
        };
        if outcome == CancelOutcome::Cancelled {
            debug!(transfer = transfer.id(), "cancelling executing transfer");
            transfer.cancel();
            self.inner.set_needs_execute();
        }
        outcome
    }

    /// Mark `transfer` as finished (completed or failed) and free its slot.
    pub fn finish(&self, transfer: &Transfer) {
        let freed = {
            let mut state = self.inner.state.lock();
            if state.remove_pending(transfer.id()) {
                false
            } else {
                state.executing.remove(&transfer.id()).is_some()
            }
        };
        if freed {
            trace!(transfer = transfer.id(), "transfer finished");
            self.inner.set_needs_execute();
        }
    }

    /// Number of pending transfers.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Number of executing transfers.
    pub fn executing_count(&self) -> usize {
        self.inner.state.lock().executing.len()
    }

    /// Consistent snapshot of both sets.
    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.inner.state.lock();
        let mut executing: Vec<_> = state
            .executing
            .iter()
            .map(|(id, (seq, _))| (*seq, *id))
            .collect();
        executing.sort_unstable();
        QueueSnapshot {
            pending: state.pending.iter().map(Transfer::id).collect(),
            executing: executing.into_iter().map(|(_, id)| id).collect(),
            executing_cap: self.executing_cap(),
        }
    }
}

impl<S> QueueInner<S>
where
    S: Spawn + Send + Sync + 'static,
{
    fn set_needs_execute(self: &Arc<Self>) {
        let delay = {
            let mut state = self.state.lock();
            if state.dispatch_in_flight {
                return;
            }
            state.dispatch_in_flight = true;
            self.congestion_control
                .load(Ordering::Acquire)
                .then(|| congestion_delay(state.executing.len()))
        };

        match delay {
            Some(delay) => {
                let queue = Arc::clone(self);
                self.spawner.spawn_after(delay, async move {
                    queue.execute();
                });
            }
            None => self.execute(),
        }
    }

    fn execute(self: &Arc<Self>) {
        if let Some(transfer) = self.admit_next() {
            debug!(transfer = transfer.id(), "starting transfer");
            transfer.start();
            self.set_needs_execute();
        }
    }

    /// Moves the oldest pending transfer to `executing` if there is capacity.
    fn admit_next(&self) -> Option<Transfer> {
        let mut state = self.state.lock();
        state.dispatch_in_flight = false;
        if state.executing.len() >= self.executing_cap.load(Ordering::Acquire) {
            return None;
        }
        let transfer = state.pending.pop_front()?;
        state.start_seq += 1;
        let seq = state.start_seq;
        state.executing.insert(transfer.id(), (seq, transfer.clone()));
        Some(transfer)
    }
}
