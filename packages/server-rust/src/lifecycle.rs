//! Pool lifecycle: readiness, shutdown signalling and in-flight tracking.
//!
//! Uses `ArcSwap` for lock-free state transitions, `watch` channels for the
//! readiness and shutdown broadcasts, and an atomic counter with RAII guards
//! for in-flight envelopes.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use tokio::sync::watch;

/// Pool state machine: Starting -> Ready -> Draining -> Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Waiting for the sizing handshake.
    Starting,
    /// Workers are running and requests are forwarded.
    Ready,
    /// Shutdown requested; queued requests are being cancelled.
    Draining,
    /// Every worker has exited.
    Stopped,
}

/// Per-worker state: Idle -> Dequeuing -> Executing -> Resolving -> Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Dequeuing = 1,
    Executing = 2,
    Resolving = 3,
    /// Terminal; reached only on pool shutdown.
    Stopped = 4,
}

impl WorkerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Dequeuing,
            2 => Self::Executing,
            3 => Self::Resolving,
            _ => Self::Stopped,
        }
    }
}

/// Shared, atomically updated state of one worker.
#[derive(Debug)]
pub struct WorkerSlot(AtomicU8);

impl WorkerSlot {
    fn new() -> Self {
        Self(AtomicU8::new(WorkerState::Idle as u8))
    }

    pub fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    #[must_use]
    pub fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }
}

/// Coordinates startup and shutdown between the pool and its callers.
///
/// 1. The dispatcher calls `set_ready()` once the workers are running,
///    releasing everyone blocked in `wait_ready()`
/// 2. `trigger_shutdown()` moves to Draining and signals the dispatcher and
///    every worker
/// 3. `wait_for_drain()` waits until no envelope is in flight
#[derive(Debug)]
pub struct PoolLifecycle {
    state: ArcSwap<PoolState>,
    ready_signal: watch::Sender<bool>,
    shutdown_signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    workers: RwLock<Vec<Arc<WorkerSlot>>>,
}

impl PoolLifecycle {
    /// Creates a lifecycle in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        let (ready_signal, _) = watch::channel(false);
        let (shutdown_signal, _) = watch::channel(false);
        Self {
            state: ArcSwap::from_pointee(PoolState::Starting),
            ready_signal,
            shutdown_signal,
            in_flight: Arc::new(AtomicU64::new(0)),
            workers: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn state(&self) -> PoolState {
        **self.state.load()
    }

    /// Transitions to `Ready` and wakes everyone waiting on readiness.
    pub fn set_ready(&self) {
        self.state.store(Arc::new(PoolState::Ready));
        self.ready_signal.send_replace(true);
    }

    /// Waits until the pool is ready.
    ///
    /// Returns `false` if the pool shut down before becoming ready.
    pub async fn wait_ready(&self) -> bool {
        let mut ready = self.ready_signal.subscribe();
        let mut shutdown = self.shutdown_signal.subscribe();
        tokio::select! {
            res = ready.wait_for(|&r| r) => res.is_ok(),
            () = wait_for_shutdown(&mut shutdown) => false,
        }
    }

    /// Returns a receiver that flips to `true` when shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_signal.borrow()
    }

    /// Transitions to `Draining` and signals all shutdown receivers.
    pub fn trigger_shutdown(&self) {
        if self.state() != PoolState::Stopped {
            self.state.store(Arc::new(PoolState::Draining));
        }
        self.shutdown_signal.send_replace(true);
    }

    /// Marks the pool as fully stopped.
    pub fn set_stopped(&self) {
        self.state.store(Arc::new(PoolState::Stopped));
    }

    /// Allocates the state slot for a new worker.
    #[must_use]
    pub fn add_worker(&self) -> Arc<WorkerSlot> {
        let slot = Arc::new(WorkerSlot::new());
        self.workers.write().push(Arc::clone(&slot));
        slot
    }

    /// Current state of every worker, in start order.
    #[must_use]
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers.read().iter().map(|slot| slot.get()).collect()
    }

    /// Creates an RAII guard that tracks an in-flight envelope.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits for all in-flight envelopes to be resolved, up to `timeout`.
    ///
    /// Returns `true` and transitions to `Stopped` if everything drained;
    /// returns `false` and stays `Draining` if the timeout expired.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                self.set_stopped();
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for PoolLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once `rx` has seen `true`, or its sender is gone.
pub async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|&s| s).await;
}

/// Decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
