//! Bounded dispatch queue feeding a fixed-size worker pool.
//!
//! [`WorkerPool::spawn`] starts a dispatcher task that owns the inbound
//! channel. The dispatcher first waits for the sizing handshake
//! ([`Inbound::Configure`]), starts that many workers on a shared bounded
//! task queue, marks the pool ready, and then forwards every request
//! envelope to the workers. Each worker executes one envelope at a time
//! against the shared store and resolves it exactly once.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn};

use crate::client::Client;
use crate::config::ServerConfig;
use crate::executor::{execute, SharedStore};
use crate::lifecycle::{
    wait_for_shutdown, InFlightGuard, PoolLifecycle, PoolState, WorkerSlot, WorkerState,
};
use crate::operation::{Envelope, Inbound, Operation, OperationError, Outcome};

/// An envelope accepted by the dispatcher, counted as in flight until
/// dropped.
struct Task {
    envelope: Envelope,
    _guard: InFlightGuard,
}

type TaskQueue = Arc<Mutex<mpsc::Receiver<Task>>>;

/// Entry point for starting pools.
pub struct WorkerPool;

impl WorkerPool {
    /// Spawns the dispatcher on the current Tokio runtime.
    ///
    /// The pool stays in [`PoolState::Starting`] until
    /// [`PoolHandle::configure`] completes the sizing handshake.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn spawn(store: SharedStore, config: &ServerConfig) -> PoolHandle {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let lifecycle = Arc::new(PoolLifecycle::new());
        let dispatcher = tokio::spawn(run_dispatcher(
            inbound_rx,
            store,
            config.task_queue_capacity.max(1),
            Arc::clone(&lifecycle),
        ));

        PoolHandle {
            inbound: inbound_tx,
            next_call_id: Arc::new(AtomicU64::new(1)),
            lifecycle,
            dispatcher: Some(dispatcher),
        }
    }
}

/// Owner-side handle of a running pool.
#[derive(Debug)]
pub struct PoolHandle {
    inbound: mpsc::Sender<Inbound>,
    next_call_id: Arc<AtomicU64>,
    lifecycle: Arc<PoolLifecycle>,
    dispatcher: Option<JoinHandle<()>>,
}

impl PoolHandle {
    /// Sends the sizing handshake and waits until the workers are running.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::Cancelled`] if the pool shut down first.
    pub async fn configure(&self, workers: usize) -> Result<(), OperationError> {
        self.inbound
            .send(Inbound::Configure { workers })
            .await
            .map_err(|_| OperationError::Cancelled)?;
        if self.lifecycle.wait_ready().await {
            Ok(())
        } else {
            Err(OperationError::Cancelled)
        }
    }

    /// Returns a new submission handle for this pool.
    ///
    /// All clients of one pool draw call ids from the same counter.
    #[must_use]
    pub fn client(&self) -> Client {
        Client::new(self.inbound.clone(), Arc::clone(&self.next_call_id))
    }

    #[must_use]
    pub fn lifecycle(&self) -> &Arc<PoolLifecycle> {
        &self.lifecycle
    }

    #[must_use]
    pub fn state(&self) -> PoolState {
        self.lifecycle.state()
    }

    #[must_use]
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.lifecycle.worker_states()
    }

    /// Stops the pool.
    ///
    /// Requests still queued are resolved with [`OperationError::Cancelled`];
    /// requests being executed finish first. Returns `true` if everything
    /// drained within `drain_timeout`.
    pub async fn shutdown(&mut self, drain_timeout: Duration) -> bool {
        self.lifecycle.trigger_shutdown();
        if let Some(dispatcher) = self.dispatcher.take() {
            if tokio::time::timeout(drain_timeout, dispatcher).await.is_err() {
                warn!("dispatcher did not stop within the drain timeout");
            }
        }
        let drained = self.lifecycle.wait_for_drain(drain_timeout).await;
        info!(drained, "worker pool stopped");
        drained
    }
}

async fn run_dispatcher(
    mut inbound: mpsc::Receiver<Inbound>,
    store: SharedStore,
    task_queue_capacity: usize,
    lifecycle: Arc<PoolLifecycle>,
) {
    let mut shutdown = lifecycle.shutdown_receiver();

    let Some(worker_count) = await_sizing(&mut inbound, &mut shutdown).await else {
        cancel_pending(&mut inbound);
        lifecycle.set_stopped();
        return;
    };

    let (task_tx, task_rx) = mpsc::channel::<Task>(task_queue_capacity);
    let queue: TaskQueue = Arc::new(Mutex::new(task_rx));
    let workers: Vec<JoinHandle<()>> = (0..worker_count)
        .map(|index| {
            tokio::spawn(run_worker(
                index,
                Arc::clone(&queue),
                Arc::clone(&store),
                lifecycle.add_worker(),
                lifecycle.shutdown_receiver(),
            ))
        })
        .collect();

    lifecycle.set_ready();
    info!(workers = worker_count, task_queue_capacity, "worker pool ready");

    loop {
        let message = tokio::select! {
            biased;
            () = wait_for_shutdown(&mut shutdown) => break,
            message = inbound.recv() => message,
        };

        match message {
            Some(Inbound::Request(envelope)) => {
                if envelope.responder.is_abandoned() {
                    warn!(call_id = envelope.call_id, table = %envelope.table, "dropping envelope with no caller attached");
                    continue;
                }
                // Waits for room while the task queue is full.
                tokio::select! {
                    biased;
                    () = wait_for_shutdown(&mut shutdown) => {
                        envelope.reject(OperationError::Cancelled);
                        break;
                    }
                    permit = task_tx.reserve() => match permit {
                        Ok(permit) => permit.send(Task {
                            envelope,
                            _guard: lifecycle.in_flight_guard(),
                        }),
                        Err(_) => {
                            envelope.reject(OperationError::Cancelled);
                            break;
                        }
                    },
                }
            }
            Some(Inbound::Configure { workers }) => {
                warn!(workers, "pool already sized, dropping configure message");
            }
            None => {
                debug!("all clients gone, dispatcher exiting");
                break;
            }
        }
    }

    lifecycle.trigger_shutdown();
    cancel_pending(&mut inbound);
    drop(task_tx);
    for worker in workers {
        let _ = worker.await;
    }
    lifecycle.set_stopped();
    info!("dispatcher stopped");
}

/// Waits for the sizing handshake; `None` if the pool stops first.
///
/// Requests that arrive before it are dropped.
async fn await_sizing(
    inbound: &mut mpsc::Receiver<Inbound>,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
) -> Option<usize> {
    loop {
        let message = tokio::select! {
            biased;
            () = wait_for_shutdown(shutdown) => return None,
            message = inbound.recv() => message?,
        };
        match message {
            Inbound::Configure { workers } => {
                if workers < 1 {
                    warn!(requested = workers, "worker count clamped to 1");
                }
                return Some(workers.max(1));
            }
            Inbound::Request(envelope) => {
                warn!(call_id = envelope.call_id, "request received before pool was sized, dropping");
            }
        }
    }
}

/// Resolves everything still queued on the inbound channel as cancelled.
fn cancel_pending(inbound: &mut mpsc::Receiver<Inbound>) {
    inbound.close();
    let mut cancelled = 0_usize;
    while let Ok(message) = inbound.try_recv() {
        if let Inbound::Request(envelope) = message {
            envelope.reject(OperationError::Cancelled);
            cancelled += 1;
        }
    }
    if cancelled > 0 {
        info!(cancelled, "cancelled queued requests on shutdown");
    }
}

async fn run_worker(
    index: usize,
    queue: TaskQueue,
    store: SharedStore,
    slot: Arc<WorkerSlot>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    debug!(worker = index, "worker started");
    loop {
        slot.set(WorkerState::Dequeuing);
        let next = tokio::select! {
            biased;
            () = wait_for_shutdown(&mut shutdown) => None,
            task = async { queue.lock().await.recv().await } => task,
        };
        let Some(task) = next else { break };

        let Task { envelope, _guard } = task;
        if envelope.responder.is_abandoned() {
            warn!(worker = index, call_id = envelope.call_id, table = %envelope.table, "caller gone before execution, skipping envelope");
            continue;
        }

        slot.set(WorkerState::Executing);
        let Envelope {
            call_id,
            table,
            operation,
            responder,
        } = envelope;
        let outcome = execute_traced(&store, index, call_id, &table, operation);

        slot.set(WorkerState::Resolving);
        responder.resolve(outcome);
        slot.set(WorkerState::Idle);
    }

    // Anything the dispatcher queued before shutdown is cancelled, not run.
    let mut queue = queue.lock().await;
    while let Ok(task) = queue.try_recv() {
        task.envelope.reject(OperationError::Cancelled);
    }
    drop(queue);
    slot.set(WorkerState::Stopped);
    debug!(worker = index, "worker stopped");
}

/// Runs one operation inside an `operation` span recording its outcome
/// and duration.
fn execute_traced(
    store: &SharedStore,
    worker: usize,
    call_id: u64,
    table: &str,
    operation: Operation,
) -> Outcome {
    let op = operation.name();
    let span = info_span!(
        "operation",
        worker,
        call_id,
        table,
        op,
        outcome = tracing::field::Empty,
        duration_us = tracing::field::Empty,
    );
    let _entered = span.enter();

    let start = Instant::now();
    let outcome = execute(store, table, operation);
    #[allow(clippy::cast_possible_truncation)]
    let duration_us = start.elapsed().as_micros() as u64;

    let result = if outcome.is_ok() { "ok" } else { "error" };
    span.record("outcome", result);
    span.record("duration_us", duration_us);
    debug!(outcome = result, duration_us, "operation complete");
    outcome
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use tabula_core::{content, Filters, IndexSpec, Value};

    use super::*;
    use crate::executor::shared_store;

    fn config() -> ServerConfig {
        ServerConfig {
            task_queue_capacity: 4,
            ..ServerConfig::default()
        }
    }

    async fn ready_pool(workers: usize) -> (PoolHandle, SharedStore) {
        let store = shared_store("test");
        let pool = WorkerPool::spawn(Arc::clone(&store), &config());
        pool.configure(workers).await.unwrap();
        (pool, store)
    }

    fn unique(field: &str) -> IndexSpec {
        let mut spec = IndexSpec::new();
        spec.insert(field.to_string(), true);
        spec
    }

    #[tokio::test]
    async fn handshake_clamps_workers_and_marks_ready() {
        let pool = WorkerPool::spawn(shared_store("test"), &config());
        assert_eq!(pool.state(), PoolState::Starting);

        pool.configure(0).await.unwrap();
        assert_eq!(pool.state(), PoolState::Ready);
        assert_eq!(pool.worker_states().len(), 1);
    }

    #[tokio::test]
    async fn request_before_configure_is_cancelled() {
        let pool = WorkerPool::spawn(shared_store("test"), &config());
        let client = pool.client();

        let outcome = client.submit("t", Operation::Get { filters: Filters::new() }).await;
        assert_eq!(outcome, Err(OperationError::Cancelled));

        pool.configure(2).await.unwrap();
        client.create_table("t", IndexSpec::new()).await.unwrap();
        assert!(client.get("t", Filters::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_configure_is_ignored() {
        let (pool, _store) = ready_pool(2).await;
        pool.configure(8).await.unwrap();
        assert_eq!(pool.worker_states().len(), 2);
    }

    #[tokio::test]
    async fn unknown_operation_is_unsupported() {
        let (pool, _store) = ready_pool(1).await;
        let outcome = pool.client().submit("t", Operation::Unknown { code: 42 }).await;
        let err = outcome.unwrap_err();
        assert_eq!(err, OperationError::UnsupportedOperation { code: 42 });
        assert_eq!(
            err.descriptor(),
            r#"{"_error":"DB Operation: 42 is not supported"}"#
        );
    }

    #[tokio::test]
    async fn abandoned_envelope_is_not_executed() {
        let (pool, _store) = ready_pool(1).await;
        let client = pool.client();
        client.create_table("t", IndexSpec::new()).await.unwrap();

        let (envelope, rx) = Envelope::new(
            999,
            "t",
            Operation::Save {
                content: content! { "a" => 1_i64 },
            },
        );
        drop(rx);
        pool.inbound.send(Inbound::Request(envelope)).await.unwrap();

        // The inbound channel is FIFO, so the abandoned envelope was seen first.
        assert!(client.get("t", Filters::new()).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_respect_unique_index() {
        let (pool, _store) = ready_pool(4).await;
        let client = pool.client();
        client.create_table("cars", unique("reg_no")).await.unwrap();

        let attempts: Vec<_> = (0..32)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move {
                    client
                        .save("cars", content! { "reg_no" => "KA-01-1234" })
                        .await
                })
            })
            .collect();

        let mut saved = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => saved += 1,
                Err(err) => assert!(matches!(err, OperationError::DuplicateEntity { .. })),
            }
        }
        assert_eq!(saved, 1);
        assert_eq!(client.get("cars", Filters::new()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_every_worker() {
        let (mut pool, _store) = ready_pool(3).await;
        assert!(pool.shutdown(Duration::from_secs(1)).await);
        assert_eq!(pool.state(), PoolState::Stopped);
        assert!(pool
            .worker_states()
            .iter()
            .all(|state| *state == WorkerState::Stopped));

        let outcome = pool.client().drop_table("t").await;
        assert_eq!(outcome, Err(OperationError::Cancelled));
    }

    #[tokio::test]
    async fn shutdown_before_configure_stops_pool() {
        let mut pool = WorkerPool::spawn(shared_store("test"), &config());
        assert!(pool.shutdown(Duration::from_secs(1)).await);
        assert_eq!(pool.state(), PoolState::Stopped);
        assert_eq!(
            pool.configure(1).await,
            Err(OperationError::Cancelled)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[allow(clippy::await_holding_lock)]
    async fn shutdown_cancels_queued_requests() {
        let (mut pool, store) = ready_pool(1).await;
        let client = pool.client();
        client.create_table("t", IndexSpec::new()).await.unwrap();

        // Block the only worker on the store lock.
        let guard = store.write();
        let first = {
            let client = client.clone();
            tokio::spawn(async move { client.save("t", content! { "n" => 0_i64 }).await })
        };
        wait_for_workers(&pool, WorkerState::Executing).await;

        let queued: Vec<_> = (1..4_i64)
            .map(|n| {
                let client = client.clone();
                tokio::spawn(async move { client.save("t", content! { "n" => n }).await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.lifecycle().trigger_shutdown();
        assert_eq!(pool.state(), PoolState::Draining);
        drop(guard);
        pool.shutdown(Duration::from_secs(1)).await;

        assert!(first.await.unwrap().is_ok());
        for request in queued {
            assert_eq!(request.await.unwrap(), Err(OperationError::Cancelled));
        }
    }

    #[tokio::test]
    async fn clients_of_one_pool_share_call_ids() {
        let (pool, _store) = ready_pool(1).await;
        let first = pool.client();
        let second = pool.client();

        let a = first.allocate_call_id();
        let b = second.allocate_call_id();
        let c = first.clone().allocate_call_id();
        assert_eq!(BTreeSet::from([a, b, c]).len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[allow(clippy::await_holding_lock)]
    async fn request_abandoned_while_queued_is_not_executed() {
        let (pool, store) = ready_pool(1).await;
        let client = pool.client();
        client.create_table("t", IndexSpec::new()).await.unwrap();

        let guard = store.write();
        let first = {
            let client = client.clone();
            tokio::spawn(async move { client.save("t", content! { "n" => 0_i64 }).await })
        };
        wait_for_workers(&pool, WorkerState::Executing).await;

        let timed_out = tokio::time::timeout(
            Duration::from_millis(50),
            client.save("t", content! { "n" => 1_i64 }),
        )
        .await;
        assert!(timed_out.is_err());

        drop(guard);
        assert!(first.await.unwrap().is_ok());

        let records = client.get("t", Filters::new()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["n"], Value::Int(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[allow(clippy::await_holding_lock)]
    async fn full_queues_hold_submitters_back() {
        let store = shared_store("test");
        let pool = WorkerPool::spawn(
            Arc::clone(&store),
            &ServerConfig {
                inbound_capacity: 1,
                task_queue_capacity: 1,
                ..ServerConfig::default()
            },
        );
        pool.configure(1).await.unwrap();
        let client = pool.client();
        client.create_table("t", IndexSpec::new()).await.unwrap();

        let guard = store.write();
        let save = |n: i64| {
            let client = client.clone();
            tokio::spawn(async move { client.save("t", content! { "n" => n }).await })
        };

        // One executing, one in the task queue, one held by the dispatcher,
        // one in the inbound channel.
        let mut pending = vec![save(0)];
        wait_for_workers(&pool, WorkerState::Executing).await;
        for n in 1..4 {
            pending.push(save(n));
        }
        while pool.inbound.capacity() > 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            client.save("t", content! { "n" => 99_i64 }),
        )
        .await;
        assert!(blocked.is_err());
        assert!(pending.iter().all(|request| !request.is_finished()));

        drop(guard);
        for request in pending {
            assert!(request.await.unwrap().is_ok());
        }
        client.save("t", content! { "n" => 4_i64 }).await.unwrap();
        assert_eq!(client.get("t", Filters::new()).await.unwrap().len(), 5);
    }

    async fn wait_for_workers(pool: &PoolHandle, state: WorkerState) {
        while pool.worker_states().iter().any(|s| *s != state) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}
