//! Store server owning its runtime.
//!
//! [`TabulaServer::start`] builds a dedicated multi-threaded runtime, spawns
//! the worker pool on it, completes the sizing handshake, and hands out
//! [`BlockingClient`]s for use from ordinary threads.

use anyhow::Context;
use tokio::runtime::{Builder, Runtime};
use tracing::info;

use crate::bridge::BlockingClient;
use crate::client::Client;
use crate::config::ServerConfig;
use crate::executor::{shared_store, SharedStore};
use crate::lifecycle::{PoolState, WorkerState};
use crate::pool::{PoolHandle, WorkerPool};

/// Process-wide store handle. Constructed once and passed to collaborators.
pub struct TabulaServer {
    config: ServerConfig,
    store: SharedStore,
    pool: PoolHandle,
    runtime: Option<Runtime>,
}

impl TabulaServer {
    /// Starts the runtime and the worker pool, returning once it is ready.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be built or the pool stops
    /// before becoming ready.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn start(config: ServerConfig) -> anyhow::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.runtime_threads.max(1))
            .thread_name(format!("{}-pool", config.name))
            .enable_all()
            .build()
            .context("failed to build pool runtime")?;

        let store = shared_store(&config.name);
        let pool = runtime.block_on(async {
            let pool = WorkerPool::spawn(store.clone(), &config);
            pool.configure(config.workers).await?;
            anyhow::Ok(pool)
        })?;

        info!(store = %config.name, workers = config.workers, "store server started");
        Ok(Self {
            config,
            store,
            pool,
            runtime: Some(runtime),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns a blocking client with the configured request timeout.
    ///
    /// # Panics
    ///
    /// Panics if the server has already been shut down.
    #[must_use]
    pub fn client(&self) -> BlockingClient {
        BlockingClient::new(
            self.pool.client(),
            self.runtime_handle(),
            self.config.request_timeout,
        )
    }

    /// Returns an async client for callers already running on a runtime.
    #[must_use]
    pub fn async_client(&self) -> Client {
        self.pool.client()
    }

    #[must_use]
    pub fn state(&self) -> PoolState {
        self.pool.state()
    }

    #[must_use]
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.pool.worker_states()
    }

    /// Number of tables currently registered.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.store.read().table_names().count()
    }

    fn runtime_handle(&self) -> tokio::runtime::Handle {
        match &self.runtime {
            Some(runtime) => runtime.handle().clone(),
            None => unreachable!("runtime is only taken by shutdown, which consumes the server"),
        }
    }

    /// Stops the pool and the runtime.
    ///
    /// Queued requests resolve as cancelled. Returns `true` if every
    /// in-flight request drained within the configured drain timeout.
    pub fn shutdown(mut self) -> bool {
        let Some(runtime) = self.runtime.take() else {
            return true;
        };
        let drained = runtime.block_on(self.pool.shutdown(self.config.drain_timeout));
        runtime.shutdown_timeout(self.config.drain_timeout);
        info!(store = %self.config.name, drained, "store server stopped");
        drained
    }
}

impl Drop for TabulaServer {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            self.pool.lifecycle().trigger_shutdown();
            runtime.shutdown_timeout(self.config.drain_timeout);
        }
    }
}
