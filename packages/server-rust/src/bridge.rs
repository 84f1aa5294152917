//! Blocking facade over [`Client`] for callers outside the pool's runtime.
//!
//! The hand-off between the calling thread and the runtime goes through
//! [`Handle::block_on`]; nothing else in the bridge is shared.

use std::future::Future;
use std::time::Duration;

use tabula_core::{Content, Filters, IndexSpec};
use tokio::runtime::Handle;

use crate::client::Client;
use crate::operation::{Operation, OperationError, Outcome};

/// Synchronous client usable from any thread that is not a runtime worker.
///
/// Each call blocks until the request's outcome arrives or the optional
/// timeout fires. A full inbound channel blocks the call too.
///
/// A request that times out before a worker picks it up is never executed.
/// One that times out while executing may still commit.
#[derive(Debug, Clone)]
pub struct BlockingClient {
    client: Client,
    runtime: Handle,
    timeout: Option<Duration>,
}

impl BlockingClient {
    #[must_use]
    pub fn new(client: Client, runtime: Handle, timeout: Option<Duration>) -> Self {
        Self {
            client,
            runtime,
            timeout,
        }
    }

    /// The async client this bridge drives.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Runs `fut` on the pool's runtime and blocks until it completes.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    fn block<T>(
        &self,
        fut: impl Future<Output = Result<T, OperationError>>,
    ) -> Result<T, OperationError> {
        match self.timeout {
            Some(limit) => self.runtime.block_on(async move {
                tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
                    #[allow(clippy::cast_possible_truncation)]
                    let timeout_ms = limit.as_millis() as u64;
                    Err(OperationError::TimedOut { timeout_ms })
                })
            }),
            None => self.runtime.block_on(fut),
        }
    }

    /// Submits `operation` on `table` and blocks for its outcome.
    pub fn submit(&self, table: &str, operation: Operation) -> Outcome {
        self.block(self.client.submit(table, operation))
    }

    /// Blocking [`Client::create_table`].
    ///
    /// # Errors
    ///
    /// See [`Client::create_table`]; also [`OperationError::TimedOut`].
    pub fn create_table(&self, table: &str, indexes: IndexSpec) -> Result<(), OperationError> {
        self.block(self.client.create_table(table, indexes))
    }

    /// Blocking [`Client::drop_table`].
    ///
    /// # Errors
    ///
    /// See [`Client::drop_table`]; also [`OperationError::TimedOut`].
    pub fn drop_table(&self, table: &str) -> Result<(), OperationError> {
        self.block(self.client.drop_table(table))
    }

    /// Blocking [`Client::save`].
    ///
    /// # Errors
    ///
    /// See [`Client::save`]; also [`OperationError::TimedOut`].
    pub fn save(&self, table: &str, content: Content) -> Result<Content, OperationError> {
        self.block(self.client.save(table, content))
    }

    /// Blocking [`Client::get`].
    ///
    /// # Errors
    ///
    /// See [`Client::get`]; also [`OperationError::TimedOut`].
    pub fn get(&self, table: &str, filters: Filters) -> Result<Vec<Content>, OperationError> {
        self.block(self.client.get(table, filters))
    }

    /// Blocking [`Client::delete`].
    ///
    /// # Errors
    ///
    /// See [`Client::delete`]; also [`OperationError::TimedOut`].
    pub fn delete(&self, table: &str, id: &str) -> Result<(), OperationError> {
        self.block(self.client.delete(table, id))
    }
}
