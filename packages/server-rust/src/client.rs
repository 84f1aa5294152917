//! Async submission handle for a worker pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tabula_core::{Content, Filters, IndexSpec};
use tokio::sync::mpsc;
use tracing::debug;

use crate::operation::{Envelope, Inbound, Operation, OperationError, Outcome, Payload};

/// Cloneable handle that submits envelopes to a pool and awaits the result.
///
/// Every call resolves: if the pool shuts down before answering, the
/// result is [`OperationError::Cancelled`].
#[derive(Debug, Clone)]
pub struct Client {
    inbound: mpsc::Sender<Inbound>,
    next_call_id: Arc<AtomicU64>,
}

impl Client {
    pub(crate) fn new(inbound: mpsc::Sender<Inbound>, next_call_id: Arc<AtomicU64>) -> Self {
        Self {
            inbound,
            next_call_id,
        }
    }

    pub(crate) fn allocate_call_id(&self) -> u64 {
        self.next_call_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Enqueues `operation` on `table` and waits for its outcome.
    ///
    /// Waits for room while the inbound channel is full.
    pub async fn submit(&self, table: &str, operation: Operation) -> Outcome {
        let call_id = self.allocate_call_id();
        let op = operation.name();
        let (envelope, result) = Envelope::new(call_id, table, operation);

        debug!(call_id, table, op, "submitting request");
        if self.inbound.send(Inbound::Request(envelope)).await.is_err() {
            return Err(OperationError::Cancelled);
        }
        result.await.unwrap_or(Err(OperationError::Cancelled))
    }

    /// Registers `table` with `indexes`. Later registrations are ignored.
    ///
    /// # Errors
    ///
    /// [`OperationError::Cancelled`] if the pool is gone.
    pub async fn create_table(&self, table: &str, indexes: IndexSpec) -> Result<(), OperationError> {
        let payload = self.submit(table, Operation::CreateTable { indexes }).await?;
        expect_none(payload, "create_table")
    }

    /// Destroys `table`.
    ///
    /// # Errors
    ///
    /// [`OperationError::TableNotFound`] if there is no such table.
    pub async fn drop_table(&self, table: &str) -> Result<(), OperationError> {
        let payload = self.submit(table, Operation::DropTable).await?;
        expect_none(payload, "drop_table")
    }

    /// Inserts or updates a record and returns its full content.
    ///
    /// # Errors
    ///
    /// [`OperationError::TableNotFound`], [`OperationError::EntityNotFound`]
    /// for an update of an unknown id, [`OperationError::DuplicateEntity`]
    /// on a unique index conflict.
    pub async fn save(&self, table: &str, content: Content) -> Result<Content, OperationError> {
        match self.submit(table, Operation::Save { content }).await? {
            Payload::Record(content) => Ok(content),
            _ => Err(OperationError::UnexpectedPayload { op: "save" }),
        }
    }

    /// Returns the records matching any of `filters` (all if empty).
    ///
    /// # Errors
    ///
    /// [`OperationError::TableNotFound`].
    pub async fn get(&self, table: &str, filters: Filters) -> Result<Vec<Content>, OperationError> {
        match self.submit(table, Operation::Get { filters }).await? {
            Payload::Records(records) => Ok(records),
            _ => Err(OperationError::UnexpectedPayload { op: "get" }),
        }
    }

    /// Deletes record `id`.
    ///
    /// # Errors
    ///
    /// [`OperationError::TableNotFound`] or [`OperationError::EntityNotFound`].
    pub async fn delete(&self, table: &str, id: &str) -> Result<(), OperationError> {
        let payload = self
            .submit(table, Operation::Delete { id: id.to_string() })
            .await?;
        expect_none(payload, "delete")
    }
}

fn expect_none(payload: Payload, op: &'static str) -> Result<(), OperationError> {
    match payload {
        Payload::None => Ok(()),
        _ => Err(OperationError::UnexpectedPayload { op }),
    }
}
