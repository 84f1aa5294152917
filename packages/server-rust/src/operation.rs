//! Request envelope, operation variants and their outcomes.
//!
//! An [`Envelope`] pairs an [`Operation`] on one table with a single-use
//! [`Responder`]. The issuing side awaits the matching receiver; the worker
//! that executes the operation resolves the responder exactly once.

use std::fmt;

use serde_json::json;
use tabula_core::{Content, Filters, IndexSpec, StoreError};
use tokio::sync::oneshot;
use tracing::debug;

/// Numeric codes of the operations understood by the pool.
pub mod op_codes {
    pub const CREATE_TABLE: u8 = 1;
    pub const DROP_TABLE: u8 = 2;
    pub const GET: u8 = 3;
    pub const SAVE: u8 = 4;
    pub const DELETE: u8 = 5;
}

/// Operation against one table.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Register the table with the given indexes. Idempotent.
    CreateTable { indexes: IndexSpec },
    /// Destroy the table and all its records.
    DropTable,
    /// Look records up by OR-ed equality filters; empty filters return all.
    Get { filters: Filters },
    /// Insert, or update when `content` carries an existing record id.
    Save { content: Content },
    /// Delete one record by id.
    Delete { id: String },
    /// An operation code this pool does not implement.
    Unknown { code: u8 },
}

impl Operation {
    #[must_use]
    pub fn code(&self) -> u8 {
        match self {
            Self::CreateTable { .. } => op_codes::CREATE_TABLE,
            Self::DropTable => op_codes::DROP_TABLE,
            Self::Get { .. } => op_codes::GET,
            Self::Save { .. } => op_codes::SAVE,
            Self::Delete { .. } => op_codes::DELETE,
            Self::Unknown { code } => *code,
        }
    }

    /// Short name used in logs and spans.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateTable { .. } => "create_table",
            Self::DropTable => "drop_table",
            Self::Get { .. } => "get",
            Self::Save { .. } => "save",
            Self::Delete { .. } => "delete",
            Self::Unknown { .. } => "unknown",
        }
    }
}

/// Successful result of an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Operations without a result body (create, drop, delete).
    None,
    /// Full content of the record written by a save.
    Record(Content),
    /// Contents of the records matched by a get.
    Records(Vec<Content>),
}

/// Errors reported to the caller through the result channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    #[error("Table {table} does not exist")]
    TableNotFound { table: String },
    #[error("Entity with id : {id} does not exist")]
    EntityNotFound { id: String },
    #[error("Entity: {table} information overlap with other entities")]
    DuplicateEntity { table: String, field: String },
    #[error("DB Operation: {code} is not supported")]
    UnsupportedOperation { code: u8 },
    #[error("an index of table {table} references missing record {id}")]
    Inconsistent { table: String, id: String },
    #[error("request cancelled: worker pool shut down")]
    Cancelled,
    #[error("request timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
    #[error("{entity} failed validation: {reason}")]
    Validation { entity: String, reason: String },
    /// Client-side internal error: the pool answered with a payload of the
    /// wrong shape for the operation. Never produced by a worker.
    #[error("{op} returned an unexpected payload")]
    UnexpectedPayload { op: &'static str },
}

impl OperationError {
    /// Renders the error as a `{"_error": "<message>"}` JSON descriptor.
    #[must_use]
    pub fn descriptor(&self) -> String {
        json!({ "_error": self.to_string() }).to_string()
    }
}

impl From<StoreError> for OperationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TableNotFound { table } => Self::TableNotFound { table },
            StoreError::EntityNotFound { id } => Self::EntityNotFound { id },
            StoreError::DuplicateEntity { table, field } => Self::DuplicateEntity { table, field },
            StoreError::Inconsistent { table, id } => Self::Inconsistent { table, id },
        }
    }
}

/// `Ok(payload)` on success, `Err(descriptor)` on failure.
pub type Outcome = Result<Payload, OperationError>;

/// Single-assignment result handle held by the processing side.
///
/// [`Responder::resolve`] consumes the handle, so an envelope can only be
/// resolved once. Dropping it unresolved is observed by the caller as
/// [`OperationError::Cancelled`].
#[derive(Debug)]
pub struct Responder {
    call_id: u64,
    tx: oneshot::Sender<Outcome>,
}

impl Responder {
    pub fn resolve(self, outcome: Outcome) {
        if self.tx.send(outcome).is_err() {
            debug!(call_id = self.call_id, "caller went away before the result arrived");
        }
    }

    /// Returns `true` if nobody is waiting for the result any more.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A request plus its result handle. Consumed exactly once by one worker.
pub struct Envelope {
    pub call_id: u64,
    pub table: String,
    pub operation: Operation,
    pub responder: Responder,
}

impl Envelope {
    /// Creates an envelope and the receiver its result will arrive on.
    #[must_use]
    pub fn new(
        call_id: u64,
        table: impl Into<String>,
        operation: Operation,
    ) -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let envelope = Self {
            call_id,
            table: table.into(),
            operation,
            responder: Responder { call_id, tx },
        };
        (envelope, rx)
    }

    /// Resolves the envelope without executing it.
    pub fn reject(self, err: OperationError) {
        self.responder.resolve(Err(err));
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("call_id", &self.call_id)
            .field("table", &self.table)
            .field("operation", &self.operation.name())
            .finish_non_exhaustive()
    }
}

/// Messages accepted on the pool's inbound channel.
#[derive(Debug)]
pub enum Inbound {
    /// Startup handshake: number of workers to start. Must come first.
    Configure { workers: usize },
    /// A request to execute.
    Request(Envelope),
}
