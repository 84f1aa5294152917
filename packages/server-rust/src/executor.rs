//! Executes one operation against the shared store.
//!
//! Workers run in parallel on a multi-threaded runtime, so the store sits
//! behind a single `RwLock`. Mutations hold the write lock for the whole
//! operation and reads hold the read lock, so no reader ever observes a
//! record write without its index updates. The lock is never held across
//! an `.await`.

use std::sync::Arc;

use parking_lot::RwLock;
use tabula_core::{Content, Filters, IndexSpec, Store, StoreError};
use tracing::error;

use crate::operation::{Operation, OperationError, Outcome, Payload};

/// Store shared by every worker of a pool.
pub type SharedStore = Arc<RwLock<Store>>;

/// Creates an empty shared store called `name`.
#[must_use]
pub fn shared_store(name: &str) -> SharedStore {
    Arc::new(RwLock::new(Store::new(name)))
}

/// Dispatches `operation` on `table` to the matching store method.
pub fn execute(store: &RwLock<Store>, table: &str, operation: Operation) -> Outcome {
    match operation {
        Operation::CreateTable { indexes } => Ok(create_table(store, table, &indexes)),
        Operation::DropTable => drop_table(store, table),
        Operation::Get { filters } => get(store, table, &filters),
        Operation::Save { content } => save(store, table, content),
        Operation::Delete { id } => delete(store, table, &id),
        Operation::Unknown { code } => Err(OperationError::UnsupportedOperation { code }),
    }
}

fn create_table(store: &RwLock<Store>, table: &str, indexes: &IndexSpec) -> Payload {
    store.write().get_or_register_table(table, indexes);
    Payload::None
}

fn drop_table(store: &RwLock<Store>, table: &str) -> Outcome {
    if store.write().drop_table(table) {
        Ok(Payload::None)
    } else {
        Err(OperationError::TableNotFound {
            table: table.to_string(),
        })
    }
}

fn get(store: &RwLock<Store>, table: &str, filters: &Filters) -> Outcome {
    let records = store.read().find(table, filters).map_err(log_store_error)?;
    Ok(Payload::Records(
        records.into_iter().map(|r| r.content).collect(),
    ))
}

fn save(store: &RwLock<Store>, table: &str, content: Content) -> Outcome {
    let record = store.write().save(table, content).map_err(log_store_error)?;
    Ok(Payload::Record(record.content))
}

fn delete(store: &RwLock<Store>, table: &str, id: &str) -> Outcome {
    store.write().delete(table, id).map_err(log_store_error)?;
    Ok(Payload::None)
}

fn log_store_error(err: StoreError) -> OperationError {
    if let StoreError::Inconsistent { table, id } = &err {
        error!(table, id, "store invariant violated");
    }
    err.into()
}
