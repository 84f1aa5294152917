/// Failures raised by the table store.
///
/// Every variant is a normal, caller-recoverable outcome except
/// [`StoreError::Inconsistent`], which means an index referenced a record
/// that does not exist and should be unreachable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Table {table} does not exist")]
    TableNotFound { table: String },
    #[error("Entity with id : {id} does not exist")]
    EntityNotFound { id: String },
    #[error("Entity: {table} information overlap with other entities")]
    DuplicateEntity {
        table: String,
        /// Field of the unique index that rejected the write.
        field: String,
    },
    #[error("an index of table {table} references missing record {id}")]
    Inconsistent { table: String, id: String },
}
