//! Tabula core: in-memory tables with secondary indexes.
//!
//! A [`Store`] owns named [`Table`]s; each table owns its [`Record`]s and the
//! [`Index`]es over them. Nothing here is synchronized: the server crate
//! serializes access behind a single store lock.

pub mod error;
pub mod index;
pub mod record;
pub mod store;
pub mod table;
pub mod types;

pub use error::StoreError;
pub use index::Index;
pub use record::{Record, RecordId, RecordMetadata, CREATED_AT_FIELD, ID_FIELD, RECORD_ID_LEN};
pub use store::Store;
pub use table::Table;
pub use types::{Content, Filters, IndexKey, IndexSpec, Value};
