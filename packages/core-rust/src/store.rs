//! Named registry of tables.

use std::collections::BTreeMap;

use tracing::info;

use crate::error::StoreError;
use crate::record::Record;
use crate::table::Table;
use crate::types::{Content, Filters, IndexSpec};

/// A named collection of [`Table`]s, created on first registration.
///
/// Tables are only destroyed by an explicit [`Store::drop_table`].
#[derive(Debug, Clone)]
pub struct Store {
    name: String,
    tables: BTreeMap<String, Table>,
}

impl Store {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the table called `name`, creating it if needed.
    ///
    /// Registration is first-write-wins: `indexes` is applied only when the
    /// table is created and ignored on later calls.
    pub fn get_or_register_table(&mut self, name: &str, indexes: &IndexSpec) -> &mut Table {
        self.tables.entry(name.to_string()).or_insert_with(|| {
            let mut table = Table::new(name);
            for (field, unique) in indexes {
                table.register_index(field, *unique);
            }
            info!(store = %self.name, table = name, indexes = indexes.len(), "table registered");
            table
        })
    }

    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    /// Removes a table with all its records. Returns `false` if absent.
    pub fn drop_table(&mut self, name: &str) -> bool {
        let dropped = self.tables.remove(name).is_some();
        if dropped {
            info!(store = %self.name, table = name, "table dropped");
        }
        dropped
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Saves `content` into `table`. See [`Table::save`].
    ///
    /// # Errors
    ///
    /// [`StoreError::TableNotFound`] plus any error of [`Table::save`].
    pub fn save(&mut self, table: &str, content: Content) -> Result<Record, StoreError> {
        self.table_mut(table)
            .ok_or_else(|| table_not_found(table))?
            .save(content)
    }

    /// Looks records up in `table`. See [`Table::find`].
    ///
    /// # Errors
    ///
    /// [`StoreError::TableNotFound`] plus any error of [`Table::find`].
    pub fn find(&self, table: &str, filters: &Filters) -> Result<Vec<Record>, StoreError> {
        self.table(table)
            .ok_or_else(|| table_not_found(table))?
            .find(filters)
    }

    /// Deletes record `id` from `table`.
    ///
    /// # Errors
    ///
    /// [`StoreError::TableNotFound`], or [`StoreError::EntityNotFound`] if
    /// the record does not exist.
    pub fn delete(&mut self, table: &str, id: &str) -> Result<(), StoreError> {
        let deleted = self
            .table_mut(table)
            .ok_or_else(|| table_not_found(table))?
            .delete(id);
        if deleted {
            Ok(())
        } else {
            Err(StoreError::EntityNotFound { id: id.to_string() })
        }
    }
}

fn table_not_found(table: &str) -> StoreError {
    StoreError::TableNotFound {
        table: table.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content;
    use crate::types::Value;

    fn spec(pairs: &[(&str, bool)]) -> IndexSpec {
        pairs.iter().map(|(k, u)| ((*k).to_string(), *u)).collect()
    }

    #[test]
    fn registration_is_first_write_wins() {
        let mut store = Store::new("db");
        store.get_or_register_table("cars", &spec(&[("reg_no", true)]));
        store.get_or_register_table("cars", &spec(&[("reg_no", false), ("model", false)]));

        let table = store.table("cars").unwrap();
        assert!(table.index("reg_no").unwrap().is_unique());
        assert!(table.index("model").is_none());
    }

    #[test]
    fn spec_cannot_make_id_non_unique() {
        let mut store = Store::new("db");
        let table = store.get_or_register_table("t", &spec(&[("id", false)]));
        assert!(table.index("id").unwrap().is_unique());
    }

    #[test]
    fn operations_on_missing_table_fail() {
        let mut store = Store::new("db");
        let missing = StoreError::TableNotFound {
            table: "nope".to_string(),
        };
        assert_eq!(store.save("nope", content! {}).unwrap_err(), missing);
        assert_eq!(store.find("nope", &Filters::new()).unwrap_err(), missing);
        assert_eq!(store.delete("nope", "x").unwrap_err(), missing);
        assert!(store.table("nope").is_none());
    }

    #[test]
    fn save_find_delete_through_store() {
        let mut store = Store::new("db");
        store.get_or_register_table("users", &spec(&[("email", true)]));

        let record = store
            .save("users", content! { "email" => "a@example.com" })
            .unwrap();
        let mut filters = Filters::new();
        filters.insert("email".to_string(), Value::from("a@example.com"));
        assert_eq!(store.find("users", &filters).unwrap(), vec![record.clone()]);

        store.delete("users", record.id.as_str()).unwrap();
        assert_eq!(
            store.delete("users", record.id.as_str()).unwrap_err(),
            StoreError::EntityNotFound {
                id: record.id.to_string()
            }
        );
    }

    #[test]
    fn drop_table_is_explicit() {
        let mut store = Store::new("db");
        store.get_or_register_table("a", &IndexSpec::new());
        store.get_or_register_table("b", &IndexSpec::new());
        assert_eq!(store.table_names().collect::<Vec<_>>(), vec!["a", "b"]);

        assert!(store.drop_table("a"));
        assert!(!store.drop_table("a"));
        assert_eq!(store.table_names().collect::<Vec<_>>(), vec!["b"]);
    }
}
