//! A named set of records plus the secondary indexes over them.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, error};

use crate::error::StoreError;
use crate::index::Index;
use crate::record::{now_millis, Record, RecordId, ID_FIELD};
use crate::types::{Content, Filters};

/// Records of one table and the indexes kept consistent with them.
///
/// Every index whose field is present in a record's content binds that
/// record's id under the field value. [`Table::upsert`] and
/// [`Table::delete`] are the only mutation paths and both keep that
/// invariant: a rejected write leaves records and indexes untouched.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    records: BTreeMap<RecordId, Record>,
    indexes: BTreeMap<String, Index>,
}

impl Table {
    /// Creates an empty table with the implicit unique `id` index.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let mut table = Self {
            name: name.into(),
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
        };
        table.register_index(ID_FIELD, true);
        table
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers an index on `field`. No-op if one already exists.
    ///
    /// Records already stored are indexed immediately.
    pub fn register_index(&mut self, field: &str, unique: bool) {
        if self.indexes.contains_key(field) {
            return;
        }
        let mut index = Index::new(field, unique);
        for record in self.records.values() {
            if let Some(value) = record.content.get(field) {
                index.bind(value, &record.id);
            }
        }
        debug!(table = %self.name, field, unique, "registered index");
        self.indexes.insert(field.to_string(), index);
    }

    /// Removes the index on `field`. The `id` index cannot be removed.
    pub fn remove_index(&mut self, field: &str) -> bool {
        if field == ID_FIELD {
            return false;
        }
        self.indexes.remove(field).is_some()
    }

    #[must_use]
    pub fn index(&self, field: &str) -> Option<&Index> {
        self.indexes.get(field)
    }

    pub fn index_names(&self) -> impl Iterator<Item = &str> {
        self.indexes.keys().map(String::as_str)
    }

    /// Writes `content` as a new record, or as an update of `existing`.
    ///
    /// Every index whose field appears in the new content is checked before
    /// anything is written. On a uniqueness conflict the call fails with
    /// [`StoreError::DuplicateEntity`] and no state changes.
    ///
    /// # Errors
    ///
    /// [`StoreError::EntityNotFound`] if `existing` names no stored record,
    /// [`StoreError::DuplicateEntity`] on a unique index conflict.
    pub fn upsert(
        &mut self,
        content: Content,
        existing: Option<&RecordId>,
    ) -> Result<Record, StoreError> {
        let now = now_millis();
        let previous = match existing {
            Some(id) => Some(self.records.get(id).ok_or_else(|| {
                StoreError::EntityNotFound { id: id.to_string() }
            })?),
            None => None,
        };
        let record = match previous {
            Some(prev) => prev.replaced(content, now),
            None => Record::inserted(RecordId::generate(), content, now),
        };

        for index in self.indexes.values() {
            if let Some(value) = record.content.get(index.field()) {
                if !index.admits(value, &record.id) {
                    debug!(table = %self.name, field = index.field(), %value, "unique index conflict");
                    return Err(StoreError::DuplicateEntity {
                        table: self.name.clone(),
                        field: index.field().to_string(),
                    });
                }
            }
        }

        if let Some(prev) = previous {
            for index in self.indexes.values_mut() {
                if let Some(stale) = prev.content.get(index.field()) {
                    index.unbind(stale, &record.id);
                }
            }
        }
        for index in self.indexes.values_mut() {
            if let Some(value) = record.content.get(index.field()) {
                index.bind(value, &record.id);
            }
        }
        self.records.insert(record.id.clone(), record.clone());

        debug!(table = %self.name, id = %record.id, version = record.metadata.version, "record written");
        Ok(record)
    }

    /// Removes the record and all of its index bindings.
    ///
    /// Returns `false` if there is no such record.
    pub fn delete(&mut self, id: &str) -> bool {
        let Some(record) = self.records.remove(id) else {
            return false;
        };
        for index in self.indexes.values_mut() {
            if let Some(value) = record.content.get(index.field()) {
                index.unbind(value, &record.id);
            }
        }
        debug!(table = %self.name, id, "record deleted");
        true
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    /// All records, ordered by id.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Saves `content`: an update if it carries an id-shaped `id` field,
    /// an insert otherwise.
    ///
    /// # Errors
    ///
    /// [`StoreError::EntityNotFound`] for an update of an unknown id,
    /// [`StoreError::DuplicateEntity`] on a unique index conflict.
    pub fn save(&mut self, content: Content) -> Result<Record, StoreError> {
        let existing = content
            .get(ID_FIELD)
            .and_then(|v| v.as_str())
            .filter(|id| RecordId::looks_like_id(id))
            .map(RecordId::from);
        self.upsert(content, existing.as_ref())
    }

    /// Returns the records matching any of `filters`.
    ///
    /// Filters are OR-ed: a record is returned if it matches at least one
    /// `(field, value)` pair. Pairs on fields without an index are skipped.
    /// Empty filters return every record. Results are ordered by id.
    ///
    /// # Errors
    ///
    /// [`StoreError::Inconsistent`] if an index references a missing record.
    pub fn find(&self, filters: &Filters) -> Result<Vec<Record>, StoreError> {
        if filters.is_empty() {
            return Ok(self.records.values().cloned().collect());
        }

        let mut ids = BTreeSet::new();
        for (field, value) in filters {
            match self.indexes.get(field) {
                Some(index) => ids.extend(index.lookup(value)),
                None => debug!(table = %self.name, field, "no index for filter field, skipping"),
            }
        }

        ids.into_iter()
            .map(|id| {
                self.records.get(&id).cloned().ok_or_else(|| {
                    error!(table = %self.name, %id, "index references missing record");
                    StoreError::Inconsistent {
                        table: self.name.clone(),
                        id: id.to_string(),
                    }
                })
            })
            .collect()
    }

    /// Checks that indexes and records agree in both directions.
    ///
    /// # Errors
    ///
    /// [`StoreError::Inconsistent`] naming the first offending record id.
    pub fn verify_indexes(&self) -> Result<(), StoreError> {
        let inconsistent = |id: &RecordId| StoreError::Inconsistent {
            table: self.name.clone(),
            id: id.to_string(),
        };
        for record in self.records.values() {
            for index in self.indexes.values() {
                if let Some(value) = record.content.get(index.field()) {
                    if !index.contains(value, &record.id) {
                        return Err(inconsistent(&record.id));
                    }
                }
            }
        }
        for index in self.indexes.values() {
            for (key, ids) in index.entries() {
                for id in ids {
                    let bound_here = self
                        .records
                        .get(id)
                        .and_then(|r| r.content.get(index.field()))
                        .is_some_and(|v| v.index_key() == *key);
                    if !bound_here {
                        return Err(inconsistent(id));
                    }
                }
            }
        }
        Ok(())
    }
}
