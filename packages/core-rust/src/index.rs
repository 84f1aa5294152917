//! Secondary index over one record field.

use std::collections::BTreeSet;

use ahash::AHashMap;

use crate::record::RecordId;
use crate::types::{IndexKey, Value};

/// Maps the values of one field to the ids of the records holding them.
///
/// A unique index binds at most one id per value. Lookups of unbound values
/// return an empty set rather than an error.
#[derive(Debug, Clone)]
pub struct Index {
    field: String,
    unique: bool,
    entries: AHashMap<IndexKey, BTreeSet<RecordId>>,
}

impl Index {
    #[must_use]
    pub fn new(field: impl Into<String>, unique: bool) -> Self {
        Self {
            field: field.into(),
            unique,
            entries: AHashMap::new(),
        }
    }

    /// Name of the indexed field.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Returns `true` if binding `value` to `candidate` would not break
    /// uniqueness.
    ///
    /// Always `true` for non-unique indexes. For unique ones, the value must
    /// be unbound or bound only to `candidate` itself (an in-place update).
    #[must_use]
    pub fn admits(&self, value: &Value, candidate: &RecordId) -> bool {
        if !self.unique {
            return true;
        }
        match self.entries.get(&value.index_key()) {
            None => true,
            Some(ids) => ids.iter().all(|id| id == candidate),
        }
    }

    pub fn bind(&mut self, value: &Value, id: &RecordId) {
        self.entries
            .entry(value.index_key())
            .or_default()
            .insert(id.clone());
    }

    /// Removes `id` from the entry for `value`, dropping the entry once empty.
    pub fn unbind(&mut self, value: &Value, id: &RecordId) {
        let key = value.index_key();
        if let Some(ids) = self.entries.get_mut(&key) {
            ids.remove(id);
            if ids.is_empty() {
                self.entries.remove(&key);
            }
        }
    }

    /// Ids bound to `value`; empty if none.
    #[must_use]
    pub fn lookup(&self, value: &Value) -> BTreeSet<RecordId> {
        self.entries
            .get(&value.index_key())
            .cloned()
            .unwrap_or_default()
    }

    /// Returns `true` if `id` is bound to `value`.
    #[must_use]
    pub fn contains(&self, value: &Value, id: &RecordId) -> bool {
        self.entries
            .get(&value.index_key())
            .is_some_and(|ids| ids.contains(id))
    }

    /// Bound keys with their ids.
    pub fn entries(&self) -> impl Iterator<Item = (&IndexKey, &BTreeSet<RecordId>)> {
        self.entries.iter()
    }

    /// Number of distinct bound values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
