//! Record types for the table store.
//!
//! Defines [`RecordId`], the system-generated identifier, and [`Record`],
//! the unit of storage in a [`Table`](crate::Table).

use std::borrow::Borrow;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Content, Value};

/// Length of the textual form of a [`RecordId`] (hyphenated UUID).
pub const RECORD_ID_LEN: usize = 36;

/// Content field that always mirrors the record's identifier.
pub const ID_FIELD: &str = "id";

/// Content field holding the creation time, preserved across updates.
pub const CREATED_AT_FIELD: &str = "created_at";

/// Returns the current wall-clock time as milliseconds since the Unix epoch.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// System-assigned, universally unique record identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Mints a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    /// Returns `true` if `candidate` has the shape of an identifier.
    ///
    /// Only the length is checked: callers use this to decide whether a
    /// save carries an id (update) or not (insert).
    #[must_use]
    pub fn looks_like_id(candidate: &str) -> bool {
        candidate.len() == RECORD_ID_LEN
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for RecordId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Bookkeeping tracked for every record. Not part of the record content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMetadata {
    /// Incremented on every update; starts at 1.
    pub version: u32,
    /// Wall-clock time (millis since epoch) when the record was inserted.
    pub created_at: i64,
    /// Wall-clock time of the last write.
    pub updated_at: i64,
}

impl RecordMetadata {
    #[must_use]
    pub fn new(now: i64) -> Self {
        Self {
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Records a write: bumps `version` and `updated_at`.
    #[must_use]
    pub fn updated(self, now: i64) -> Self {
        Self {
            version: self.version.saturating_add(1),
            updated_at: now,
            ..self
        }
    }
}

/// A stored document: identifier, content and metadata.
///
/// After any successful write `content["id"]` equals `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RecordId,
    pub content: Content,
    pub metadata: RecordMetadata,
}

impl Record {
    /// Builds the record for a first write of `content` under a new id.
    ///
    /// Stamps the `id` field, and `created_at` unless the caller supplied one.
    #[must_use]
    pub(crate) fn inserted(id: RecordId, mut content: Content, now: i64) -> Self {
        content.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        content
            .entry(CREATED_AT_FIELD.to_string())
            .or_insert(Value::Int(now));
        Self {
            id,
            content,
            metadata: RecordMetadata::new(now),
        }
    }

    /// Builds the update of `self` with `content`.
    ///
    /// Fields in `content` overwrite stored ones; stored fields it leaves
    /// out are kept. The identifier and the stored `created_at` survive.
    #[must_use]
    pub(crate) fn replaced(&self, content: Content, now: i64) -> Self {
        let mut merged = self.content.clone();
        merged.extend(content);
        merged.insert(ID_FIELD.to_string(), Value::String(self.id.to_string()));
        match self.content.get(CREATED_AT_FIELD) {
            Some(created) => {
                merged.insert(CREATED_AT_FIELD.to_string(), created.clone());
            }
            None => {
                merged.remove(CREATED_AT_FIELD);
            }
        }
        Self {
            id: self.id.clone(),
            content: merged,
            metadata: self.metadata.updated(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content;

    #[test]
    fn generated_ids_have_fixed_length_and_differ() {
        let a = RecordId::generate();
        let b = RecordId::generate();
        assert_eq!(a.as_str().len(), RECORD_ID_LEN);
        assert!(RecordId::looks_like_id(a.as_str()));
        assert_ne!(a, b);
    }

    #[test]
    fn looks_like_id_checks_length_only() {
        assert!(!RecordId::looks_like_id("short"));
        assert!(RecordId::looks_like_id(&"x".repeat(RECORD_ID_LEN)));
    }

    #[test]
    fn inserted_stamps_system_fields() {
        let id = RecordId::generate();
        let record = Record::inserted(id.clone(), content! { "model" => "X" }, 42);
        assert_eq!(record.content[ID_FIELD], Value::String(id.to_string()));
        assert_eq!(record.content[CREATED_AT_FIELD], Value::Int(42));
        assert_eq!(record.metadata.version, 1);
    }

    #[test]
    fn inserted_keeps_caller_created_at() {
        let record = Record::inserted(
            RecordId::generate(),
            content! { "created_at" => "2024-01-01" },
            42,
        );
        assert_eq!(record.content[CREATED_AT_FIELD], Value::from("2024-01-01"));
    }

    #[test]
    fn replaced_preserves_identity_and_creation_time() {
        let original = Record::inserted(RecordId::generate(), content! { "model" => "X" }, 10);
        let updated = original.replaced(content! { "model" => "Z", "created_at" => 99_i64 }, 20);

        assert_eq!(updated.id, original.id);
        assert_eq!(updated.content[CREATED_AT_FIELD], Value::Int(10));
        assert_eq!(updated.content["model"], Value::from("Z"));
        assert_eq!(updated.metadata.version, 2);
        assert_eq!(updated.metadata.created_at, 10);
        assert_eq!(updated.metadata.updated_at, 20);
    }

    #[test]
    fn replaced_keeps_fields_left_out() {
        let original = Record::inserted(
            RecordId::generate(),
            content! { "reg_no" => "KA-01-1234", "model" => "X" },
            10,
        );
        let updated = original.replaced(content! { "model" => "Z" }, 20);

        assert_eq!(updated.content["reg_no"], Value::from("KA-01-1234"));
        assert_eq!(updated.content["model"], Value::from("Z"));
    }
}
