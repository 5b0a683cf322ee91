//! Patch operation model.

use serde::{Deserialize, Serialize};

use crate::{record::ClientRecord, types::RecordId};

/// One patch step applied against a records array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PatchOperation {
    /// Insert or replace the record with `id`.
    Upsert {
        /// Target record id.
        id: RecordId,
        /// Replacement document.
        record: ClientRecord,
    },
    /// Remove the record with `id`, if present.
    Delete {
        /// Target record id.
        id: RecordId,
    },
}

impl PatchOperation {
    /// Convenience constructor for an upsert of `record` under its own id.
    pub fn upsert(record: ClientRecord) -> Self {
        Self::Upsert {
            id: record.id.clone(),
            record,
        }
    }

    /// Convenience constructor for a delete.
    pub fn delete(id: impl Into<RecordId>) -> Self {
        Self::Delete { id: id.into() }
    }
}
