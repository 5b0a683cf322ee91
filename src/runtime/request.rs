//! Request and response shapes of the repository API.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{core::revision::Revision, error::RecordsError, record::ClientRecord};

/// Options of a records write.
///
/// `expectedUpdatedAt` has three states: key absent (rejected), `null` (the
/// caller saw no prior state) and a revision value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOptions {
    /// Raw `expectedUpdatedAt` as received; `Some(Value::Null)` is an explicit null.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub expected_updated_at: Option<Value>,
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl SaveOptions {
    /// No `expectedUpdatedAt` key at all.
    pub fn unspecified() -> Self {
        Self::default()
    }

    /// Explicit `null`: the caller expects no prior state.
    pub fn no_prior_state() -> Self {
        Self {
            expected_updated_at: Some(Value::Null),
        }
    }

    /// Expects `revision` to be current.
    pub fn expecting(revision: Revision) -> Self {
        Self {
            expected_updated_at: Some(Value::String(revision.to_iso())),
        }
    }

    /// Passes a raw client value through unvalidated.
    pub fn expecting_raw(value: Value) -> Self {
        Self {
            expected_updated_at: Some(value),
        }
    }

    /// Validates and normalizes the expected revision.
    pub fn expected_revision(&self) -> Result<Option<Revision>, RecordsError> {
        let raw = self
            .expected_updated_at
            .as_ref()
            .ok_or(RecordsError::PreconditionRequired)?;
        Revision::from_json(raw).map_err(|_| RecordsError::InvalidExpectedUpdatedAt)
    }
}

impl From<Option<Revision>> for SaveOptions {
    fn from(value: Option<Revision>) -> Self {
        match value {
            Some(revision) => Self::expecting(revision),
            None => Self::no_prior_state(),
        }
    }
}

/// Identity of the reader, carried into audit logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadContext {
    /// Requester label, e.g. a user id.
    pub requester: Option<String>,
}

impl ReadContext {
    /// Context with no requester.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Context for a named requester.
    pub fn for_requester(requester: impl Into<String>) -> Self {
        Self {
            requester: Some(requester.into()),
        }
    }
}

/// Records as served to a reader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecords {
    /// Record set.
    pub records: Vec<ClientRecord>,
    /// Current revision; `None` before the first write.
    pub updated_at: Option<Revision>,
}

/// Result of a patch write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchResult {
    /// Revision after the patch; unchanged for an empty patch.
    pub updated_at: Option<Revision>,
}
