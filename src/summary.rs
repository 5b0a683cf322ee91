//! Sync and audit result objects plus their log/metric payload builders.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    core::revision::Revision,
    types::{RecordId, StateRowId, WriteMode},
};

/// Outcome of one legacy → v2 snapshot synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DualWriteSummary {
    /// Write that triggered the sync.
    pub mode: WriteMode,
    /// Legacy singleton row the snapshot came from.
    pub source_state_row_id: StateRowId,
    /// Legacy revision stamped onto written rows.
    pub source_state_updated_at: Option<Revision>,
    /// Distinct ids in the incoming snapshot.
    pub expected_count: u64,
    /// v2 rows counted for the source after the sync.
    pub actual_count: u64,
    /// Rows inserted or whose content changed.
    pub upserted: u64,
    /// Rows whose content already matched.
    pub unchanged: u64,
    /// Rows removed because their id left the snapshot.
    pub deleted: u64,
    /// `expected_count == actual_count`.
    pub in_sync: bool,
}

impl DualWriteSummary {
    /// Structured payload for logs and alerts.
    pub fn to_payload(&self) -> Value {
        json!({
            "event": if self.in_sync { "records_dual_write_synced" } else { "records_dual_write_desync" },
            "summary": self,
        })
    }
}

/// Outcome of one dual-read reconciliation audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DualReadCompareSummary {
    /// Legacy singleton row compared.
    pub source_state_row_id: StateRowId,
    /// Identity of the reader that triggered the audit.
    pub requester: Option<String>,
    /// Records in the legacy snapshot (distinct ids).
    pub legacy_count: u64,
    /// v2 rows for the source.
    pub v2_count: u64,
    /// Checksum over legacy `(id, hash)` pairs.
    pub legacy_checksum: String,
    /// Checksum over v2 `(id, stored hash)` pairs.
    pub v2_checksum: String,
    /// Ids present in legacy but not v2 (sampled).
    pub missing_in_v2: Vec<RecordId>,
    /// Full count behind `missing_in_v2`.
    pub missing_in_v2_count: u64,
    /// Ids present in v2 but not legacy (sampled).
    pub extra_in_v2: Vec<RecordId>,
    /// Full count behind `extra_in_v2`.
    pub extra_in_v2_count: u64,
    /// Ids whose legacy hash differs from the v2 stored hash (sampled).
    pub hash_mismatch: Vec<RecordId>,
    /// Full count behind `hash_mismatch`.
    pub hash_mismatch_count: u64,
    /// v2 rows whose stored hash disagrees with their own content.
    pub stored_hash_mismatch_count: u64,
    /// Ids behind `stored_hash_mismatch_count` (sampled).
    pub stored_hash_mismatch: Vec<RecordId>,
    /// True when both sides are identical and v2 is self-consistent.
    pub in_sync: bool,
}

impl DualReadCompareSummary {
    /// Structured payload for logs and metrics.
    pub fn to_payload(&self) -> Value {
        json!({
            "event": if self.in_sync { "records_dual_read_compare_success" } else { "records_dual_read_compare_mismatch" },
            "summary": self,
        })
    }
}

/// Result of a best-effort legacy mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorOutcome {
    /// True when the legacy `records` column now holds the v2 record set.
    pub mirrored: bool,
    /// Error code when the mirror was rolled back.
    pub error_code: Option<String>,
}

impl MirrorOutcome {
    /// Successful mirror.
    pub fn mirrored() -> Self {
        Self {
            mirrored: true,
            error_code: None,
        }
    }

    /// Absorbed mirror failure.
    pub fn failed(error_code: impl Into<String>) -> Self {
        Self {
            mirrored: false,
            error_code: Some(error_code.into()),
        }
    }
}
