//! Repository event stream payloads.

use crate::{
    config::MigrationPhase,
    core::revision::Revision,
    summary::{DualReadCompareSummary, DualWriteSummary},
    types::WriteMode,
};

/// Events broadcast after repository operations.
///
/// Write events are sent only after the transaction commits, except
/// [`RecordsEvent::DualWriteDesync`], which reports a rolled-back write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordsEvent {
    /// A write committed.
    Saved {
        /// Write kind.
        mode: WriteMode,
        /// Phase active for the write.
        phase: MigrationPhase,
        /// New revision.
        updated_at: Revision,
    },
    /// v2 rows were synchronized and verified.
    DualWriteSynced {
        /// Sync outcome.
        summary: DualWriteSummary,
    },
    /// v2 row count diverged; the write was rolled back.
    DualWriteDesync {
        /// Sync outcome at the time of the check.
        summary: DualWriteSummary,
    },
    /// Legacy `records` column received the v2 record set.
    LegacyMirrored {
        /// Write kind; `None` for an operator rollback mirror.
        mode: Option<WriteMode>,
        /// Records mirrored.
        record_count: usize,
    },
    /// Best-effort mirror failed and was rolled back to its savepoint.
    LegacyMirrorFailed {
        /// Write kind.
        mode: WriteMode,
        /// Error code.
        error_code: String,
    },
    /// Dual-read compare completed.
    DualReadCompared {
        /// Compare outcome.
        summary: DualReadCompareSummary,
    },
    /// Dual-read compare could not run.
    DualReadCompareFailed {
        /// Reader that triggered the audit.
        requester: Option<String>,
        /// Error code.
        error_code: String,
    },
}
