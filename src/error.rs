//! Boundary error taxonomy for the records repository.

use serde_json::{Value, json};
use thiserror::Error;

use crate::{
    core::revision::Revision,
    persist::PersistError,
    summary::DualWriteSummary,
};

/// Errors surfaced to the HTTP/API layer.
///
/// Every variant maps to a stable `code()` and HTTP `status()`. Messages are
/// user-facing and never embed raw database error text; that detail is only
/// logged.
#[derive(Debug, Error)]
pub enum RecordsError {
    /// Write issued without an `expectedUpdatedAt` key.
    #[error("expectedUpdatedAt is required for records writes")]
    PreconditionRequired,
    /// `expectedUpdatedAt` present but not a timestamp.
    #[error("expectedUpdatedAt is not a valid timestamp")]
    InvalidExpectedUpdatedAt,
    /// Caller's revision is stale.
    #[error("records were modified by another writer")]
    Conflict {
        /// Revision currently stored.
        current_updated_at: Option<Revision>,
    },
    /// v2 row count diverged from the legacy snapshot after sync.
    #[error("records storage consistency check failed")]
    DualWriteDesync {
        /// Sync summary with expected and actual counts.
        summary: Box<DualWriteSummary>,
    },
    /// Unexpected failure while writing v2.
    #[error("records storage write failed")]
    DualWriteFailed {
        /// Internal detail, for logs only.
        detail: String,
    },
    /// Legacy `records` column could not be decoded.
    #[error("stored records state is unreadable")]
    StateInvalid {
        /// Internal detail, for logs only.
        detail: String,
    },
    /// No database configured for this process.
    #[error("database is not configured")]
    DbNotConfigured,
    /// Unexpected database failure outside a dual write.
    #[error("records storage is unavailable")]
    Database {
        /// Internal detail, for logs only.
        detail: String,
    },
    /// Blocking task failed to complete.
    #[error("records operation was interrupted")]
    Internal {
        /// Internal detail, for logs only.
        detail: String,
    },
}

impl RecordsError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PreconditionRequired => "records_precondition_required",
            Self::InvalidExpectedUpdatedAt => "invalid_expected_updated_at",
            Self::Conflict { .. } => "records_conflict",
            Self::DualWriteDesync { .. } => "records_dual_write_desync",
            Self::DualWriteFailed { .. } => "records_dual_write_failed",
            Self::StateInvalid { .. } => "records_state_invalid",
            Self::DbNotConfigured => "db_not_configured",
            Self::Database { .. } => "db_error",
            Self::Internal { .. } => "records_internal",
        }
    }

    /// HTTP status the boundary should answer with.
    pub fn status(&self) -> u16 {
        match self {
            Self::PreconditionRequired => 428,
            Self::InvalidExpectedUpdatedAt => 400,
            Self::Conflict { .. } => 409,
            Self::DbNotConfigured => 503,
            Self::DualWriteDesync { .. }
            | Self::DualWriteFailed { .. }
            | Self::StateInvalid { .. }
            | Self::Database { .. }
            | Self::Internal { .. } => 500,
        }
    }

    /// True for errors the caller can recover from by refetching.
    pub fn is_client_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PreconditionRequired | Self::InvalidExpectedUpdatedAt | Self::Conflict { .. }
        )
    }

    /// JSON body for the boundary response.
    pub fn payload(&self) -> Value {
        let mut body = json!({
            "code": self.code(),
            "status": self.status(),
            "message": self.to_string(),
        });
        match self {
            Self::Conflict { current_updated_at } => {
                body["currentUpdatedAt"] = json!(current_updated_at);
            }
            Self::DualWriteDesync { summary } => {
                body["summary"] = json!(summary);
            }
            _ => {}
        }
        body
    }

    pub(crate) fn dual_write_failed(err: impl std::fmt::Display) -> Self {
        Self::DualWriteFailed {
            detail: err.to_string(),
        }
    }
}

impl From<PersistError> for RecordsError {
    fn from(value: PersistError) -> Self {
        match value {
            PersistError::Serde(err) => Self::StateInvalid {
                detail: err.to_string(),
            },
            PersistError::NotConfigured => Self::DbNotConfigured,
            other => Self::Database {
                detail: other.to_string(),
            },
        }
    }
}
