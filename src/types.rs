//! Shared primitive IDs and storage-mode enums.

use serde::{Deserialize, Serialize};

/// Client record identifier.
pub type RecordId = String;
/// Identifier of the legacy singleton state row.
pub type StateRowId = String;
/// Milliseconds since the Unix epoch.
pub type EpochMs = i64;

/// Kind of write that produced a v2 sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Full snapshot replace.
    Put,
    /// Patch operations applied to the current snapshot.
    Patch,
    /// Operator-driven copy of the legacy snapshot into v2.
    Backfill,
}

impl WriteMode {
    /// Stable label used in logs and payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Put => "put",
            Self::Patch => "patch",
            Self::Backfill => "backfill",
        }
    }
}

/// Physical representation of the legacy `updated_at` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionColumnKind {
    /// Timestamp column holding RFC 3339 text with millisecond precision.
    Timestamptz,
    /// Legacy integer column holding epoch milliseconds.
    EpochMillis,
}

impl RevisionColumnKind {
    /// Declared SQL type used when installing the legacy table.
    pub fn declared_type(self) -> &'static str {
        match self {
            Self::Timestamptz => "TIMESTAMPTZ",
            Self::EpochMillis => "BIGINT",
        }
    }

    /// Maps a declared column type to a revision kind.
    ///
    /// Integer affinities are epoch columns; everything else is treated as a
    /// timestamp.
    pub fn from_declared_type(declared: &str) -> Self {
        let upper = declared.trim().to_ascii_uppercase();
        if upper.contains("INT") {
            Self::EpochMillis
        } else {
            Self::Timestamptz
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_types_map_to_kinds() {
        assert_eq!(RevisionColumnKind::from_declared_type("bigint"), RevisionColumnKind::EpochMillis);
        assert_eq!(RevisionColumnKind::from_declared_type("INTEGER"), RevisionColumnKind::EpochMillis);
        assert_eq!(RevisionColumnKind::from_declared_type("TIMESTAMPTZ"), RevisionColumnKind::Timestamptz);
        assert_eq!(RevisionColumnKind::from_declared_type(""), RevisionColumnKind::Timestamptz);
    }
}
