//! Repository configuration, table identifiers and migration mode flags.

use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Default busy timeout for `SQLite` connections.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default cap on sampled ids in a dual-read compare summary.
pub const DEFAULT_COMPARE_SAMPLE_LIMIT: usize = 25;
/// Upper bound accepted for `compare_sample_limit`.
pub const MAX_COMPARE_SAMPLE_LIMIT: usize = 500;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML could not be parsed.
    #[error("invalid records config: {0}")]
    Parse(#[from] toml::de::Error),
    /// Table identifier could not be parsed.
    #[error("invalid table identifier {0:?}")]
    InvalidIdentifier(String),
    /// Flag combination has no operational meaning.
    #[error("invalid migration flags: {0}")]
    InvalidFlags(String),
    /// Numeric setting out of range.
    #[error("invalid records config value: {0}")]
    OutOfRange(String),
}

/// Table name, optionally schema-qualified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    /// Attached schema (`main`, `temp`, or an attached database name).
    pub schema: Option<String>,
    /// Unquoted table name.
    pub name: String,
}

impl TableName {
    /// Parses `name`, `schema.name`, `"schema"."name"` and mixed forms.
    ///
    /// Quoted parts may contain dots and doubled quotes.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidIdentifier(raw.to_string());
        let mut parts: Vec<String> = Vec::new();
        let mut chars = raw.trim().chars().peekable();

        loop {
            let mut part = String::new();
            if chars.peek() == Some(&'"') {
                chars.next();
                loop {
                    match chars.next() {
                        Some('"') if chars.peek() == Some(&'"') => {
                            chars.next();
                            part.push('"');
                        }
                        Some('"') => break,
                        Some(c) => part.push(c),
                        None => return Err(invalid()),
                    }
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c == '.' {
                        break;
                    }
                    if !(c.is_ascii_alphanumeric() || c == '_') {
                        return Err(invalid());
                    }
                    part.push(c);
                    chars.next();
                }
            }
            if part.is_empty() {
                return Err(invalid());
            }
            parts.push(part);
            match chars.next() {
                Some('.') => continue,
                None => break,
                Some(_) => return Err(invalid()),
            }
        }

        match parts.len() {
            1 => Ok(Self {
                schema: None,
                name: parts.remove(0),
            }),
            2 => {
                let name = parts.remove(1);
                Ok(Self {
                    schema: Some(parts.remove(0)),
                    name,
                })
            }
            _ => Err(invalid()),
        }
    }

    /// Quoted SQL reference, safe to splice into statements.
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        }
    }

    /// Schema used for catalog lookups.
    pub fn schema_or_main(&self) -> &str {
        self.schema.as_deref().unwrap_or("main")
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.quoted())
    }
}

pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Resolved table identifiers used by the stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordsTables {
    /// Legacy singleton state table.
    pub legacy: TableName,
    /// Normalized per-record v2 table.
    pub v2: TableName,
    /// Id of the legacy singleton row.
    pub state_row_id: String,
}

/// Raw mode flags as operated in production.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationFlags {
    /// Shadow-write every legacy write into v2.
    pub dual_write_v2: bool,
    /// Audit reads against v2 out of band.
    pub dual_read_compare: bool,
    /// v2 is the write path of record.
    pub write_v2: bool,
    /// Project v2 writes back into the legacy column.
    pub legacy_mirror: bool,
}

/// Named migration phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    /// Legacy JSON blob only.
    LegacyOnly,
    /// Legacy authoritative, v2 kept in lockstep.
    ShadowWriteV2,
    /// v2 authoritative, legacy holds the revision pointer only.
    CutoverV2,
    /// v2 authoritative, legacy column mirrored best-effort.
    CutoverV2WithMirror,
}

impl MigrationPhase {
    /// True when v2 is the write path of record.
    pub fn v2_authoritative(self) -> bool {
        matches!(self, Self::CutoverV2 | Self::CutoverV2WithMirror)
    }

    /// True when writes must synchronize v2.
    pub fn writes_v2(self) -> bool {
        !matches!(self, Self::LegacyOnly)
    }

    /// Stable label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LegacyOnly => "legacy_only",
            Self::ShadowWriteV2 => "shadow_write_v2",
            Self::CutoverV2 => "cutover_v2",
            Self::CutoverV2WithMirror => "cutover_v2_with_mirror",
        }
    }
}

/// Effective operating mode: a phase plus the read-audit sub-flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MigrationMode {
    /// Active phase.
    pub phase: MigrationPhase,
    /// Run dual-read compare on reads.
    pub audit_reads: bool,
}

impl MigrationMode {
    /// Mode with audits disabled.
    pub const fn new(phase: MigrationPhase) -> Self {
        Self {
            phase,
            audit_reads: false,
        }
    }

    /// Same phase with audits enabled.
    pub const fn with_audit(self) -> Self {
        Self {
            phase: self.phase,
            audit_reads: true,
        }
    }
}

impl Default for MigrationMode {
    fn default() -> Self {
        Self::new(MigrationPhase::LegacyOnly)
    }
}

impl MigrationFlags {
    /// Resolves the flag matrix into a validated mode.
    ///
    /// `legacy_mirror` without `write_v2` is rejected. `dual_write_v2` next to
    /// `write_v2` is redundant and only warned about.
    pub fn resolve(self) -> Result<MigrationMode, ConfigError> {
        if self.legacy_mirror && !self.write_v2 {
            return Err(ConfigError::InvalidFlags(
                "legacy_mirror requires write_v2".to_string(),
            ));
        }
        let phase = match (self.write_v2, self.legacy_mirror, self.dual_write_v2) {
            (true, true, _) => MigrationPhase::CutoverV2WithMirror,
            (true, false, _) => MigrationPhase::CutoverV2,
            (false, _, true) => MigrationPhase::ShadowWriteV2,
            (false, _, false) => MigrationPhase::LegacyOnly,
        };
        if self.write_v2 && self.dual_write_v2 {
            warn!(
                event = "records_flags_redundant",
                phase = phase.as_str(),
                "dual_write_v2 has no effect once write_v2 is enabled"
            );
        }
        if self.dual_read_compare && phase == MigrationPhase::CutoverV2 {
            warn!(
                event = "records_flags_audit_without_mirror",
                "dual_read_compare compares a legacy column that is not mirrored in cutover_v2"
            );
        }
        Ok(MigrationMode {
            phase,
            audit_reads: self.dual_read_compare,
        })
    }

    /// Overrides flags from `RECORDS_*` variables.
    ///
    /// Unknown keys are ignored; values other than the truthy set read as false.
    pub fn apply_env<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let slot = match key.as_ref() {
                "RECORDS_DUAL_WRITE_V2" => &mut self.dual_write_v2,
                "RECORDS_DUAL_READ_COMPARE" => &mut self.dual_read_compare,
                "RECORDS_WRITE_V2" => &mut self.write_v2,
                "RECORDS_LEGACY_MIRROR" => &mut self.legacy_mirror,
                _ => continue,
            };
            *slot = is_truthy(value.as_ref());
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Top-level repository configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordsConfig {
    /// `SQLite` database file; `None` means the database is not configured.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Busy timeout in milliseconds for lock waits.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Legacy state table identifier.
    #[serde(default = "default_legacy_table")]
    pub legacy_table: String,
    /// v2 records table identifier.
    #[serde(default = "default_v2_table")]
    pub v2_table: String,
    /// Legacy singleton row id.
    #[serde(default = "default_state_row_id")]
    pub state_row_id: String,
    /// Maximum sampled ids per compare list.
    #[serde(default = "default_compare_sample_limit")]
    pub compare_sample_limit: usize,
    /// Mode flags.
    #[serde(default)]
    pub flags: MigrationFlags,
}

const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_legacy_table() -> String {
    "records_state".to_string()
}

fn default_v2_table() -> String {
    "records_v2".to_string()
}

fn default_state_row_id() -> String {
    "records".to_string()
}

const fn default_compare_sample_limit() -> usize {
    DEFAULT_COMPARE_SAMPLE_LIMIT
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            legacy_table: default_legacy_table(),
            v2_table: default_v2_table(),
            state_row_id: default_state_row_id(),
            compare_sample_limit: DEFAULT_COMPARE_SAMPLE_LIMIT,
            flags: MigrationFlags::default(),
        }
    }
}

impl RecordsConfig {
    /// Default config pointing at `path`.
    pub fn for_database(path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Parses TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Parses identifiers and checks the row id.
    pub fn tables(&self) -> Result<RecordsTables, ConfigError> {
        let legacy = TableName::parse(&self.legacy_table)?;
        let v2 = TableName::parse(&self.v2_table)?;
        if legacy == v2 {
            return Err(ConfigError::InvalidIdentifier(self.v2_table.clone()));
        }
        if self.state_row_id.trim().is_empty() {
            return Err(ConfigError::OutOfRange(
                "state_row_id must not be empty".to_string(),
            ));
        }
        Ok(RecordsTables {
            legacy,
            v2,
            state_row_id: self.state_row_id.clone(),
        })
    }

    /// Resolves the migration mode from the configured flags.
    pub fn resolve_mode(&self) -> Result<MigrationMode, ConfigError> {
        self.flags.resolve()
    }

    /// Validates everything that can be validated without a database.
    pub fn validate(&self) -> Result<(RecordsTables, MigrationMode), ConfigError> {
        if self.compare_sample_limit == 0 || self.compare_sample_limit > MAX_COMPARE_SAMPLE_LIMIT {
            return Err(ConfigError::OutOfRange(format!(
                "compare_sample_limit must be within 1..={MAX_COMPARE_SAMPLE_LIMIT}, got {}",
                self.compare_sample_limit
            )));
        }
        Ok((self.tables()?, self.resolve_mode()?))
    }
}
