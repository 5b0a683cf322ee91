use rusqlite::{Connection, OptionalExtension, params, types::Value as SqlValue};

use crate::{
    config::TableName,
    core::revision::Revision,
    record::{ClientRecord, RecordsSnapshot},
    types::{EpochMs, RevisionColumnKind},
};

use super::{PersistError, PersistResult};

const MIRROR_SAVEPOINT: &str = "legacy_mirror";

/// Decoded legacy singleton row.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyStateRow {
    /// Records array held in the `records` column.
    pub records: RecordsSnapshot,
    /// Current revision; `None` when the column is NULL.
    pub updated_at: Option<Revision>,
}

/// Result of a mirror attempted inside a savepoint.
#[derive(Debug)]
pub enum MirrorAttempt {
    /// Legacy `records` now holds the mirrored set.
    Mirrored,
    /// The mirror failed and its savepoint was rolled back.
    RolledBack(PersistError),
}

/// Accessor for the legacy singleton row.
///
/// All methods expect to run inside a transaction opened by the caller.
#[derive(Debug, Clone, Copy)]
pub struct LegacyStore<'a> {
    table: &'a TableName,
    row_id: &'a str,
    kind: RevisionColumnKind,
}

impl<'a> LegacyStore<'a> {
    /// Binds the accessor to a table, singleton id and revision column kind.
    pub fn new(table: &'a TableName, row_id: &'a str, kind: RevisionColumnKind) -> Self {
        Self { table, row_id, kind }
    }

    /// Reads records and revision. `None` when the singleton row is absent.
    pub fn read(&self, conn: &Connection) -> PersistResult<Option<LegacyStateRow>> {
        let sql = format!(
            "SELECT records, updated_at FROM {} WHERE id = ?1",
            self.table.quoted()
        );
        let raw: Option<(Option<String>, SqlValue)> = conn
            .query_row(&sql, params![self.row_id], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        let Some((records, updated_at)) = raw else {
            return Ok(None);
        };
        Ok(Some(LegacyStateRow {
            records: decode_records(records.as_deref())?,
            updated_at: revision_from_sql(updated_at)?,
        }))
    }

    /// Reads only the revision. Under `BEGIN IMMEDIATE` this is the row lock.
    pub fn read_revision(&self, conn: &Connection) -> PersistResult<Option<Revision>> {
        let sql = format!("SELECT updated_at FROM {} WHERE id = ?1", self.table.quoted());
        let raw: Option<SqlValue> = conn
            .query_row(&sql, params![self.row_id], |row| row.get(0))
            .optional()?;
        match raw {
            Some(value) => revision_from_sql(value),
            None => Ok(None),
        }
    }

    /// Stores `records` and `next` as the new revision, creating the row if
    /// needed. Returns the revision as persisted.
    pub fn write_records(
        &self,
        conn: &Connection,
        records: &[ClientRecord],
        next: Revision,
    ) -> PersistResult<Option<Revision>> {
        let sql = format!(
            "INSERT INTO {} (id, records, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                records = excluded.records,
                updated_at = excluded.updated_at
             RETURNING updated_at",
            self.table.quoted()
        );
        let encoded = serde_json::to_string(records)?;
        let stored: SqlValue = conn.query_row(
            &sql,
            params![self.row_id, encoded, revision_to_sql(self.kind, next)],
            |row| row.get(0),
        )?;
        revision_from_sql(stored)
    }

    /// Advances the revision without touching `records`. A missing row is
    /// created with an empty array.
    pub fn advance_revision(&self, conn: &Connection, next: Revision) -> PersistResult<Option<Revision>> {
        let sql = format!(
            "INSERT INTO {} (id, records, updated_at) VALUES (?1, '[]', ?2)
             ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at
             RETURNING updated_at",
            self.table.quoted()
        );
        let stored: SqlValue = conn.query_row(
            &sql,
            params![self.row_id, revision_to_sql(self.kind, next)],
            |row| row.get(0),
        )?;
        revision_from_sql(stored)
    }

    /// Replaces `records` and leaves the revision as it is.
    pub fn overwrite_records(&self, conn: &Connection, records: &[ClientRecord]) -> PersistResult<()> {
        let sql = format!(
            "INSERT INTO {} (id, records) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET records = excluded.records",
            self.table.quoted()
        );
        let encoded = serde_json::to_string(records)?;
        conn.execute(&sql, params![self.row_id, encoded])?;
        Ok(())
    }

    /// Overwrites `records` inside a savepoint.
    ///
    /// A failing overwrite is rolled back to the savepoint and reported as
    /// [`MirrorAttempt::RolledBack`]; the enclosing transaction stays usable.
    /// Only failures of the savepoint statements themselves are returned as
    /// `Err`.
    pub fn mirror_in_savepoint(
        &self,
        conn: &Connection,
        records: &[ClientRecord],
    ) -> PersistResult<MirrorAttempt> {
        conn.execute_batch(&format!("SAVEPOINT {MIRROR_SAVEPOINT}"))?;
        match self.overwrite_records(conn, records) {
            Ok(()) => {
                conn.execute_batch(&format!("RELEASE SAVEPOINT {MIRROR_SAVEPOINT}"))?;
                Ok(MirrorAttempt::Mirrored)
            }
            Err(err) => {
                conn.execute_batch(&format!(
                    "ROLLBACK TO SAVEPOINT {MIRROR_SAVEPOINT}; RELEASE SAVEPOINT {MIRROR_SAVEPOINT}"
                ))?;
                Ok(MirrorAttempt::RolledBack(err))
            }
        }
    }
}

/// Reads the database clock in epoch milliseconds.
pub fn store_clock_ms(conn: &Connection) -> PersistResult<EpochMs> {
    let ms = conn.query_row(
        "SELECT CAST((julianday('now') - 2440587.5) * 86400000.0 AS INTEGER)",
        [],
        |row| row.get(0),
    )?;
    Ok(ms)
}

/// Encodes a revision for the given column kind.
pub fn revision_to_sql(kind: RevisionColumnKind, revision: Revision) -> SqlValue {
    match kind {
        RevisionColumnKind::Timestamptz => SqlValue::Text(revision.to_iso()),
        RevisionColumnKind::EpochMillis => SqlValue::Integer(revision.epoch_ms()),
    }
}

/// Decodes a stored revision regardless of column kind.
pub fn revision_from_sql(value: SqlValue) -> PersistResult<Option<Revision>> {
    match value {
        SqlValue::Null => Ok(None),
        SqlValue::Integer(ms) => Ok(Some(Revision::from_epoch_ms(ms))),
        SqlValue::Real(ms) => Ok(Some(Revision::from_epoch_ms(ms.trunc() as i64))),
        SqlValue::Text(text) => Revision::parse(&text)
            .map(Some)
            .ok_or_else(|| PersistError::Message(format!("unparseable revision {text:?}"))),
        SqlValue::Blob(_) => Err(PersistError::Message("revision stored as blob".to_string())),
    }
}

fn decode_records(raw: Option<&str>) -> PersistResult<RecordsSnapshot> {
    match raw {
        None => Ok(Vec::new()),
        Some(text) if text.trim().is_empty() => Ok(Vec::new()),
        Some(text) => Ok(serde_json::from_str(text)?),
    }
}
