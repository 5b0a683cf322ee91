use rusqlite::{Connection, OptionalExtension, params};

use crate::{
    config::{RecordsTables, TableName, quote_ident},
    types::RevisionColumnKind,
};

use super::PersistResult;

/// Creates the legacy and v2 tables if they do not exist.
///
/// `revision_kind` only affects a newly created legacy table; an existing one
/// keeps its column type and is discovered by [`probe_revision_kind`].
pub fn install_schema(
    conn: &Connection,
    tables: &RecordsTables,
    revision_kind: RevisionColumnKind,
) -> PersistResult<()> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {legacy} (
            id TEXT PRIMARY KEY,
            records TEXT NOT NULL DEFAULT '[]',
            updated_at {revision_type}
        );
        CREATE TABLE IF NOT EXISTS {v2} (
            source_state_row_id TEXT NOT NULL,
            id TEXT NOT NULL,
            record TEXT NOT NULL,
            record_hash TEXT NOT NULL,
            source_state_updated_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            write_timestamp TEXT NOT NULL,
            PRIMARY KEY (source_state_row_id, id)
        );
        CREATE INDEX IF NOT EXISTS {v2_index} ON {v2_bare} (source_state_row_id, updated_at);",
        legacy = tables.legacy.quoted(),
        v2 = tables.v2.quoted(),
        v2_index = v2_source_index(&tables.v2),
        v2_bare = quote_ident(&tables.v2.name),
        revision_type = revision_kind.declared_type(),
    );
    conn.execute_batch(&sql)?;
    Ok(())
}

// Index names carry the schema; the indexed table must not.
fn v2_source_index(table: &TableName) -> String {
    let index = quote_ident(&format!("{}_source_idx", table.name));
    match &table.schema {
        Some(schema) => format!("{}.{index}", quote_ident(schema)),
        None => index,
    }
}

/// Reads the declared type of the legacy `updated_at` column.
///
/// `Ok(None)` when the table or column does not exist.
pub fn probe_revision_kind(
    conn: &Connection,
    table: &TableName,
) -> PersistResult<Option<RevisionColumnKind>> {
    let declared: Option<String> = conn
        .query_row(
            "SELECT type FROM pragma_table_info(?1, ?2) WHERE name = 'updated_at'",
            params![table.name, table.schema_or_main()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(declared.map(|decl| RevisionColumnKind::from_declared_type(&decl)))
}
