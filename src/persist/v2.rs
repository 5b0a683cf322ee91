use hashbrown::HashMap;
use rusqlite::{Connection, params, types::Value as SqlValue};

use crate::{
    config::TableName,
    core::{hashing::record_hash, revision::Revision},
    record::{ClientRecord, NormalizedRecordRow},
    summary::DualWriteSummary,
    types::WriteMode,
};

use super::{PersistResult, legacy::revision_from_sql};

/// Accessor for the normalized v2 table.
#[derive(Debug, Clone, Copy)]
pub struct V2Store<'a> {
    table: &'a TableName,
}

impl<'a> V2Store<'a> {
    /// Binds the accessor to a table.
    pub fn new(table: &'a TableName) -> Self {
        Self { table }
    }

    /// Makes the v2 rows for `source_state_row_id` equal to `records`.
    ///
    /// Rows are upserted only when their hash or document changed, ids absent
    /// from `records` are deleted in one statement, and the final row count
    /// is reported in the summary. A count mismatch is reported through
    /// `in_sync = false`; deciding what to do about it is the caller's job.
    pub fn sync_snapshot(
        &self,
        conn: &Connection,
        source_state_row_id: &str,
        records: &[ClientRecord],
        source_state_updated_at: Option<Revision>,
        write_clock: Revision,
        mode: WriteMode,
    ) -> PersistResult<DualWriteSummary> {
        let records = dedupe_last_wins(records);
        let upsert_sql = format!(
            "INSERT INTO {} AS cur (
                source_state_row_id, id, record, record_hash,
                source_state_updated_at, created_at, updated_at, write_timestamp
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?6)
             ON CONFLICT (source_state_row_id, id) DO UPDATE SET
                record = excluded.record,
                record_hash = excluded.record_hash,
                source_state_updated_at = excluded.source_state_updated_at,
                updated_at = excluded.updated_at,
                write_timestamp = excluded.write_timestamp
             WHERE cur.record_hash IS DISTINCT FROM excluded.record_hash
                OR cur.record IS DISTINCT FROM excluded.record",
            self.table.quoted()
        );
        let source_rev = source_state_updated_at.map(Revision::to_iso);
        let clock = write_clock.to_iso();

        let mut upserted = 0_u64;
        let mut unchanged = 0_u64;
        {
            let mut stmt = conn.prepare_cached(&upsert_sql)?;
            for record in &records {
                let doc = serde_json::to_string(&record.to_value())?;
                let hash = record_hash(record);
                let changed = stmt.execute(params![
                    source_state_row_id,
                    record.id,
                    doc,
                    hash,
                    source_rev,
                    clock
                ])?;
                if changed > 0 {
                    upserted += 1;
                } else {
                    unchanged += 1;
                }
            }
        }

        let keep: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let keep_json = serde_json::to_string(&keep)?;
        let delete_sql = format!(
            "DELETE FROM {} WHERE source_state_row_id = ?1
             AND id NOT IN (SELECT value FROM json_each(?2))",
            self.table.quoted()
        );
        let deleted = conn.execute(&delete_sql, params![source_state_row_id, keep_json])? as u64;

        let expected_count = records.len() as u64;
        let actual_count = self.count_rows(conn, source_state_row_id)?;
        Ok(DualWriteSummary {
            mode,
            source_state_row_id: source_state_row_id.to_string(),
            source_state_updated_at,
            expected_count,
            actual_count,
            upserted,
            unchanged,
            deleted,
            in_sync: expected_count == actual_count,
        })
    }

    /// Counts rows for a source.
    pub fn count_rows(&self, conn: &Connection, source_state_row_id: &str) -> PersistResult<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE source_state_row_id = ?1",
            self.table.quoted()
        );
        let count: i64 = conn.query_row(&sql, params![source_state_row_id], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Loads every row for a source, ordered by id.
    pub fn load_rows(
        &self,
        conn: &Connection,
        source_state_row_id: &str,
    ) -> PersistResult<Vec<NormalizedRecordRow>> {
        let sql = format!(
            "SELECT id, record, record_hash, source_state_updated_at,
                    created_at, updated_at, write_timestamp
             FROM {} WHERE source_state_row_id = ?1 ORDER BY id",
            self.table.quoted()
        );
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params![source_state_row_id], |row| {
                Ok(RawRow {
                    id: row.get(0)?,
                    record: row.get(1)?,
                    record_hash: row.get(2)?,
                    source_state_updated_at: row.get(3)?,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                    write_timestamp: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows = Vec::with_capacity(raw.len());
        for r in raw {
            let mut record: ClientRecord = serde_json::from_str(&r.record)?;
            // The row key is authoritative over the id inside the document.
            record.id.clone_from(&r.id);
            rows.push(NormalizedRecordRow {
                id: r.id,
                record,
                record_hash: r.record_hash,
                source_state_row_id: source_state_row_id.to_string(),
                source_state_updated_at: revision_from_sql(r.source_state_updated_at)?,
                created_at: revision_from_sql(r.created_at)?,
                updated_at: revision_from_sql(r.updated_at)?,
                write_timestamp: revision_from_sql(r.write_timestamp)?,
            });
        }
        Ok(rows)
    }

    /// Loads the record documents for a source, ordered by id.
    pub fn load_records(&self, conn: &Connection, source_state_row_id: &str) -> PersistResult<Vec<ClientRecord>> {
        Ok(self
            .load_rows(conn, source_state_row_id)?
            .into_iter()
            .map(|row| row.record)
            .collect())
    }
}

struct RawRow {
    id: String,
    record: String,
    record_hash: String,
    source_state_updated_at: SqlValue,
    created_at: SqlValue,
    updated_at: SqlValue,
    write_timestamp: SqlValue,
}

/// Keeps the first position of each id and the last content written for it.
fn dedupe_last_wins(records: &[ClientRecord]) -> Vec<&ClientRecord> {
    let mut out: Vec<&ClientRecord> = Vec::with_capacity(records.len());
    let mut pos: HashMap<&str, usize> = HashMap::with_capacity(records.len());
    for record in records {
        match pos.get(record.id.as_str()) {
            Some(&idx) => out[idx] = record,
            None => {
                pos.insert(record.id.as_str(), out.len());
                out.push(record);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{config::RecordsConfig, persist::schema::install_schema, types::RevisionColumnKind};

    fn setup() -> (Connection, TableName) {
        let conn = Connection::open_in_memory().expect("open");
        let tables = RecordsConfig::default().tables().expect("tables");
        install_schema(&conn, &tables, RevisionColumnKind::Timestamptz).expect("install");
        (conn, tables.v2)
    }

    fn rec(id: &str, n: i64) -> ClientRecord {
        ClientRecord::new(id, json!({ "n": n }))
    }

    #[test]
    fn sync_counts_upserts_unchanged_and_deletes() {
        let (conn, table) = setup();
        let store = V2Store::new(&table);
        let t1 = Revision::from_epoch_ms(1_000);
        let first = store
            .sync_snapshot(&conn, "records", &[rec("a", 1), rec("b", 1), rec("c", 1)], Some(t1), t1, WriteMode::Put)
            .expect("sync");
        assert_eq!((first.upserted, first.unchanged, first.deleted), (3, 0, 0));
        assert!(first.in_sync);

        let t2 = Revision::from_epoch_ms(2_000);
        let second = store
            .sync_snapshot(&conn, "records", &[rec("a", 1), rec("b", 2)], Some(t2), t2, WriteMode::Put)
            .expect("sync");
        assert_eq!((second.upserted, second.unchanged, second.deleted), (1, 1, 1));
        assert_eq!(second.actual_count, 2);

        let rows = store.load_rows(&conn, "records").expect("load");
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        // Unchanged row keeps its original stamps.
        assert_eq!(rows[0].updated_at, Some(t1));
        assert_eq!(rows[0].source_state_updated_at, Some(t1));
        assert_eq!(rows[1].updated_at, Some(t2));
        assert_eq!(rows[1].created_at, Some(t1));
    }

    #[test]
    fn duplicate_ids_collapse_to_last_content() {
        let (conn, table) = setup();
        let store = V2Store::new(&table);
        let t = Revision::from_epoch_ms(5);
        let summary = store
            .sync_snapshot(&conn, "records", &[rec("a", 1), rec("a", 2)], Some(t), t, WriteMode::Put)
            .expect("sync");
        assert_eq!(summary.expected_count, 1);
        assert!(summary.in_sync);
        let records = store.load_records(&conn, "records").expect("load");
        assert_eq!(records, vec![rec("a", 2)]);
    }

    #[test]
    fn sources_are_isolated() {
        let (conn, table) = setup();
        let store = V2Store::new(&table);
        let t = Revision::from_epoch_ms(5);
        store
            .sync_snapshot(&conn, "one", &[rec("a", 1)], Some(t), t, WriteMode::Put)
            .expect("sync");
        store
            .sync_snapshot(&conn, "two", &[], Some(t), t, WriteMode::Put)
            .expect("sync");
        assert_eq!(store.count_rows(&conn, "one").expect("count"), 1);
        assert_eq!(store.count_rows(&conn, "two").expect("count"), 0);
    }
}
