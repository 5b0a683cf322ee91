use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::{Mutex, OnceCell, broadcast, watch};
use tracing::{error, info, warn};

use crate::{
    config::{ConfigError, MigrationMode, MigrationPhase, RecordsConfig, RecordsTables},
    core::{
        compare::compare_legacy_with_v2,
        patch::apply_records_patch_operations,
        revision::{Revision, is_record_state_revision_match},
    },
    error::RecordsError,
    op::PatchOperation,
    persist::{
        Database, schema,
        legacy::{LegacyStore, MirrorAttempt, store_clock_ms},
        v2::V2Store,
        with_read_transaction, with_write_transaction,
    },
    record::ClientRecord,
    summary::{DualReadCompareSummary, DualWriteSummary, MirrorOutcome},
    types::{RevisionColumnKind, WriteMode},
};

use super::{
    events::RecordsEvent,
    request::{PatchResult, ReadContext, SaveOptions, StoredRecords},
};

const EVENT_CAPACITY: usize = 1024;
const MIRROR_FAILED_CODE: &str = "records_legacy_mirror_failed";

/// Async entry point for reading and writing client records.
///
/// Cheap to clone; clones share the mode, the schema cache and the event
/// stream. Every operation runs its `SQLite` work on the blocking pool with
/// its own connection, so concurrency is arbitrated by the database write
/// lock alone.
#[derive(Clone)]
pub struct RecordsRepository {
    inner: Arc<Inner>,
}

struct Inner {
    db: Database,
    tables: RecordsTables,
    compare_sample_limit: usize,
    mode: watch::Sender<MigrationMode>,
    ready: OnceCell<()>,
    revision_kind: Mutex<Option<RevisionColumnKind>>,
    events: broadcast::Sender<RecordsEvent>,
}

impl Inner {
    fn legacy(&self, kind: RevisionColumnKind) -> LegacyStore<'_> {
        LegacyStore::new(&self.tables.legacy, &self.tables.state_row_id, kind)
    }

    fn v2(&self) -> V2Store<'_> {
        V2Store::new(&self.tables.v2)
    }

    fn emit(&self, event: RecordsEvent) {
        let _ = self.events.send(event);
    }
}

/// Legacy side of a dual-read compare spawned after a read.
enum AuditBase {
    /// Already loaded by the read itself.
    Loaded(Vec<ClientRecord>),
    /// Loaded by the compare task, off the read path.
    LoadLegacy,
}

enum Change {
    Replace(Vec<ClientRecord>),
    Patch(Vec<PatchOperation>),
}

struct WriteOutcome {
    updated_at: Option<Revision>,
    written: bool,
    record_count: usize,
    sync: Option<DualWriteSummary>,
    mirror: Option<MirrorOutcome>,
}

impl WriteOutcome {
    fn unchanged(current: Option<Revision>) -> Self {
        Self {
            updated_at: current,
            written: false,
            record_count: 0,
            sync: None,
            mirror: None,
        }
    }
}

impl RecordsRepository {
    /// Builds a repository from validated configuration.
    pub fn new(config: &RecordsConfig) -> Result<Self, ConfigError> {
        let (tables, mode) = config.validate()?;
        let db = Database::new(config.database_path.clone(), config.busy_timeout_ms);
        Ok(Self::from_parts(db, tables, mode, config.compare_sample_limit))
    }

    /// Builds a repository from already-resolved parts.
    pub fn from_parts(
        db: Database,
        tables: RecordsTables,
        mode: MigrationMode,
        compare_sample_limit: usize,
    ) -> Self {
        let (mode, _) = watch::channel(mode);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                db,
                tables,
                compare_sample_limit,
                mode,
                ready: OnceCell::new(),
                revision_kind: Mutex::new(None),
                events,
            }),
        }
    }

    /// Subscribes to repository events.
    pub fn subscribe(&self) -> broadcast::Receiver<RecordsEvent> {
        self.inner.events.subscribe()
    }

    /// Table identifiers in use.
    pub fn tables(&self) -> &RecordsTables {
        &self.inner.tables
    }

    /// Mode applied to operations starting now.
    pub fn mode(&self) -> MigrationMode {
        *self.inner.mode.borrow()
    }

    /// Swaps the mode. In-flight operations keep the mode they started with.
    pub fn set_mode(&self, mode: MigrationMode) {
        let previous = self.inner.mode.send_replace(mode);
        if previous != mode {
            info!(
                event = "records_mode_changed",
                from = previous.phase.as_str(),
                to = mode.phase.as_str(),
                audit_reads = mode.audit_reads
            );
        }
    }

    /// Checks the database is configured and reachable; enables WAL.
    ///
    /// Succeeds once per repository; every query waits on it first. A failed
    /// attempt is retried by the next operation.
    pub async fn ensure_ready(&self) -> Result<(), RecordsError> {
        self.inner
            .ready
            .get_or_try_init(|| async {
                let db = self.inner.db.clone();
                tokio::task::spawn_blocking(move || db.ensure_ready())
                    .await
                    .map_err(join_error)?
                    .map_err(RecordsError::from)
            })
            .await
            .map(|_| ())
    }

    /// Creates both tables if missing, then refreshes the schema cache.
    pub async fn install_schema(
        &self,
        kind: RevisionColumnKind,
    ) -> Result<RevisionColumnKind, RecordsError> {
        self.run_blocking(move |inner, conn| {
            schema::install_schema(conn, &inner.tables, kind)?;
            Ok(())
        })
        .await?;
        self.reprobe_schema().await
    }

    /// Revision column kind, probed on first use and cached.
    pub async fn revision_kind(&self) -> Result<RevisionColumnKind, RecordsError> {
        let mut cached = self.inner.revision_kind.lock().await;
        if let Some(kind) = *cached {
            return Ok(kind);
        }
        let kind = self.probe_revision_kind().await?;
        *cached = Some(kind);
        Ok(kind)
    }

    /// Probes the revision column again and replaces the cached kind.
    pub async fn reprobe_schema(&self) -> Result<RevisionColumnKind, RecordsError> {
        let mut cached = self.inner.revision_kind.lock().await;
        let kind = self.probe_revision_kind().await?;
        *cached = Some(kind);
        Ok(kind)
    }

    async fn probe_revision_kind(&self) -> Result<RevisionColumnKind, RecordsError> {
        self.run_blocking(|inner, conn| {
            let table = &inner.tables.legacy;
            match schema::probe_revision_kind(conn, table) {
                Ok(Some(kind)) => Ok(kind),
                Ok(None) => {
                    warn!(
                        event = "records_schema_probe_fallback",
                        table = %table,
                        reason = "updated_at column not found"
                    );
                    Ok(RevisionColumnKind::Timestamptz)
                }
                Err(err) => {
                    warn!(
                        event = "records_schema_probe_fallback",
                        table = %table,
                        error = %err
                    );
                    Ok(RevisionColumnKind::Timestamptz)
                }
            }
        })
        .await
    }

    /// Reads the record set from the store the current phase serves from.
    ///
    /// With `audit_reads` on, a dual-read compare is spawned after the read
    /// and never affects its result.
    pub async fn get_stored_records(&self, ctx: &ReadContext) -> Result<StoredRecords, RecordsError> {
        let mode = self.mode();
        let kind = self.revision_kind().await?;
        let (stored, audit_base) = self
            .run_blocking(move |inner, conn| {
                with_read_transaction::<_, RecordsError, _>(conn, |tx| {
                    let legacy = inner.legacy(kind);
                    if mode.phase.v2_authoritative() {
                        let records = inner.v2().load_records(tx, &inner.tables.state_row_id)?;
                        let updated_at = legacy.read_revision(tx)?;
                        let audit_base = mode.audit_reads.then_some(AuditBase::LoadLegacy);
                        Ok((StoredRecords { records, updated_at }, audit_base))
                    } else {
                        let stored = legacy
                            .read(tx)?
                            .map(|row| StoredRecords {
                                records: row.records,
                                updated_at: row.updated_at,
                            })
                            .unwrap_or_default();
                        let audit_base = mode
                            .audit_reads
                            .then(|| AuditBase::Loaded(stored.records.clone()));
                        Ok((stored, audit_base))
                    }
                })
            })
            .await?;

        if let Some(base) = audit_base {
            self.spawn_dual_read_compare(base, ctx.clone());
        }
        Ok(stored)
    }

    /// Reads v2 rows regardless of phase, with the legacy revision.
    pub async fn get_stored_records_from_v2(&self) -> Result<StoredRecords, RecordsError> {
        let kind = self.revision_kind().await?;
        self.run_blocking(move |inner, conn| {
            with_read_transaction::<_, RecordsError, _>(conn, |tx| {
                Ok(StoredRecords {
                    records: inner.v2().load_records(tx, &inner.tables.state_row_id)?,
                    updated_at: inner.legacy(kind).read_revision(tx)?,
                })
            })
        })
        .await
    }

    /// Reads the legacy row regardless of phase.
    pub async fn get_stored_records_from_legacy(&self) -> Result<StoredRecords, RecordsError> {
        let kind = self.revision_kind().await?;
        self.run_blocking(move |inner, conn| {
            Ok(inner
                .legacy(kind)
                .read(conn)?
                .map(|row| StoredRecords {
                    records: row.records,
                    updated_at: row.updated_at,
                })
                .unwrap_or_default())
        })
        .await
    }

    /// Current revision without loading records.
    pub async fn get_stored_records_head_revision(&self) -> Result<Option<Revision>, RecordsError> {
        let kind = self.revision_kind().await?;
        self.run_blocking(move |inner, conn| Ok(inner.legacy(kind).read_revision(conn)?))
            .await
    }

    /// Replaces the whole record set.
    pub async fn save_stored_records(
        &self,
        records: Vec<ClientRecord>,
        options: SaveOptions,
    ) -> Result<Revision, RecordsError> {
        let expected = options.expected_revision()?;
        let outcome = self
            .write(WriteMode::Put, expected, Change::Replace(records))
            .await?;
        outcome.updated_at.ok_or_else(|| RecordsError::Database {
            detail: "write committed without a revision".to_string(),
        })
    }

    /// Applies patch operations to the authoritative record set.
    ///
    /// An empty operation list still checks the precondition and the
    /// revision, then returns the current revision without writing.
    pub async fn save_stored_records_patch(
        &self,
        operations: Vec<PatchOperation>,
        options: SaveOptions,
    ) -> Result<PatchResult, RecordsError> {
        let expected = options.expected_revision()?;
        let outcome = self
            .write(WriteMode::Patch, expected, Change::Patch(operations))
            .await?;
        Ok(PatchResult {
            updated_at: outcome.updated_at,
        })
    }

    async fn write(
        &self,
        write_mode: WriteMode,
        expected: Option<Revision>,
        change: Change,
    ) -> Result<WriteOutcome, RecordsError> {
        let mode = self.mode();
        let kind = self.revision_kind().await?;
        let result = self
            .run_blocking(move |inner, conn| {
                with_write_transaction::<_, RecordsError, _>(conn, |tx| {
                    write_in_transaction(inner, tx, mode.phase, kind, write_mode, expected, change)
                })
            })
            .await;

        match &result {
            Ok(outcome) => self.after_write(mode.phase, write_mode, outcome),
            Err(RecordsError::DualWriteDesync { summary }) => {
                self.inner.emit(RecordsEvent::DualWriteDesync {
                    summary: (**summary).clone(),
                });
            }
            Err(err) if !err.is_client_recoverable() => {
                error!(
                    event = "records_write_failed",
                    mode = write_mode.as_str(),
                    phase = mode.phase.as_str(),
                    code = err.code(),
                    error = ?err
                );
            }
            Err(_) => {}
        }
        result
    }

    fn after_write(&self, phase: MigrationPhase, write_mode: WriteMode, outcome: &WriteOutcome) {
        if !outcome.written {
            return;
        }
        let Some(updated_at) = outcome.updated_at else {
            return;
        };
        if let Some(summary) = &outcome.sync {
            info!(
                event = "records_dual_write_synced",
                mode = write_mode.as_str(),
                expected_count = summary.expected_count,
                upserted = summary.upserted,
                unchanged = summary.unchanged,
                deleted = summary.deleted,
                source_state_updated_at = %updated_at
            );
            self.inner.emit(RecordsEvent::DualWriteSynced {
                summary: summary.clone(),
            });
        }
        match &outcome.mirror {
            Some(mirror) if mirror.mirrored => self.inner.emit(RecordsEvent::LegacyMirrored {
                mode: Some(write_mode),
                record_count: outcome.record_count,
            }),
            Some(mirror) => self.inner.emit(RecordsEvent::LegacyMirrorFailed {
                mode: write_mode,
                error_code: mirror
                    .error_code
                    .clone()
                    .unwrap_or_else(|| MIRROR_FAILED_CODE.to_string()),
            }),
            None => {}
        }
        self.inner.emit(RecordsEvent::Saved {
            mode: write_mode,
            phase,
            updated_at,
        });
    }

    /// Compares a legacy record set with the v2 rows for the source.
    ///
    /// The outcome is logged and broadcast; a failure to load v2 is reported
    /// as [`RecordsEvent::DualReadCompareFailed`] and returned.
    pub async fn dual_read_compare(
        &self,
        legacy_records: Vec<ClientRecord>,
        ctx: &ReadContext,
    ) -> Result<DualReadCompareSummary, RecordsError> {
        let requester = ctx.requester.clone();
        let loaded = self
            .run_blocking(|inner, conn| Ok(inner.v2().load_rows(conn, &inner.tables.state_row_id)?))
            .await;
        let rows = match loaded {
            Ok(rows) => rows,
            Err(err) => {
                self.report_compare_failure(requester, &err);
                return Err(err);
            }
        };

        let summary = compare_legacy_with_v2(
            &self.inner.tables.state_row_id,
            requester,
            &legacy_records,
            &rows,
            self.inner.compare_sample_limit,
        );
        if summary.in_sync {
            info!(
                event = "records_dual_read_compare_success",
                requester = ?summary.requester,
                legacy_count = summary.legacy_count,
                v2_count = summary.v2_count
            );
        } else {
            warn!(
                event = "records_dual_read_compare_mismatch",
                requester = ?summary.requester,
                legacy_count = summary.legacy_count,
                v2_count = summary.v2_count,
                missing_in_v2 = summary.missing_in_v2_count,
                extra_in_v2 = summary.extra_in_v2_count,
                hash_mismatch = summary.hash_mismatch_count,
                stored_hash_mismatch = summary.stored_hash_mismatch_count
            );
        }
        self.inner.emit(RecordsEvent::DualReadCompared {
            summary: summary.clone(),
        });
        Ok(summary)
    }

    fn report_compare_failure(&self, requester: Option<String>, err: &RecordsError) {
        warn!(
            event = "records_dual_read_compare_failed",
            requester = ?requester,
            code = err.code(),
            error = ?err
        );
        self.inner.emit(RecordsEvent::DualReadCompareFailed {
            requester,
            error_code: err.code().to_string(),
        });
    }

    fn spawn_dual_read_compare(&self, base: AuditBase, ctx: ReadContext) {
        let repo = self.clone();
        tokio::spawn(async move {
            let legacy_records = match base {
                AuditBase::Loaded(records) => records,
                AuditBase::LoadLegacy => match repo.get_stored_records_from_legacy().await {
                    Ok(stored) => stored.records,
                    Err(err) => {
                        repo.report_compare_failure(ctx.requester.clone(), &err);
                        return;
                    }
                },
            };
            // Logged and broadcast inside.
            let _ = repo.dual_read_compare(legacy_records, &ctx).await;
        });
    }

    /// Copies the legacy record set into v2 at the current revision.
    ///
    /// Runs under the write lock and does not bump the revision.
    pub async fn backfill_v2_from_legacy(&self) -> Result<DualWriteSummary, RecordsError> {
        let kind = self.revision_kind().await?;
        let result = self
            .run_blocking(move |inner, conn| {
                with_write_transaction::<_, RecordsError, _>(conn, |tx| {
                    let (records, updated_at) = inner
                        .legacy(kind)
                        .read(tx)?
                        .map(|row| (row.records, row.updated_at))
                        .unwrap_or_default();
                    let clock = Revision::from_epoch_ms(store_clock_ms(tx)?);
                    sync_snapshot_to_v2(inner, tx, &records, updated_at, clock, WriteMode::Backfill)
                })
            })
            .await;

        match &result {
            Ok(summary) => {
                info!(
                    event = "records_backfill_completed",
                    expected_count = summary.expected_count,
                    upserted = summary.upserted,
                    unchanged = summary.unchanged,
                    deleted = summary.deleted
                );
                self.inner.emit(RecordsEvent::DualWriteSynced {
                    summary: summary.clone(),
                });
            }
            Err(RecordsError::DualWriteDesync { summary }) => {
                self.inner.emit(RecordsEvent::DualWriteDesync {
                    summary: (**summary).clone(),
                });
            }
            Err(_) => {}
        }
        result
    }

    /// Projects every v2 row back into the legacy `records` column.
    ///
    /// Failure aborts the transaction. The revision is not bumped. Records
    /// land in id order since v2 keeps no display order.
    pub async fn mirror_v2_to_legacy(&self) -> Result<usize, RecordsError> {
        let kind = self.revision_kind().await?;
        let count = self
            .run_blocking(move |inner, conn| {
                with_write_transaction::<_, RecordsError, _>(conn, |tx| {
                    let records = inner.v2().load_records(tx, &inner.tables.state_row_id)?;
                    inner.legacy(kind).overwrite_records(tx, &records)?;
                    Ok(records.len())
                })
            })
            .await?;
        info!(event = "records_rollback_mirror_completed", record_count = count);
        self.inner.emit(RecordsEvent::LegacyMirrored {
            mode: None,
            record_count: count,
        });
        Ok(count)
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T, RecordsError>
    where
        T: Send + 'static,
        F: FnOnce(&Inner, &mut Connection) -> Result<T, RecordsError> + Send + 'static,
    {
        self.ensure_ready().await?;
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut conn = inner.db.open()?;
            f(inner.as_ref(), &mut conn)
        })
        .await
        .map_err(join_error)?
    }
}

fn join_error(err: tokio::task::JoinError) -> RecordsError {
    RecordsError::Internal {
        detail: format!("join error: {err}"),
    }
}

fn write_in_transaction(
    inner: &Inner,
    conn: &Connection,
    phase: MigrationPhase,
    kind: RevisionColumnKind,
    write_mode: WriteMode,
    expected: Option<Revision>,
    change: Change,
) -> Result<WriteOutcome, RecordsError> {
    let legacy = inner.legacy(kind);
    let row_id = inner.tables.state_row_id.as_str();

    let current = legacy.read_revision(conn)?;
    if !is_record_state_revision_match(expected, current) {
        return Err(RecordsError::Conflict {
            current_updated_at: current,
        });
    }

    let records = match change {
        Change::Replace(records) => records,
        Change::Patch(operations) if operations.is_empty() => {
            return Ok(WriteOutcome::unchanged(current));
        }
        Change::Patch(operations) => {
            let base = if phase.v2_authoritative() {
                inner.v2().load_records(conn, row_id)?
            } else {
                legacy.read(conn)?.map(|row| row.records).unwrap_or_default()
            };
            apply_records_patch_operations(base, &operations)
        }
    };

    let clock = Revision::from_epoch_ms(store_clock_ms(conn)?);
    let next = match current {
        Some(current) => clock.max(current.successor()),
        None => clock,
    };

    let stored = if phase.v2_authoritative() {
        legacy.advance_revision(conn, next)?
    } else {
        legacy.write_records(conn, &records, next)?
    };
    let updated_at = stored.ok_or_else(|| RecordsError::Database {
        detail: "revision column returned NULL after write".to_string(),
    })?;

    let sync = if phase.writes_v2() {
        Some(sync_snapshot_to_v2(
            inner,
            conn,
            &records,
            Some(updated_at),
            clock,
            write_mode,
        )?)
    } else {
        None
    };
    let mirror = if phase == MigrationPhase::CutoverV2WithMirror {
        Some(mirror_records_best_effort(&legacy, conn, &records, write_mode)?)
    } else {
        None
    };

    Ok(WriteOutcome {
        updated_at: Some(updated_at),
        written: true,
        record_count: records.len(),
        sync,
        mirror,
    })
}

/// Syncs `records` into v2 and verifies the row count.
///
/// Any failure aborts the caller's transaction: a count mismatch as
/// `DualWriteDesync`, anything else as `DualWriteFailed`.
fn sync_snapshot_to_v2(
    inner: &Inner,
    conn: &Connection,
    records: &[ClientRecord],
    source_state_updated_at: Option<Revision>,
    clock: Revision,
    write_mode: WriteMode,
) -> Result<DualWriteSummary, RecordsError> {
    let summary = inner
        .v2()
        .sync_snapshot(
            conn,
            &inner.tables.state_row_id,
            records,
            source_state_updated_at,
            clock,
            write_mode,
        )
        .map_err(|err| {
            error!(
                event = "records_dual_write_failed",
                mode = write_mode.as_str(),
                error = %err
            );
            RecordsError::dual_write_failed(err)
        })?;

    if !summary.in_sync {
        error!(
            event = "records_dual_write_desync",
            mode = write_mode.as_str(),
            source_state_row_id = %summary.source_state_row_id,
            expected_count = summary.expected_count,
            actual_count = summary.actual_count,
            payload = %summary.to_payload()
        );
        return Err(RecordsError::DualWriteDesync {
            summary: Box::new(summary),
        });
    }
    Ok(summary)
}

fn mirror_records_best_effort(
    legacy: &LegacyStore<'_>,
    conn: &Connection,
    records: &[ClientRecord],
    write_mode: WriteMode,
) -> Result<MirrorOutcome, RecordsError> {
    match legacy.mirror_in_savepoint(conn, records)? {
        MirrorAttempt::Mirrored => Ok(MirrorOutcome::mirrored()),
        MirrorAttempt::RolledBack(err) => {
            warn!(
                event = MIRROR_FAILED_CODE,
                mode = write_mode.as_str(),
                error = %err,
                "legacy mirror rolled back, v2 write kept"
            );
            Ok(MirrorOutcome::failed(MIRROR_FAILED_CODE))
        }
    }
}
