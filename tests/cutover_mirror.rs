use rusqlite::Connection;
use serde_json::json;
use tempfile::TempDir;

use recordsync::{
    config::{MigrationMode, MigrationPhase, RecordsConfig},
    record::ClientRecord,
    runtime::{
        events::RecordsEvent,
        repository::RecordsRepository,
        request::{ReadContext, SaveOptions},
    },
    types::{RevisionColumnKind, WriteMode},
};

fn rec(id: &str, n: i64) -> ClientRecord {
    ClientRecord::new(id, json!({ "n": n }))
}

async fn installed(dir: &TempDir, phase: MigrationPhase) -> RecordsRepository {
    let config = RecordsConfig::for_database(dir.path().join("records.db"));
    let repo = RecordsRepository::new(&config).expect("config");
    repo.set_mode(MigrationMode::new(phase));
    repo.install_schema(RevisionColumnKind::Timestamptz)
        .await
        .expect("schema");
    repo
}

async fn next_mirror_event(sub: &mut tokio::sync::broadcast::Receiver<RecordsEvent>) -> RecordsEvent {
    loop {
        match sub.recv().await.expect("event") {
            ev @ (RecordsEvent::LegacyMirrored { .. } | RecordsEvent::LegacyMirrorFailed { .. }) => {
                return ev;
            }
            _ => continue,
        }
    }
}

#[tokio::test]
async fn mirror_projects_v2_writes_into_legacy() {
    let dir = TempDir::new().expect("tempdir");
    let repo = installed(&dir, MigrationPhase::CutoverV2WithMirror).await;
    let mut sub = repo.subscribe();

    let records = vec![rec("b", 1), rec("a", 1)];
    let rev = repo
        .save_stored_records(records.clone(), SaveOptions::no_prior_state())
        .await
        .expect("save");

    assert_eq!(
        next_mirror_event(&mut sub).await,
        RecordsEvent::LegacyMirrored {
            mode: Some(WriteMode::Put),
            record_count: 2,
        }
    );

    let legacy = repo.get_stored_records_from_legacy().await.expect("legacy");
    assert_eq!(legacy.records, records);
    assert_eq!(legacy.updated_at, Some(rev));

    // Reads come from v2, ordered by id.
    let stored = repo
        .get_stored_records(&ReadContext::anonymous())
        .await
        .expect("read");
    assert_eq!(stored.records, vec![rec("a", 1), rec("b", 1)]);
    assert_eq!(stored.updated_at, Some(rev));
}

#[tokio::test]
async fn mirror_failure_is_absorbed_and_v2_write_commits() {
    let dir = TempDir::new().expect("tempdir");
    let repo = installed(&dir, MigrationPhase::CutoverV2WithMirror).await;

    let conn = Connection::open(dir.path().join("records.db")).expect("open");
    conn.execute_batch(
        "CREATE TRIGGER block_legacy_records BEFORE UPDATE OF records ON records_state
         BEGIN SELECT RAISE(ABORT, 'legacy records are frozen'); END;",
    )
    .expect("trigger");

    let mut sub = repo.subscribe();
    let rev = repo
        .save_stored_records(vec![rec("a", 1)], SaveOptions::no_prior_state())
        .await
        .expect("save survives mirror failure");

    assert_eq!(
        next_mirror_event(&mut sub).await,
        RecordsEvent::LegacyMirrorFailed {
            mode: WriteMode::Put,
            error_code: "records_legacy_mirror_failed".to_string(),
        }
    );

    let v2 = repo.get_stored_records_from_v2().await.expect("v2");
    assert_eq!(v2.records, vec![rec("a", 1)]);
    assert_eq!(v2.updated_at, Some(rev));

    let legacy = repo.get_stored_records_from_legacy().await.expect("legacy");
    assert!(legacy.records.is_empty());
    assert_eq!(legacy.updated_at, Some(rev));
}

#[tokio::test]
async fn backfill_then_rollback_mirror_round_trips() {
    let dir = TempDir::new().expect("tempdir");
    let repo = installed(&dir, MigrationPhase::LegacyOnly).await;
    let r1 = repo
        .save_stored_records(vec![rec("b", 1), rec("a", 1)], SaveOptions::no_prior_state())
        .await
        .expect("legacy write");
    assert!(repo.get_stored_records_from_v2().await.expect("v2").records.is_empty());

    let summary = repo.backfill_v2_from_legacy().await.expect("backfill");
    assert_eq!(summary.mode, WriteMode::Backfill);
    assert_eq!(summary.upserted, 2);
    assert_eq!(summary.source_state_updated_at, Some(r1));
    assert!(summary.in_sync);
    assert_eq!(repo.get_stored_records_head_revision().await.expect("head"), Some(r1));

    // Second backfill is a no-op on content.
    let again = repo.backfill_v2_from_legacy().await.expect("backfill again");
    assert_eq!((again.upserted, again.unchanged, again.deleted), (0, 2, 0));

    repo.set_mode(MigrationMode::new(MigrationPhase::CutoverV2));
    let r2 = repo
        .save_stored_records(vec![rec("c", 1), rec("a", 2)], SaveOptions::expecting(r1))
        .await
        .expect("cutover write");

    let mirrored = repo.mirror_v2_to_legacy().await.expect("rollback mirror");
    assert_eq!(mirrored, 2);

    repo.set_mode(MigrationMode::new(MigrationPhase::LegacyOnly));
    let legacy = repo
        .get_stored_records(&ReadContext::anonymous())
        .await
        .expect("legacy read");
    assert_eq!(legacy.records, vec![rec("a", 2), rec("c", 1)]);
    assert_eq!(legacy.updated_at, Some(r2));
}
