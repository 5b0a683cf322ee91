use std::time::Duration;

use rusqlite::Connection;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::broadcast;

use recordsync::{
    config::{MigrationMode, MigrationPhase, RecordsConfig},
    record::ClientRecord,
    runtime::{
        events::RecordsEvent,
        repository::RecordsRepository,
        request::{ReadContext, SaveOptions},
    },
    types::RevisionColumnKind,
};

fn rec(id: &str, n: i64) -> ClientRecord {
    ClientRecord::new(id, json!({ "n": n }))
}

async fn installed(dir: &TempDir, mode: MigrationMode) -> RecordsRepository {
    let config = RecordsConfig::for_database(dir.path().join("records.db"));
    let repo = RecordsRepository::new(&config).expect("config");
    repo.set_mode(mode);
    repo.install_schema(RevisionColumnKind::Timestamptz)
        .await
        .expect("schema");
    repo
}

async fn next_compare_event(sub: &mut broadcast::Receiver<RecordsEvent>) -> RecordsEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match sub.recv().await.expect("event") {
                ev @ (RecordsEvent::DualReadCompared { .. }
                | RecordsEvent::DualReadCompareFailed { .. }) => return ev,
                _ => continue,
            }
        }
    })
    .await
    .expect("compare event in time")
}

#[tokio::test]
async fn audited_read_reports_in_sync_with_requester() {
    let dir = TempDir::new().expect("tempdir");
    let repo = installed(&dir, MigrationMode::new(MigrationPhase::ShadowWriteV2).with_audit()).await;
    let records = vec![rec("b", 1), rec("a", 1)];
    repo.save_stored_records(records.clone(), SaveOptions::no_prior_state())
        .await
        .expect("save");

    let mut sub = repo.subscribe();
    let stored = repo
        .get_stored_records(&ReadContext::for_requester("alice"))
        .await
        .expect("read");
    assert_eq!(stored.records, records);

    match next_compare_event(&mut sub).await {
        RecordsEvent::DualReadCompared { summary } => {
            assert!(summary.in_sync);
            assert_eq!(summary.requester.as_deref(), Some("alice"));
            assert_eq!(summary.legacy_count, 2);
            assert_eq!(summary.v2_count, 2);
            assert_eq!(summary.legacy_checksum, summary.v2_checksum);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn tampered_v2_rows_are_reported_as_mismatch() {
    let dir = TempDir::new().expect("tempdir");
    let repo = installed(&dir, MigrationMode::new(MigrationPhase::ShadowWriteV2)).await;
    repo.save_stored_records(vec![rec("a", 1), rec("b", 1), rec("c", 1)], SaveOptions::no_prior_state())
        .await
        .expect("save");

    let conn = Connection::open(dir.path().join("records.db")).expect("open");
    conn.execute(
        "UPDATE records_v2 SET record = '{\"id\":\"a\",\"n\":99}' WHERE id = 'a'",
        [],
    )
    .expect("tamper");
    conn.execute("DELETE FROM records_v2 WHERE id = 'c'", [])
        .expect("drop row");

    let legacy = repo.get_stored_records_from_legacy().await.expect("legacy");
    let summary = repo
        .dual_read_compare(legacy.records, &ReadContext::for_requester("ops"))
        .await
        .expect("compare");
    assert!(!summary.in_sync);
    assert_eq!(summary.missing_in_v2, vec!["c".to_string()]);
    assert_eq!(summary.missing_in_v2_count, 1);
    assert_eq!(summary.stored_hash_mismatch, vec!["a".to_string()]);
    assert_eq!(summary.stored_hash_mismatch_count, 1);
    assert_eq!(summary.hash_mismatch_count, 0);
    assert_eq!(summary.to_payload()["event"], "records_dual_read_compare_mismatch");
}

#[tokio::test]
async fn failing_compare_never_blocks_the_read() {
    let dir = TempDir::new().expect("tempdir");
    let repo = installed(&dir, MigrationMode::new(MigrationPhase::LegacyOnly).with_audit()).await;
    let records = vec![rec("a", 1)];
    repo.save_stored_records(records.clone(), SaveOptions::no_prior_state())
        .await
        .expect("save");

    let conn = Connection::open(dir.path().join("records.db")).expect("open");
    conn.execute_batch("DROP TABLE records_v2;").expect("drop v2");

    let mut sub = repo.subscribe();
    let stored = repo
        .get_stored_records(&ReadContext::for_requester("bob"))
        .await
        .expect("read still succeeds");
    assert_eq!(stored.records, records);

    assert_eq!(
        next_compare_event(&mut sub).await,
        RecordsEvent::DualReadCompareFailed {
            requester: Some("bob".to_string()),
            error_code: "db_error".to_string(),
        }
    );
}

#[tokio::test]
async fn unreadable_legacy_blob_never_breaks_cutover_read() {
    let dir = TempDir::new().expect("tempdir");
    let repo = installed(&dir, MigrationMode::new(MigrationPhase::CutoverV2).with_audit()).await;
    let records = vec![rec("a", 1)];
    let rev = repo
        .save_stored_records(records.clone(), SaveOptions::no_prior_state())
        .await
        .expect("save");

    let conn = Connection::open(dir.path().join("records.db")).expect("open");
    conn.execute("UPDATE records_state SET records = '{corrupt'", [])
        .expect("corrupt legacy");

    let mut sub = repo.subscribe();
    let stored = repo
        .get_stored_records(&ReadContext::for_requester("carol"))
        .await
        .expect("v2 read still succeeds");
    assert_eq!(stored.records, records);
    assert_eq!(stored.updated_at, Some(rev));

    assert_eq!(
        next_compare_event(&mut sub).await,
        RecordsEvent::DualReadCompareFailed {
            requester: Some("carol".to_string()),
            error_code: "records_state_invalid".to_string(),
        }
    );
}

#[tokio::test]
async fn reads_without_audit_spawn_nothing() {
    let dir = TempDir::new().expect("tempdir");
    let repo = installed(&dir, MigrationMode::new(MigrationPhase::ShadowWriteV2)).await;
    repo.save_stored_records(vec![rec("a", 1)], SaveOptions::no_prior_state())
        .await
        .expect("save");

    let mut sub = repo.subscribe();
    repo.get_stored_records(&ReadContext::anonymous())
        .await
        .expect("read");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sub.try_recv().is_err());
}
