use proptest::prelude::*;
use serde_json::json;

use recordsync::{
    core::{
        compare::compare_legacy_with_v2,
        hashing::record_hash,
        patch::apply_records_patch_operations,
    },
    op::PatchOperation,
    record::{ClientRecord, NormalizedRecordRow},
};

#[derive(Debug, Clone)]
enum Action {
    Upsert { id: u8, value: i64 },
    Delete { id: u8 },
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0u8..12, -50i64..50).prop_map(|(id, value)| Action::Upsert { id, value }),
        (0u8..12).prop_map(|id| Action::Delete { id }),
    ]
}

fn record(id: u8, value: i64) -> ClientRecord {
    ClientRecord::new(format!("r{id}"), json!({ "value": value }))
}

fn to_op(action: &Action) -> PatchOperation {
    match action {
        Action::Upsert { id, value } => PatchOperation::upsert(record(*id, *value)),
        Action::Delete { id } => PatchOperation::delete(format!("r{id}")),
    }
}

// Reference model: ordered (id, value) pairs.
fn apply_model(mut model: Vec<(String, i64)>, actions: &[Action]) -> Vec<(String, i64)> {
    for action in actions {
        match action {
            Action::Upsert { id, value } => {
                let key = format!("r{id}");
                match model.iter_mut().find(|(k, _)| *k == key) {
                    Some(slot) => slot.1 = *value,
                    None => model.push((key, *value)),
                }
            }
            Action::Delete { id } => {
                let key = format!("r{id}");
                model.retain(|(k, _)| *k != key);
            }
        }
    }
    model
}

fn as_pairs(records: &[ClientRecord]) -> Vec<(String, i64)> {
    records
        .iter()
        .map(|r| {
            let value = r.fields.get("value").and_then(|v| v.as_i64()).expect("value");
            (r.id.clone(), value)
        })
        .collect()
}

fn rows_for(records: &[ClientRecord]) -> Vec<NormalizedRecordRow> {
    records
        .iter()
        .map(|r| NormalizedRecordRow {
            id: r.id.clone(),
            record: r.clone(),
            record_hash: record_hash(r),
            source_state_row_id: "records".to_string(),
            source_state_updated_at: None,
            created_at: None,
            updated_at: None,
            write_timestamp: None,
        })
        .collect()
}

proptest! {
    #[test]
    fn patch_matches_ordered_model(
        base in prop::collection::vec((0u8..12, -50i64..50), 0..10),
        actions in prop::collection::vec(action_strategy(), 0..40),
    ) {
        let seed_actions: Vec<Action> = base
            .iter()
            .map(|(id, value)| Action::Upsert { id: *id, value: *value })
            .collect();
        let base_records = apply_records_patch_operations(
            Vec::new(),
            &seed_actions.iter().map(to_op).collect::<Vec<_>>(),
        );
        let base_model = apply_model(Vec::new(), &seed_actions);
        prop_assert_eq!(as_pairs(&base_records), base_model.clone());

        let ops: Vec<PatchOperation> = actions.iter().map(to_op).collect();
        let next = apply_records_patch_operations(base_records, &ops);
        prop_assert_eq!(as_pairs(&next), apply_model(base_model, &actions));

        let mut ids: Vec<&str> = next.iter().map(|r| r.id.as_str()).collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        prop_assert_eq!(ids.len(), total);
    }

    #[test]
    fn compare_is_in_sync_for_any_ordering_of_the_same_rows(
        values in prop::collection::vec(-50i64..50, 0..20),
        rotate in 0usize..20,
    ) {
        let records: Vec<ClientRecord> = values
            .iter()
            .enumerate()
            .map(|(i, v)| record(i as u8, *v))
            .collect();
        let mut rows = rows_for(&records);
        if !rows.is_empty() {
            let by = rotate % rows.len();
            rows.rotate_left(by);
        }
        let summary = compare_legacy_with_v2(&"records".to_string(), None, &records, &rows, 25);
        prop_assert!(summary.in_sync);
        prop_assert_eq!(summary.legacy_count, records.len() as u64);
    }
}
