use hashbrown::HashMap;

use crate::{
    record::{ClientRecord, NormalizedRecordRow},
    summary::DualReadCompareSummary,
    types::StateRowId,
};

use super::hashing::{record_hash, rows_checksum};

/// Compares the legacy snapshot with the v2 rows of the same source.
///
/// Id lists are capped at `sample_limit` and sorted for stable output; the
/// `*_count` fields carry the full totals.
pub fn compare_legacy_with_v2(
    source_state_row_id: &StateRowId,
    requester: Option<String>,
    legacy: &[ClientRecord],
    v2_rows: &[NormalizedRecordRow],
    sample_limit: usize,
) -> DualReadCompareSummary {
    let mut legacy_hashes: HashMap<&str, String> = HashMap::with_capacity(legacy.len());
    for rec in legacy {
        legacy_hashes.insert(rec.id.as_str(), record_hash(rec));
    }
    let v2_hashes: HashMap<&str, &str> = v2_rows
        .iter()
        .map(|row| (row.id.as_str(), row.record_hash.as_str()))
        .collect();

    let mut missing_in_v2: Vec<&str> = legacy_hashes
        .keys()
        .copied()
        .filter(|id| !v2_hashes.contains_key(id))
        .collect();
    let mut extra_in_v2: Vec<&str> = v2_hashes
        .keys()
        .copied()
        .filter(|id| !legacy_hashes.contains_key(id))
        .collect();
    let mut hash_mismatch: Vec<&str> = legacy_hashes
        .iter()
        .filter_map(|(id, hash)| match v2_hashes.get(id) {
            Some(stored) if *stored != hash.as_str() => Some(*id),
            _ => None,
        })
        .collect();
    let mut stored_hash_mismatch: Vec<&str> = v2_rows
        .iter()
        .filter(|row| record_hash(&row.record) != row.record_hash)
        .map(|row| row.id.as_str())
        .collect();

    missing_in_v2.sort_unstable();
    extra_in_v2.sort_unstable();
    hash_mismatch.sort_unstable();
    stored_hash_mismatch.sort_unstable();

    let legacy_checksum = rows_checksum(legacy_hashes.iter().map(|(id, h)| (*id, h.as_str())));
    let v2_checksum = rows_checksum(v2_hashes.iter().map(|(id, h)| (*id, *h)));

    let legacy_count = legacy_hashes.len() as u64;
    let v2_count = v2_rows.len() as u64;
    let in_sync = legacy_count == v2_count
        && legacy_checksum == v2_checksum
        && stored_hash_mismatch.is_empty();

    DualReadCompareSummary {
        source_state_row_id: source_state_row_id.clone(),
        requester,
        legacy_count,
        v2_count,
        legacy_checksum,
        v2_checksum,
        missing_in_v2_count: missing_in_v2.len() as u64,
        missing_in_v2: sample(&missing_in_v2, sample_limit),
        extra_in_v2_count: extra_in_v2.len() as u64,
        extra_in_v2: sample(&extra_in_v2, sample_limit),
        hash_mismatch_count: hash_mismatch.len() as u64,
        hash_mismatch: sample(&hash_mismatch, sample_limit),
        stored_hash_mismatch_count: stored_hash_mismatch.len() as u64,
        stored_hash_mismatch: sample(&stored_hash_mismatch, sample_limit),
        in_sync,
    }
}

fn sample(ids: &[&str], limit: usize) -> Vec<String> {
    ids.iter().take(limit).map(|id| (*id).to_string()).collect()
}
