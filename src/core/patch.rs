use hashbrown::HashMap;

use crate::{
    op::PatchOperation,
    record::ClientRecord,
    types::RecordId,
};

/// Applies `operations` left to right over `base` and returns the next array.
///
/// Upserting an existing id replaces the record in place; upserting an
/// unknown id appends it. Deleting an unknown id does nothing. The upsert's
/// `id` wins over any `id` carried inside the record document.
pub fn apply_records_patch_operations(
    base: Vec<ClientRecord>,
    operations: &[PatchOperation],
) -> Vec<ClientRecord> {
    let mut slots: Vec<Option<ClientRecord>> = Vec::with_capacity(base.len() + operations.len());
    let mut pos: HashMap<RecordId, usize> = HashMap::with_capacity(base.len());

    for rec in base {
        match pos.get(&rec.id) {
            Some(&idx) => slots[idx] = Some(rec),
            None => {
                pos.insert(rec.id.clone(), slots.len());
                slots.push(Some(rec));
            }
        }
    }

    for op in operations {
        match op {
            PatchOperation::Upsert { id, record } => {
                let mut rec = record.clone();
                rec.id = id.clone();
                match pos.get(id) {
                    Some(&idx) => slots[idx] = Some(rec),
                    None => {
                        pos.insert(id.clone(), slots.len());
                        slots.push(Some(rec));
                    }
                }
            }
            PatchOperation::Delete { id } => {
                if let Some(idx) = pos.remove(id) {
                    slots[idx] = None;
                }
            }
        }
    }

    slots.into_iter().flatten().collect()
}
