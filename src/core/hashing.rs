use sha2::{Digest, Sha256};

use crate::record::ClientRecord;

/// SHA-256 hex digest of the record's canonical JSON.
///
/// Canonical form is `serde_json`'s default map ordering (sorted keys), so two
/// documents with the same content hash identically regardless of the key
/// order they were received in.
pub fn record_hash(record: &ClientRecord) -> String {
    let canonical = record.to_value().to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Order-insensitive checksum over `(id, hash)` pairs.
///
/// Pairs are sorted by id, then by hash, before hashing so the checksum only
/// depends on set content.
pub fn rows_checksum<'a, I>(rows: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut pairs: Vec<(&str, &str)> = rows.into_iter().collect();
    pairs.sort_unstable();
    let mut hasher = Sha256::new();
    for (id, hash) in pairs {
        hasher.update(id.as_bytes());
        hasher.update(b":");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
