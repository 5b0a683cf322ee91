//! Pure helpers shared by the legacy and v2 storage paths.

/// Dual-read reconciliation of legacy records against v2 rows.
pub mod compare;
/// Record content hashing and row-set checksums.
pub mod hashing;
/// Patch operation application over a records array.
pub mod patch;
/// Revision normalization, formatting and matching.
pub mod revision;
