//! Dual-storage engine for client records migrating from a single legacy
//! JSON row to a normalized per-record `SQLite` table.
//!
//! Writes are gated by an optimistic `expectedUpdatedAt` revision and, depending
//! on the active [`config::MigrationPhase`], land in the legacy row, in both
//! stores inside one transaction, or in v2 with the legacy column mirrored
//! best-effort. Reads can trigger an out-of-band reconciliation audit.
//!
//! # Examples
//!
//! Patch semantics with [`core::patch::apply_records_patch_operations`]:
//! ```
//! use recordsync::{core::patch::apply_records_patch_operations, op::PatchOperation, record::ClientRecord};
//! use serde_json::json;
//!
//! let base = vec![
//!     ClientRecord::new("a", json!({"name": "Acme"})),
//!     ClientRecord::new("b", json!({"name": "Bolt"})),
//! ];
//! let next = apply_records_patch_operations(
//!     base,
//!     &[
//!         PatchOperation::delete("a"),
//!         PatchOperation::upsert(ClientRecord::new("c", json!({"name": "Cask"}))),
//!     ],
//! );
//! let ids: Vec<_> = next.iter().map(|r| r.id.as_str()).collect();
//! assert_eq!(ids, ["b", "c"]);
//! ```
//!
//! Repository usage against a `SQLite` file:
//! ```no_run
//! use recordsync::{
//!     config::RecordsConfig,
//!     record::ClientRecord,
//!     runtime::{repository::RecordsRepository, request::{ReadContext, SaveOptions}},
//!     types::RevisionColumnKind,
//! };
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let repo = RecordsRepository::new(&RecordsConfig::for_database("records.db")).expect("config");
//! repo.install_schema(RevisionColumnKind::Timestamptz).await.expect("schema");
//! let current = repo.get_stored_records(&ReadContext::anonymous()).await.expect("read");
//! let revision = repo
//!     .save_stored_records(
//!         vec![ClientRecord::new("a", json!({"name": "Acme"}))],
//!         SaveOptions::from(current.updated_at),
//!     )
//!     .await
//!     .expect("save");
//! println!("saved at {revision}");
//! # }
//! ```
#![deny(missing_docs)]

/// Layered configuration, table identifiers and migration mode flags.
pub mod config;
/// Pure record helpers: revisions, hashing, patching, comparison.
pub mod core;
/// Boundary error taxonomy.
pub mod error;
/// Patch operation model.
pub mod op;
/// `SQLite` stores for legacy and v2 records.
pub mod persist;
/// Client record document and v2 row types.
pub mod record;
/// Async repository, requests and events.
pub mod runtime;
/// Sync and audit summaries.
pub mod summary;
/// Tracing subscriber setup.
pub mod telemetry;
/// Shared primitive types and enums.
pub mod types;
