//! Async repository API and its event stream.

/// Event stream types emitted by the repository.
pub mod events;
/// Repository orchestration across the legacy and v2 stores.
pub mod repository;
/// Request options and read results.
pub mod request;
