//! # bookdesk-core
//!
//! Building blocks shared by the bookdesk client crates:
//!
//! - [`storage`]: the persisted-record contract ([`RecordStore`]) with file and
//!   in-memory backends, plus versioned load/save helpers
//! - [`logging`]: `tracing` subscriber setup for binaries
//!
//! Records are small JSON documents (`session.json`, `workspaces.json`) carrying
//! a `version` field. A record whose version does not match the compiled one is
//! treated as absent, so callers start from their empty state instead of
//! migrating an incompatible shape.

#![deny(unsafe_code)]

pub mod errors;
pub mod logging;
pub mod storage;

pub use errors::StorageError;
pub use logging::{LogFormat, init_subscriber};
pub use storage::{
    FileRecordStore, MemoryRecordStore, RecordStore, VersionedRecord, load_record, remove_record,
    save_record,
};

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
