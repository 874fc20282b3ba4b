//! Snapshots module split into submodules:
//! - registry.rs: VersionRegistry (append-only version log stored in the handle file).
//! - manager.rs: SnapshotManager (naming, copy_from_latest, create_empty, orphans, verify).
//!
//! External API surface:
//! - VersionRegistry, VersionRecord
//! - SnapshotManager, VerifyReport

mod manager;
mod registry;

pub use manager::{SnapshotManager, VerifyReport};
pub use registry::{VersionRecord, VersionRegistry};
