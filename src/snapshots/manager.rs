//! Snapshot manager: naming, copy-from-latest, empty bootstrap snapshot, orphan listing
//! and checksum verification.
//!
//! Naming: <dir>/<stem>_<uuid v4><ext> next to the handle, e.g.
//!   sandbox/test.db -> sandbox/test_5f0c...e1.db
//! Copies are plain file-level duplication; published snapshots are never written again, so
//! the source is stable while it is copied.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use log::{debug, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::{KingdomError, Result};
use crate::metrics::record_snapshot_copy;
use crate::util::file_checksum;

use super::registry::VersionRegistry;

/// Outcome of `SnapshotManager::verify`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub checked: usize,
    pub missing: Vec<PathBuf>,
    pub mismatched: Vec<PathBuf>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty() && self.mismatched.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct SnapshotManager<E: Engine> {
    handle: PathBuf,
    engine: E,
    fsync: bool,
}

impl<E: Engine> SnapshotManager<E> {
    pub fn new(handle: impl Into<PathBuf>, engine: E, fsync: bool) -> Self {
        Self {
            handle: handle.into(),
            engine,
            fsync,
        }
    }

    fn dir(&self) -> PathBuf {
        match self.handle.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// (stem, ext) of the handle file name; ext keeps its leading dot or is empty.
    fn name_parts(&self) -> (String, String) {
        let stem = self
            .handle
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = self
            .handle
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        (stem, ext)
    }

    /// Fresh collision-free snapshot path.
    pub fn new_path(&self) -> PathBuf {
        let (stem, ext) = self.name_parts();
        self.dir().join(format!("{stem}_{}{ext}", Uuid::new_v4()))
    }

    /// Whether `file_name` has the shape of a snapshot of this handle.
    pub fn is_snapshot_name(&self, file_name: &str) -> bool {
        let (stem, ext) = self.name_parts();
        file_name
            .strip_prefix(&format!("{stem}_"))
            .and_then(|rest| rest.strip_suffix(ext.as_str()))
            .map(|id| id.len() == 36 && Uuid::parse_str(id).is_ok())
            .unwrap_or(false)
    }

    /// Copy the latest published snapshot to a new private path.
    pub fn copy_from_latest(&self, registry: &VersionRegistry<E>) -> Result<PathBuf> {
        let src = registry.latest()?;
        let dst = self.new_path();
        let bytes = fs::copy(&src, &dst).map_err(|e| {
            let _ = fs::remove_file(&dst);
            KingdomError::snapshot(&dst, format!("copy from {}: {e}", src.display()))
        })?;
        if self.fsync {
            let synced = OpenOptions::new()
                .write(true)
                .open(&dst)
                .and_then(|f| f.sync_all());
            if let Err(e) = synced {
                let _ = fs::remove_file(&dst);
                return Err(KingdomError::snapshot(&dst, format!("fsync: {e}")));
            }
        }
        record_snapshot_copy(bytes);
        debug!(
            "snapshot copy {} -> {} ({} B)",
            src.display(),
            dst.display(),
            bytes
        );
        Ok(dst)
    }

    /// Initialize an empty database at a fresh path (bootstrap only).
    pub fn create_empty(&self) -> Result<PathBuf> {
        let path = self.new_path();
        self.engine
            .create(&path)
            .map_err(|e| KingdomError::snapshot(&path, e))?;
        debug!("snapshot created empty {}", path.display());
        Ok(path)
    }

    /// Snapshot files next to the handle that no VersionRecord references.
    /// Includes copies of write sessions that are still open.
    pub fn orphans(&self, registry: &VersionRegistry<E>) -> Result<Vec<PathBuf>> {
        let published: HashSet<PathBuf> = registry
            .history()?
            .into_iter()
            .map(|r| r.snapshot_path)
            .collect();
        let dir = self.dir();
        let entries = fs::read_dir(&dir).map_err(|e| KingdomError::snapshot(&dir, e))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| KingdomError::snapshot(&dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !self.is_snapshot_name(name) {
                continue;
            }
            let path = dir.join(name);
            if !published.contains(&path) {
                out.push(path);
            }
        }
        out.sort();
        Ok(out)
    }

    /// Check every published snapshot exists and still matches its recorded CRC32.
    pub fn verify(&self, registry: &VersionRegistry<E>) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        for rec in registry.history()? {
            report.checked += 1;
            if !rec.snapshot_path.exists() {
                warn!("verify: {} is missing", rec.snapshot_path.display());
                report.missing.push(rec.snapshot_path);
                continue;
            }
            let Some(expected) = rec.checksum else { continue };
            let actual = file_checksum(&rec.snapshot_path)
                .map_err(|e| KingdomError::snapshot(&rec.snapshot_path, format!("{e:#}")))?;
            if actual != expected {
                warn!(
                    "verify: {} crc {:08x} != recorded {:08x}",
                    rec.snapshot_path.display(),
                    actual,
                    expected
                );
                report.mismatched.push(rec.snapshot_path);
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SqliteEngine;
    use std::path::Path;

    fn manager(handle: &str) -> SnapshotManager<SqliteEngine> {
        SnapshotManager::new(handle, SqliteEngine::default(), false)
    }

    #[test]
    fn new_path_keeps_stem_and_extension() {
        let m = manager("sandbox/test.db");
        let p = m.new_path();
        assert_eq!(p.parent(), Some(Path::new("sandbox")));
        let name = p.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("test_") && name.ends_with(".db"), "{name}");
        assert!(m.is_snapshot_name(name));
        assert_ne!(m.new_path(), p, "names must not repeat");
    }

    #[test]
    fn handle_without_extension() {
        let m = manager("kingdom");
        let p = m.new_path();
        assert_eq!(p.parent(), Some(Path::new(".")));
        assert!(m.is_snapshot_name(p.file_name().unwrap().to_str().unwrap()));
    }

    #[test]
    fn sidecar_files_are_not_snapshots() {
        let m = manager("sandbox/test.db");
        let id = Uuid::new_v4();
        assert!(m.is_snapshot_name(&format!("test_{id}.db")));
        assert!(!m.is_snapshot_name(&format!("test_{id}.db-journal")));
        assert!(!m.is_snapshot_name("test.db.lock"));
        assert!(!m.is_snapshot_name("test.db"));
        assert!(!m.is_snapshot_name("test_not-a-uuid.db"));
        assert!(!m.is_snapshot_name(&format!("other_{id}.db")));
    }
}
