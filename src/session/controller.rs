//! SessionController: opens sessions on one handle.
//!
//! open(mode):
//!   1) bootstrap (no-op once the registry exists)
//!   2) Read:  latest -> connect read-only
//!      Write: try writer lock -> copy_from_latest -> connect read-write
//!   3) Engine I/O failure during open -> LockConflict: connecting to the snapshot, and
//!      resolving latest from the registry (busy/locked/unreadable registry file)
//!
//! Other registry and snapshot failures surface as themselves; only the conditions a caller
//! is expected to retry on are reported as LockConflict. bootstrap/latest/history outside of
//! open keep their Registry errors.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::config::KingdomConfig;
use crate::engine::{Access, Engine, SqliteEngine};
use crate::error::{KingdomError, Result};
use crate::lock::WriterLock;
use crate::metrics::{record_bootstrap, record_lock_conflict, record_session_open};
use crate::snapshots::{SnapshotManager, VerifyReport, VersionRecord, VersionRegistry};
use crate::util::file_checksum;

use super::{LockMode, Session};

pub struct SessionController<E: Engine = SqliteEngine> {
    handle: PathBuf,
    cfg: KingdomConfig,
    engine: E,
    registry: VersionRegistry<E>,
    snapshots: SnapshotManager<E>,
}

impl SessionController<SqliteEngine> {
    /// Controller over SQLite with configuration from env.
    pub fn new(handle: impl Into<PathBuf>) -> Self {
        Self::with_config(handle, KingdomConfig::from_env())
    }

    pub fn with_config(handle: impl Into<PathBuf>, cfg: KingdomConfig) -> Self {
        let engine = cfg.sqlite_engine();
        Self::with_engine(handle, cfg, engine)
    }
}

impl<E: Engine> SessionController<E> {
    pub fn with_engine(handle: impl Into<PathBuf>, cfg: KingdomConfig, engine: E) -> Self {
        let handle = handle.into();
        Self {
            registry: VersionRegistry::new(handle.clone(), engine.clone()),
            snapshots: SnapshotManager::new(handle.clone(), engine.clone(), cfg.fsync_snapshots),
            handle,
            cfg,
            engine,
        }
    }

    pub fn handle(&self) -> &Path {
        &self.handle
    }

    pub fn config(&self) -> &KingdomConfig {
        &self.cfg
    }

    pub fn registry(&self) -> &VersionRegistry<E> {
        &self.registry
    }

    pub fn snapshots(&self) -> &SnapshotManager<E> {
        &self.snapshots
    }

    /// Create registry + initial empty snapshot if the handle has none. Idempotent.
    pub fn bootstrap(&self) -> Result<()> {
        if self.registry.exists() {
            return Ok(());
        }
        if let Some(dir) = self.handle.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| KingdomError::registry(&self.handle, format!("create dir: {e}")))?;
        }

        // Serialize racing bootstraps; the loser sees the registry after the re-check.
        // Bounded wait: the holder may be a writer of this process whose registry vanished.
        let _guard = WriterLock::acquire_within(&self.handle, self.cfg.busy_timeout())
            .map_err(|e| KingdomError::registry(&self.handle, format!("{e:#}")))?;
        if self.registry.exists() {
            return Ok(());
        }

        let first = self.snapshots.create_empty()?;
        if let Err(e) = self.registry.initialize(&first) {
            let _ = std::fs::remove_file(&first);
            return Err(e);
        }
        record_bootstrap();
        info!("bootstrapped {} -> {}", self.handle.display(), first.display());
        Ok(())
    }

    /// Open a session. Write modes fail with LockConflict while another writer is open.
    pub fn open(&self, mode: LockMode) -> Result<Session<E>> {
        debug!("opening {} with {}", self.handle.display(), mode);
        self.bootstrap()?;

        let session = if mode.is_write() {
            self.open_write(mode)?
        } else {
            self.open_read()?
        };
        record_session_open(mode.is_write());
        Ok(session)
    }

    fn open_read(&self) -> Result<Session<E>> {
        let mode = LockMode::Read;
        let path = self
            .resolve_latest()
            .map_err(|e| self.io_as_conflict(e, mode))?;
        let conn = self.connect(&path, Access::ReadOnly, mode)?;
        Ok(Session::new(
            self.handle.clone(),
            mode,
            path,
            conn,
            None,
            self.registry.clone(),
        ))
    }

    fn open_write(&self, mode: LockMode) -> Result<Session<E>> {
        let lock = WriterLock::try_acquire(&self.handle).map_err(|e| {
            record_lock_conflict();
            warn!("{} is locked by another writer", self.handle.display());
            KingdomError::lock_conflict(&self.handle, mode, format!("{e:#}"))
        })?;

        if self.cfg.verify_on_open {
            self.resolve_latest()
                .map_err(|e| self.io_as_conflict(e, mode))?;
        }
        let path = self
            .snapshots
            .copy_from_latest(&self.registry)
            .map_err(|e| self.io_as_conflict(e, mode))?;
        let conn = match self.connect(&path, Access::ReadWrite, mode) {
            Ok(c) => c,
            Err(e) => {
                // Never bound, never published: drop the copy right away.
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
        };
        Ok(Session::new(
            self.handle.clone(),
            mode,
            path,
            conn,
            Some(lock),
            self.registry.clone(),
        ))
    }

    /// Latest snapshot path, checked against its record when verify_on_open is set.
    fn resolve_latest(&self) -> Result<PathBuf> {
        if !self.cfg.verify_on_open {
            return self.registry.latest();
        }
        let rec = self.registry.latest_record()?;
        if let Some(expected) = rec.checksum {
            let actual = file_checksum(&rec.snapshot_path).map_err(|e| {
                KingdomError::snapshot(&rec.snapshot_path, format!("{e:#}"))
            })?;
            if actual != expected {
                return Err(KingdomError::snapshot(
                    &rec.snapshot_path,
                    format!("crc {actual:08x} != recorded {expected:08x}"),
                ));
            }
        }
        Ok(rec.snapshot_path)
    }

    /// Registry I/O failure while opening is reported like any other engine I/O failure.
    fn io_as_conflict(&self, e: KingdomError, mode: LockMode) -> KingdomError {
        if !e.is_registry_io() {
            return e;
        }
        record_lock_conflict();
        warn!("{} registry not accessible for {}: {e}", self.handle.display(), mode);
        KingdomError::lock_conflict(&self.handle, mode, e)
    }

    fn connect(&self, path: &Path, access: Access, mode: LockMode) -> Result<E::Conn> {
        self.engine.connect(path, access).map_err(|e| {
            if e.is_io() {
                record_lock_conflict();
                KingdomError::lock_conflict(&self.handle, mode, e)
            } else {
                KingdomError::Engine(e)
            }
        })
    }

    /// Open, run `f`, close on every exit path. An error from `f` wins over a close error.
    pub fn with_session<T, F>(&self, mode: LockMode, f: F) -> Result<T>
    where
        F: FnOnce(&Session<E>) -> Result<T>,
    {
        let session = self.open(mode)?;
        let out = f(&session);
        let closed = session.close();
        match (out, closed) {
            (Ok(v), Ok(())) => Ok(v),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!("close after failed session body: {close_err}");
                Err(e)
            }
        }
    }

    pub fn latest(&self) -> Result<PathBuf> {
        self.registry.latest()
    }

    pub fn history(&self) -> Result<Vec<VersionRecord>> {
        self.registry.history()
    }

    pub fn verify(&self) -> Result<VerifyReport> {
        self.snapshots.verify(&self.registry)
    }

    pub fn orphans(&self) -> Result<Vec<PathBuf>> {
        self.snapshots.orphans(&self.registry)
    }
}

/// Open a session on `handle` with the default engine and env configuration.
pub fn connect(handle: impl AsRef<Path>, mode: LockMode) -> Result<Session> {
    SessionController::new(handle.as_ref()).open(mode)
}
