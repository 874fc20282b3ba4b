//! Version registry: append-only log of published snapshots.
//!
//! Формат: the handle itself is a SQLite file (opened through `Engine`) with one table
//!
//!   versions(seq INTEGER PRIMARY KEY AUTOINCREMENT,
//!            body TEXT NOT NULL,           -- snapshot file name, relative to the handle dir
//!            published_at INTEGER NOT NULL, -- UNIX nanos
//!            checksum INTEGER)             -- CRC32 of the snapshot at publish time
//!
//! Замечания:
//! - Rows are never updated or deleted. "latest" = max(published_at), ties -> max(seq).
//! - published_at is stored as max(now, previous max + 1): publish order == latest order.
//! - Storage is opened per call and released before returning.
//! - Bootstrap builds the registry in a temp file and renames it into place, so a registry
//!   never exists without its first record.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info};
use serde::Serialize;
use uuid::Uuid;

use crate::engine::{Access, Engine, EngineConn, EngineError, Row, Value};
use crate::error::{KingdomError, Result};
use crate::metrics::record_publish;
use crate::util::{file_checksum, now_nanos, quote_literal};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS versions (\
    seq INTEGER PRIMARY KEY AUTOINCREMENT, \
    body TEXT NOT NULL, \
    published_at INTEGER NOT NULL, \
    checksum INTEGER)";

const SELECT_COLUMNS: &str = "SELECT seq, body, published_at, checksum FROM versions";

/// One publish event. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionRecord {
    pub seq: i64,
    pub snapshot_path: PathBuf,
    /// UNIX time in nanoseconds.
    pub published_at: i64,
    pub checksum: Option<u32>,
}

impl VersionRecord {
    pub fn published_at_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.published_at.max(0) as u64)
    }
}

#[derive(Clone, Debug)]
pub struct VersionRegistry<E: Engine> {
    handle: PathBuf,
    engine: E,
}

impl<E: Engine> VersionRegistry<E> {
    pub fn new(handle: impl Into<PathBuf>, engine: E) -> Self {
        Self {
            handle: handle.into(),
            engine,
        }
    }

    pub fn handle(&self) -> &Path {
        &self.handle
    }

    /// Registry storage exists (the handle has been bootstrapped).
    pub fn exists(&self) -> bool {
        self.handle.exists()
    }

    /// Directory holding the registry and every snapshot of this handle.
    pub fn dir(&self) -> PathBuf {
        match self.handle.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Create registry storage holding a single record for `first`.
    /// Caller guarantees exclusivity (bootstrap runs under the writer lock).
    pub fn initialize(&self, first: &Path) -> Result<VersionRecord> {
        if self.exists() {
            return Err(self.err("already initialized"));
        }
        let tmp = self.dir().join(format!(
            "{}.bootstrap-{}",
            self.file_name(),
            Uuid::new_v4()
        ));

        let built = self.build_storage(&tmp, first);
        let record = match built {
            Ok(r) => r,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };

        fs::rename(&tmp, &self.handle).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            self.err(format!("rename {} -> registry: {e}", tmp.display()))
        })?;
        info!(
            "registry {}: initialized with {}",
            self.handle.display(),
            record.snapshot_path.display()
        );
        Ok(record)
    }

    fn build_storage(&self, tmp: &Path, first: &Path) -> Result<VersionRecord> {
        self.engine
            .create(tmp)
            .map_err(|e| self.err(format!("create {}: {e}", tmp.display())))?;
        let conn = self
            .engine
            .connect(tmp, Access::ReadWrite)
            .map_err(|e| self.engine_err(e))?;
        let appended = conn
            .execute(SCHEMA)
            .map_err(|e| self.engine_err(e))
            .and_then(|_| self.append(&conn, first));
        conn.close().map_err(|e| self.engine_err(e))?;
        appended
    }

    /// Path of the snapshot published most recently.
    pub fn latest(&self) -> Result<PathBuf> {
        Ok(self.latest_record()?.snapshot_path)
    }

    pub fn latest_record(&self) -> Result<VersionRecord> {
        let conn = self
            .engine
            .connect(&self.handle, Access::ReadOnly)
            .map_err(|e| self.engine_err(e))?;
        let rows = conn.query(&format!(
            "{SELECT_COLUMNS} ORDER BY published_at DESC, seq DESC LIMIT 1"
        ));
        self.release_ro(conn);
        let rows = rows.map_err(|e| self.engine_err(e))?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| self.err("no published version"))?;
        let rec = self.record_from_row(row)?;
        debug!(
            "registry {}: latest is {} (seq {})",
            self.handle.display(),
            rec.snapshot_path.display(),
            rec.seq
        );
        Ok(rec)
    }

    /// Append a record for `snapshot_path`, making it the new latest.
    pub fn publish(&self, snapshot_path: &Path) -> Result<VersionRecord> {
        let conn = self
            .engine
            .connect(&self.handle, Access::ReadWrite)
            .map_err(|e| self.engine_err(e))?;
        let appended = self.append(&conn, snapshot_path);
        let closed = conn.close().map_err(|e| self.engine_err(e));
        let rec = appended?;
        closed?;
        record_publish();
        info!(
            "registry {}: published {} (seq {})",
            self.handle.display(),
            rec.snapshot_path.display(),
            rec.seq
        );
        Ok(rec)
    }

    /// All records in append order.
    pub fn history(&self) -> Result<Vec<VersionRecord>> {
        let conn = self
            .engine
            .connect(&self.handle, Access::ReadOnly)
            .map_err(|e| self.engine_err(e))?;
        let rows = conn.query(&format!("{SELECT_COLUMNS} ORDER BY seq ASC"));
        self.release_ro(conn);
        rows.map_err(|e| self.engine_err(e))?
            .into_iter()
            .map(|row| self.record_from_row(row))
            .collect()
    }

    fn append(&self, conn: &E::Conn, snapshot_path: &Path) -> Result<VersionRecord> {
        let body = self.body_for(snapshot_path)?;
        let checksum = file_checksum(snapshot_path)
            .map_err(|e| self.err(format!("checksum {}: {e:#}", snapshot_path.display())))?;
        let now = now_nanos();
        // Single statement: the insert is all-or-nothing.
        let rows = conn
            .query(&format!(
                "INSERT INTO versions (body, published_at, checksum) \
                 SELECT {body}, max({now}, coalesce(max(published_at) + 1, {now})), {checksum} \
                 FROM versions; \
                 {SELECT_COLUMNS} WHERE seq = last_insert_rowid()",
                body = quote_literal(&body),
            ))
            .map_err(|e| self.engine_err(e))?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| self.err("appended record not readable"))?;
        self.record_from_row(row)
    }

    /// Snapshots are stored by file name; they must live next to the handle.
    fn body_for(&self, snapshot_path: &Path) -> Result<String> {
        let name = snapshot_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| self.err(format!("bad snapshot path {}", snapshot_path.display())))?;
        let expected = self.dir().join(name);
        let parent_matches = match snapshot_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p == self.dir(),
            _ => self.dir() == Path::new("."),
        };
        if !parent_matches {
            return Err(self.err(format!(
                "snapshot {} is not in {} (expected {})",
                snapshot_path.display(),
                self.dir().display(),
                expected.display()
            )));
        }
        Ok(name.to_string())
    }

    fn record_from_row(&self, row: Row) -> Result<VersionRecord> {
        match row.as_slice() {
            [Value::Integer(seq), Value::Text(body), Value::Integer(ts), crc] => {
                Ok(VersionRecord {
                    seq: *seq,
                    snapshot_path: self.dir().join(body),
                    published_at: *ts,
                    checksum: crc.as_i64().map(|c| c as u32),
                })
            }
            other => Err(self.err(format!("malformed version row: {other:?}"))),
        }
    }

    fn file_name(&self) -> String {
        self.handle
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "registry".to_string())
    }

    fn err(&self, message: impl ToString) -> KingdomError {
        KingdomError::registry(&self.handle, message)
    }

    fn engine_err(&self, e: EngineError) -> KingdomError {
        KingdomError::registry_engine(&self.handle, e)
    }

    // Read-only handle: nothing was written, a failed close only gets logged.
    fn release_ro(&self, conn: E::Conn) {
        if let Err(e) = conn.close() {
            debug!("registry {}: read-only close: {e}", self.handle.display());
        }
    }
}
