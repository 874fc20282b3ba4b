//! session: lock modes and the per-session state machine.
//!
//! - mod.rs:        LockMode, Session (Open -> Closed)
//! - controller.rs: SessionController (open/bootstrap/with_session), connect()
//!
//! A Session is Open from the moment `SessionController::open` returns it. `close(self)`
//! consumes it, so Closed is terminal by construction. Dropping an Open session runs the
//! same close path (write sessions still publish), logging failures instead of returning them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, warn};

use crate::engine::{Engine, EngineConn, EngineError, Row, SqliteEngine};
use crate::error::{KingdomError, Result};
use crate::lock::WriterLock;
use crate::metrics::{record_lock_conflict, record_session_close};
use crate::snapshots::VersionRegistry;

pub mod controller;

pub use controller::{connect, SessionController};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Read the latest snapshot in place (prior name NO_LOCK).
    Read,
    /// Copy on open, publish on close (prior name LOCK).
    Exclusive,
    /// Same behavior as Exclusive (prior name OVERWRITE).
    ExclusiveOverwrite,
}

impl LockMode {
    pub fn is_write(self) -> bool {
        !matches!(self, LockMode::Read)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LockMode::Read => "READ",
            LockMode::Exclusive => "EXCLUSIVE",
            LockMode::ExclusiveOverwrite => "EXCLUSIVE_OVERWRITE",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "read" | "no_lock" => Ok(LockMode::Read),
            "exclusive" | "lock" => Ok(LockMode::Exclusive),
            "exclusive_overwrite" | "overwrite" => Ok(LockMode::ExclusiveOverwrite),
            other => Err(format!(
                "unknown lock mode '{other}' (expected read|exclusive|overwrite)"
            )),
        }
    }
}

/// An open session bound to one snapshot of one handle.
pub struct Session<E: Engine = SqliteEngine> {
    handle: PathBuf,
    mode: LockMode,
    path: PathBuf,
    // None once closed (only observable from Drop).
    conn: Option<E::Conn>,
    // Held by write sessions until their publish is done.
    lock: Option<WriterLock>,
    registry: VersionRegistry<E>,
}

impl<E: Engine> Session<E> {
    pub(crate) fn new(
        handle: PathBuf,
        mode: LockMode,
        path: PathBuf,
        conn: E::Conn,
        lock: Option<WriterLock>,
        registry: VersionRegistry<E>,
    ) -> Self {
        Self {
            handle,
            mode,
            path,
            conn: Some(conn),
            lock,
            registry,
        }
    }

    pub fn handle(&self) -> &Path {
        &self.handle
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Snapshot this session is bound to; fixed for the session's lifetime.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run statements against the bound snapshot. Returns the number of changed rows.
    pub fn execute(&self, sql: &str) -> Result<usize> {
        Ok(self.conn()?.execute(sql)?)
    }

    /// Run statements and return the rows of the last row-producing one.
    pub fn query(&self, sql: &str) -> Result<Vec<Row>> {
        Ok(self.conn()?.query(sql)?)
    }

    /// Release the engine handle; write sessions then publish their snapshot.
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn conn(&self) -> Result<&E::Conn> {
        self.conn
            .as_ref()
            .ok_or_else(|| EngineError::Io("session is closed".into()).into())
    }

    fn finish(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        debug!(
            "closing session on {} with {} ({})",
            self.handle.display(),
            self.mode,
            self.path.display()
        );
        let released = conn.close();
        let result = if self.mode.is_write() {
            self.publish_after(released)
        } else {
            released.map_err(KingdomError::from)
        };
        // Writer lock goes only after publish, so the next writer copies our snapshot.
        drop(self.lock.take());
        record_session_close(self.mode.is_write());
        result
    }

    fn publish_after(&self, released: std::result::Result<(), EngineError>) -> Result<()> {
        if let Err(e) = released {
            record_lock_conflict();
            return Err(KingdomError::lock_conflict(
                &self.handle,
                self.mode,
                format!("releasing {} failed, not published: {e}", self.path.display()),
            ));
        }
        match self.registry.publish(&self.path) {
            Ok(_) => Ok(()),
            Err(e) => {
                record_lock_conflict();
                warn!(
                    "could not update {} with {}: {e}",
                    self.handle.display(),
                    self.mode
                );
                Err(KingdomError::lock_conflict(
                    &self.handle,
                    self.mode,
                    format!("publish of {} failed: {e}", self.path.display()),
                ))
            }
        }
    }
}

impl<E: Engine> Drop for Session<E> {
    fn drop(&mut self) {
        if self.conn.is_none() {
            return;
        }
        if let Err(e) = self.finish() {
            warn!("session drop on {}: {e}", self.handle.display());
        }
    }
}

impl<E: Engine> fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("mode", &self.mode)
            .field("path", &self.path)
            .field("open", &self.conn.is_some())
            .finish()
    }
}
