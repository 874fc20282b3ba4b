//! Error types for the versioning/locking layer.
//!
//! `LockConflict` is the failure callers are expected to catch: it covers a busy writer lock,
//! engine I/O failures while binding a session, and a failed publish at close.

use std::path::PathBuf;

use thiserror::Error;

use crate::engine::EngineError;
use crate::session::LockMode;

pub type Result<T> = std::result::Result<T, KingdomError>;

#[derive(Debug, Error)]
pub enum KingdomError {
    /// Version registry could not be created, read or appended to.
    /// `source` is set when the engine itself failed (e.g. the registry file is locked).
    #[error("registry {}: {message}", .path.display())]
    Registry {
        path: PathBuf,
        message: String,
        source: Option<EngineError>,
    },

    /// Snapshot copy/creation failed, or a published snapshot does not match its record.
    #[error("snapshot {}: {message}", .path.display())]
    Snapshot { path: PathBuf, message: String },

    #[error("could not open {} with {mode}: {reason}", .handle.display())]
    LockConflict {
        handle: PathBuf,
        mode: LockMode,
        reason: String,
    },

    /// Statement-level failure passed through from the engine.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl KingdomError {
    pub(crate) fn registry(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Registry {
            path: path.into(),
            message: message.to_string(),
            source: None,
        }
    }

    pub(crate) fn registry_engine(path: impl Into<PathBuf>, e: EngineError) -> Self {
        Self::Registry {
            path: path.into(),
            message: e.to_string(),
            source: Some(e),
        }
    }

    pub(crate) fn snapshot(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Snapshot {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn lock_conflict(
        handle: impl Into<PathBuf>,
        mode: LockMode,
        reason: impl ToString,
    ) -> Self {
        Self::LockConflict {
            handle: handle.into(),
            mode,
            reason: reason.to_string(),
        }
    }

    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::LockConflict { .. })
    }

    /// Registry access failed at the engine I/O level (busy, locked, cannot open).
    pub fn is_registry_io(&self) -> bool {
        matches!(self, Self::Registry { source: Some(e), .. } if e.is_io())
    }
}
