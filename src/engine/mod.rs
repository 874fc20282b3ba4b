//! engine: boundary to the embedded SQL engine.
//!
//! - mod.rs:    `Engine`/`EngineConn` traits, `Access`, `Value`, `EngineError`
//! - sqlite.rs: default implementation over rusqlite (bundled SQLite)
//!
//! The versioning layer only needs: open one physical file read-only or read-write,
//! create an empty database, run statements, fetch rows, close.

use std::fmt;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

pub mod sqlite;

pub use sqlite::{SqliteConn, SqliteEngine};

/// Access mode for a single physical database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Access could not be granted or the file could not be read/written.
    #[error("engine I/O: {0}")]
    Io(String),
    /// Statement failed (syntax, missing table, constraint, ...).
    #[error("engine SQL: {0}")]
    Sql(String),
}

impl EngineError {
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// A single result cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Blob(b) => write!(f, "(blob {} B)", b.len()),
        }
    }
}

pub type Row = Vec<Value>;

/// Factory for engine handles. Cloned into every registry/snapshot/session that needs it.
pub trait Engine: Clone + Send + Sync + 'static {
    type Conn: EngineConn;

    /// Open an existing physical file. Fails with `EngineError::Io` if access cannot be granted.
    fn connect(&self, path: &Path, access: Access) -> Result<Self::Conn, EngineError>;

    /// Initialize an empty database at `path` (the file must not exist yet).
    fn create(&self, path: &Path) -> Result<(), EngineError>;
}

/// One open handle to one physical file.
pub trait EngineConn: Send {
    /// Run one or more statements, discarding rows. Returns the number of changed rows.
    fn execute(&self, sql: &str) -> Result<usize, EngineError>;

    /// Run one or more statements; rows of the last row-producing statement are returned.
    fn query(&self, sql: &str) -> Result<Vec<Row>, EngineError>;

    /// Release the handle. On error the handle is released anyway.
    fn close(self) -> Result<(), EngineError>;
}
