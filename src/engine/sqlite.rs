//! SQLite engine (rusqlite, bundled).
//!
//! Read-only handles are opened with SQLITE_OPEN_READ_ONLY, read-write handles without
//! SQLITE_OPEN_CREATE: a session must never silently create the file it was bound to.

use std::path::Path;
use std::time::Duration;

use log::debug;
use rusqlite::{Batch, Connection, ErrorCode, OpenFlags};

use super::{Access, Engine, EngineConn, EngineError, Row, Value};

#[derive(Clone, Debug)]
pub struct SqliteEngine {
    busy_timeout: Duration,
}

impl Default for SqliteEngine {
    fn default() -> Self {
        Self::new(Duration::from_millis(5_000))
    }
}

impl SqliteEngine {
    pub fn new(busy_timeout: Duration) -> Self {
        Self { busy_timeout }
    }

    fn open(&self, path: &Path, flags: OpenFlags) -> Result<Connection, EngineError> {
        let conn = Connection::open_with_flags(path, flags)
            .map_err(|e| classify(&e, &format!("open {}", path.display())))?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| classify(&e, "busy_timeout"))?;
        Ok(conn)
    }
}

impl Engine for SqliteEngine {
    type Conn = SqliteConn;

    fn connect(&self, path: &Path, access: Access) -> Result<SqliteConn, EngineError> {
        // SQLite would treat a missing file opened read-only as a generic CANTOPEN; report it plainly.
        if !path.exists() {
            return Err(EngineError::Io(format!("{} does not exist", path.display())));
        }
        let flags = match access {
            Access::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            Access::ReadWrite => {
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX
            }
        };
        debug!("sqlite connect {} ({:?})", path.display(), access);
        let conn = self.open(path, flags)?;
        Ok(SqliteConn { conn })
    }

    fn create(&self, path: &Path) -> Result<(), EngineError> {
        if path.exists() {
            return Err(EngineError::Io(format!("{} already exists", path.display())));
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = self.open(path, flags)?;
        // Force the header page to disk so the file is a real (empty) database, not 0 bytes.
        conn.execute_batch("PRAGMA user_version = 0; VACUUM;")
            .map_err(|e| classify(&e, "initialize empty database"))?;
        conn.close().map_err(|(_, e)| classify(&e, "close"))?;
        debug!("sqlite created empty database {}", path.display());
        Ok(())
    }
}

pub struct SqliteConn {
    conn: Connection,
}

impl EngineConn for SqliteConn {
    fn execute(&self, sql: &str) -> Result<usize, EngineError> {
        let mut changed = 0usize;
        let mut batch = Batch::new(&self.conn, sql);
        while let Some(mut stmt) = batch.next().map_err(|e| classify(&e, "prepare"))? {
            if stmt.column_count() == 0 {
                changed += stmt.execute([]).map_err(|e| classify(&e, "execute"))?;
            } else {
                // Row-producing statement inside execute(): drain and ignore the rows.
                let mut rows = stmt.query([]).map_err(|e| classify(&e, "query"))?;
                while rows.next().map_err(|e| classify(&e, "step"))?.is_some() {}
            }
        }
        Ok(changed)
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>, EngineError> {
        let mut out: Vec<Row> = Vec::new();
        let mut batch = Batch::new(&self.conn, sql);
        while let Some(mut stmt) = batch.next().map_err(|e| classify(&e, "prepare"))? {
            let cols = stmt.column_count();
            if cols == 0 {
                stmt.execute([]).map_err(|e| classify(&e, "execute"))?;
                continue;
            }
            let mut last = Vec::new();
            let mut rows = stmt.query([]).map_err(|e| classify(&e, "query"))?;
            while let Some(row) = rows.next().map_err(|e| classify(&e, "step"))? {
                let mut vals = Vec::with_capacity(cols);
                for i in 0..cols {
                    let v: rusqlite::types::Value =
                        row.get(i).map_err(|e| classify(&e, "column"))?;
                    vals.push(match v {
                        rusqlite::types::Value::Null => Value::Null,
                        rusqlite::types::Value::Integer(i) => Value::Integer(i),
                        rusqlite::types::Value::Real(f) => Value::Real(f),
                        rusqlite::types::Value::Text(s) => Value::Text(s),
                        rusqlite::types::Value::Blob(b) => Value::Blob(b),
                    });
                }
                last.push(vals);
            }
            out = last;
        }
        Ok(out)
    }

    fn close(self) -> Result<(), EngineError> {
        // On failure rusqlite hands the connection back; dropping it releases the handle.
        self.conn.close().map_err(|(_conn, e)| classify(&e, "close"))
    }
}

/// I/O-class SQLite failures (access denied, busy, unreadable file) vs statement failures.
fn classify(err: &rusqlite::Error, what: &str) -> EngineError {
    let io = match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.code,
            ErrorCode::CannotOpen
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::ReadOnly
                | ErrorCode::PermissionDenied
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::FileLockingProtocolFailed
        ),
        rusqlite::Error::InvalidPath(_) => true,
        _ => false,
    };
    if io {
        EngineError::Io(format!("{what}: {err}"))
    } else {
        EngineError::Sql(format!("{what}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    fn unique_file(prefix: &str) -> PathBuf {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "kingdom-sqlite-{prefix}-{}-{id}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("body.db")
    }

    #[test]
    fn query_returns_rows_of_last_statement() {
        let path = unique_file("multi");
        let engine = SqliteEngine::default();
        engine.create(&path).unwrap();

        let conn = engine.connect(&path, Access::ReadWrite).unwrap();
        let rows = conn
            .query("CREATE TABLE test AS SELECT 1; SELECT * FROM test;")
            .unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(1)]]);
        conn.close().unwrap();
    }

    #[test]
    fn read_only_handle_rejects_writes() {
        let path = unique_file("ro");
        let engine = SqliteEngine::default();
        engine.create(&path).unwrap();

        let conn = engine.connect(&path, Access::ReadOnly).unwrap();
        assert_eq!(conn.query("SELECT 1").unwrap(), vec![vec![Value::Integer(1)]]);
        let err = conn.execute("CREATE TABLE t (x)").unwrap_err();
        assert!(err.is_io(), "write through RO handle must be I/O-class: {err}");
    }

    #[test]
    fn connect_missing_file_is_io_error() {
        let path = unique_file("missing").with_file_name("nope.db");
        let err = SqliteEngine::default()
            .connect(&path, Access::ReadOnly)
            .err()
            .expect("missing file must fail");
        assert!(err.is_io());
    }

    #[test]
    fn statement_errors_are_sql_class() {
        let path = unique_file("sql");
        let engine = SqliteEngine::default();
        engine.create(&path).unwrap();
        let conn = engine.connect(&path, Access::ReadOnly).unwrap();
        let err = conn.query("SELECT * FROM missing_table").unwrap_err();
        assert!(!err.is_io(), "{err}");
    }
}
