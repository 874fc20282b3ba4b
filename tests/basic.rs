// tests/basic.rs
//
// Базовый жизненный цикл:
// - каждый режим открывается на свежем handle и выполняет SELECT 1;
// - bootstrap идемпотентен (ровно одна начальная версия);
// - сценарий A..E: запись видна читателям только после close писателя;
// - copy_from_latest без изменений сохраняет содержимое.
//
// Запуск:
//   cargo test --test basic -- --nocapture

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use kingdom::{KingdomConfig, LockMode, SessionController, Value};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_handle(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base = std::env::temp_dir();
    base.join(format!("kingdomtest-basic-{prefix}-{pid}-{t}-{id}"))
        .join("test.db")
}

fn controller(prefix: &str) -> SessionController {
    SessionController::with_config(
        unique_handle(prefix),
        KingdomConfig::default().with_fsync_snapshots(false),
    )
}

fn one(v: i64) -> Vec<Vec<Value>> {
    vec![vec![Value::Integer(v)]]
}

#[test]
fn select_one_in_every_mode() -> Result<()> {
    let ctl = controller("select1");
    for mode in [LockMode::Exclusive, LockMode::ExclusiveOverwrite, LockMode::Read] {
        let s = ctl.open(mode)?;
        assert_eq!(s.mode(), mode);
        assert_eq!(s.query("select 1;")?, one(1), "mode {mode}");
        s.close()?;
    }
    Ok(())
}

#[test]
fn bootstrap_is_idempotent() -> Result<()> {
    let ctl = controller("bootstrap");
    assert!(!ctl.handle().exists());

    ctl.bootstrap()?;
    let first = ctl.latest()?;
    ctl.bootstrap()?;

    let hist = ctl.history()?;
    assert_eq!(hist.len(), 1, "bootstrap twice must leave one record");
    assert_eq!(hist[0].snapshot_path, first);
    assert!(first.exists());

    // Independent controller on the same handle sees the same registry.
    let other = SessionController::with_config(ctl.handle(), KingdomConfig::default());
    other.bootstrap()?;
    assert_eq!(other.history()?.len(), 1);
    Ok(())
}

#[test]
fn read_open_bootstraps_missing_handle() -> Result<()> {
    let ctl = controller("read-bootstrap");
    let s = ctl.open(LockMode::Read)?;
    assert_eq!(s.path(), ctl.latest()?.as_path());
    assert_eq!(s.query("select 1")?, one(1));
    s.close()?;
    assert_eq!(ctl.history()?.len(), 1, "read sessions never publish");
    Ok(())
}

#[test]
fn writes_become_visible_only_after_close() -> Result<()> {
    let ctl = controller("scenario");

    // A
    let a = ctl.open(LockMode::Exclusive)?;
    a.execute("create table t as select 1")?;
    a.close()?;

    // B
    let b = ctl.open(LockMode::Read)?;
    assert_eq!(b.query("select * from t")?, one(1));

    // C, still open while D reads
    let c = ctl.open(LockMode::Exclusive)?;
    c.execute("drop table t; create table t as select 2")?;
    assert_eq!(c.query("select * from t")?, one(2));

    let d = ctl.open(LockMode::Read)?;
    assert_eq!(d.query("select * from t")?, one(1), "pre-C state while C is open");
    c.close()?;

    // D stays on its snapshot after C publishes
    assert_eq!(d.query("select * from t")?, one(1));

    let e = ctl.open(LockMode::Read)?;
    assert_eq!(e.query("select * from t")?, one(2));

    b.close()?;
    d.close()?;
    e.close()?;
    Ok(())
}

#[test]
fn bound_path_is_fixed_and_write_copy_is_private() -> Result<()> {
    let ctl = controller("paths");
    ctl.bootstrap()?;
    let latest = ctl.latest()?;

    let w = ctl.open(LockMode::ExclusiveOverwrite)?;
    assert_ne!(w.path(), latest.as_path(), "writer must work on a copy");
    assert_eq!(ctl.latest()?, latest, "copy is not latest until close");
    let bound = w.path().to_path_buf();
    w.execute("create table x (v integer); insert into x values (7)")?;
    assert_eq!(w.path(), bound.as_path());
    w.close()?;

    assert_eq!(ctl.latest()?, bound);
    Ok(())
}

#[test]
fn unchanged_copy_round_trips_content() -> Result<()> {
    let ctl = controller("roundtrip");
    ctl.with_session(LockMode::Exclusive, |s| {
        s.execute("create table kv (k text primary key, v integer)")?;
        s.execute("insert into kv values ('a', 1), ('b', 2), ('it''s', 3)")?;
        Ok(())
    })?;
    let before = ctl.latest()?;

    // Writer that changes nothing.
    let w = ctl.open(LockMode::Exclusive)?;
    w.close()?;
    let after = ctl.latest()?;
    assert_ne!(before, after, "a new snapshot is published");

    assert_eq!(fs::read(&before)?, fs::read(&after)?, "byte content unchanged");
    let rows = ctl.with_session(LockMode::Read, |s| s.query("select k, v from kv order by k"))?;
    assert_eq!(
        rows,
        vec![
            vec![Value::from("a"), Value::Integer(1)],
            vec![Value::from("b"), Value::Integer(2)],
            vec![Value::from("it's"), Value::Integer(3)],
        ]
    );
    Ok(())
}

#[test]
fn concurrent_readers_see_identical_results() -> Result<()> {
    let ctl = controller("readers");
    ctl.with_session(LockMode::Exclusive, |s| {
        s.execute("create table n as select 42 as v")?;
        Ok(())
    })?;

    let handle = ctl.handle().to_path_buf();
    let threads: Vec<_> = (0..8)
        .map(|_| {
            let handle = handle.clone();
            std::thread::spawn(move || -> Result<Vec<Vec<Value>>> {
                let ctl = SessionController::with_config(handle, KingdomConfig::default());
                let s = ctl.open(LockMode::Read)?;
                let rows = s.query("select v from n")?;
                s.close()?;
                Ok(rows)
            })
        })
        .collect();

    // A writer runs alongside; it must not disturb the readers.
    ctl.with_session(LockMode::Exclusive, |s| {
        s.execute("update n set v = 43")?;
        Ok(())
    })?;

    for t in threads {
        let rows = t.join().expect("reader thread panicked")?;
        assert!(rows == one(42) || rows == one(43), "unexpected rows {rows:?}");
    }
    Ok(())
}

#[test]
fn many_readers_on_one_snapshot() -> Result<()> {
    let ctl = controller("n-readers");
    ctl.with_session(LockMode::Exclusive, |s| {
        s.execute("create table t as select 5")?;
        Ok(())
    })?;

    let readers: Vec<_> = (0..5).map(|_| ctl.open(LockMode::Read)).collect::<Result<_, _>>()?;
    for r in &readers {
        assert_eq!(r.path(), readers[0].path());
        assert_eq!(r.query("select * from t")?, one(5));
    }
    for r in readers {
        r.close()?;
    }
    Ok(())
}
