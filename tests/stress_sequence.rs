// tests/stress_sequence.rs
//
// Случайная последовательность сессий (oorandom, фиксированный seed):
// писатели пишут значение и закрывают (или бросают через Drop), попутно открываются читатели
// и конкурирующие писатели. Инвариант: новый READ всегда видит значение последнего
// закрытого писателя; конкурирующий писатель всегда получает LockConflict.

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
    std::env::temp_dir()
        .join(format!("kingdomtest-stress-{prefix}-{pid}-{t}-{id}"))
        .join("test.db")
}

fn read_value(ctl: &SessionController) -> Result<i64> {
    let rows = ctl.with_session(LockMode::Read, |s| s.query("select v from cur"))?;
    match rows.as_slice() {
        [row] => match row.as_slice() {
            [Value::Integer(v)] => Ok(*v),
            other => anyhow::bail!("unexpected row {other:?}"),
        },
        other => anyhow::bail!("unexpected rows {other:?}"),
    }
}

#[test]
fn random_session_sequence_keeps_last_close() -> Result<()> {
    let ctl = SessionController::with_config(
        unique_handle("seq"),
        KingdomConfig::default().with_fsync_snapshots(false),
    );
    ctl.with_session(LockMode::Exclusive, |s| {
        s.execute("create table cur (v integer); insert into cur values (0)")?;
        Ok(())
    })?;

    let mut rng = oorandom::Rand32::new(0x6b69_6e67);
    let mut expected = 0i64;
    let mut publishes = 1usize;

    for step in 1..=60i64 {
        match rng.rand_range(0..4) {
            0 | 1 => {
                let mode = if rng.rand_range(0..2) == 0 {
                    LockMode::Exclusive
                } else {
                    LockMode::ExclusiveOverwrite
                };
                let w = ctl.open(mode)?;
                w.execute(&format!("update cur set v = {step}"))?;

                // Reader during the write sees the previous value.
                assert_eq!(read_value(&ctl)?, expected, "step {step}: in-flight write leaked");
                // Competing writer is refused.
                let competing = ctl.open(LockMode::Exclusive);
                assert!(
                    matches!(&competing, Err(e) if e.is_lock_conflict()),
                    "step {step}: competing writer opened"
                );

                if rng.rand_range(0..3) == 0 {
                    drop(w);
                } else {
                    w.close()?;
                }
                expected = step;
                publishes += 1;
            }
            2 => {
                let r = ctl.open(LockMode::Read)?;
                let pinned = r.query("select v from cur")?;
                ctl.with_session(LockMode::Exclusive, |s| {
                    s.execute(&format!("update cur set v = {step}"))?;
                    Ok(())
                })?;
                expected = step;
                publishes += 1;
                // Open reader keeps its snapshot.
                assert_eq!(r.query("select v from cur")?, pinned);
                r.close()?;
            }
            _ => {
                assert_eq!(read_value(&ctl)?, expected, "step {step}");
            }
        }
    }

    assert_eq!(read_value(&ctl)?, expected);
    // bootstrap + table creation + one per write step
    assert_eq!(ctl.history()?.len(), publishes + 1);
    assert!(ctl.verify()?.is_ok());
    Ok(())
}
