//! Lightweight global metrics for Kingdom.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - Sessions (open/close by mode, active writers)
//! - Lock conflicts
//! - Registry (bootstraps, publishes)
//! - Snapshots (copies, bytes copied)

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

// ----- Sessions -----
static READ_SESSIONS_OPENED: AtomicU64 = AtomicU64::new(0);
static WRITE_SESSIONS_OPENED: AtomicU64 = AtomicU64::new(0);
static SESSIONS_CLOSED: AtomicU64 = AtomicU64::new(0);
static WRITERS_ACTIVE: AtomicU64 = AtomicU64::new(0);

// ----- Lock conflicts -----
static LOCK_CONFLICTS: AtomicU64 = AtomicU64::new(0);

// ----- Registry -----
static REGISTRY_BOOTSTRAPS: AtomicU64 = AtomicU64::new(0);
static REGISTRY_PUBLISHES: AtomicU64 = AtomicU64::new(0);

// ----- Snapshots -----
static SNAPSHOT_COPIES: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_BYTES_COPIED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub read_sessions_opened: u64,
    pub write_sessions_opened: u64,
    pub sessions_closed: u64,
    pub writers_active: u64,

    pub lock_conflicts: u64,

    pub registry_bootstraps: u64,
    pub registry_publishes: u64,

    pub snapshot_copies: u64,
    pub snapshot_bytes_copied: u64,
}

impl MetricsSnapshot {
    pub fn avg_copy_bytes(&self) -> f64 {
        if self.snapshot_copies == 0 {
            0.0
        } else {
            self.snapshot_bytes_copied as f64 / self.snapshot_copies as f64
        }
    }
}

// ----- Recorders (Sessions) -----
pub fn record_session_open(write: bool) {
    if write {
        WRITE_SESSIONS_OPENED.fetch_add(1, Ordering::Relaxed);
        WRITERS_ACTIVE.fetch_add(1, Ordering::Relaxed);
    } else {
        READ_SESSIONS_OPENED.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_session_close(write: bool) {
    SESSIONS_CLOSED.fetch_add(1, Ordering::Relaxed);
    if write {
        WRITERS_ACTIVE
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)))
            .ok();
    }
}

pub fn record_lock_conflict() {
    LOCK_CONFLICTS.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Registry) -----
pub fn record_bootstrap() {
    REGISTRY_BOOTSTRAPS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_publish() {
    REGISTRY_PUBLISHES.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Snapshots) -----
pub fn record_snapshot_copy(bytes: u64) {
    SNAPSHOT_COPIES.fetch_add(1, Ordering::Relaxed);
    SNAPSHOT_BYTES_COPIED.fetch_add(bytes, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        read_sessions_opened: READ_SESSIONS_OPENED.load(Ordering::Relaxed),
        write_sessions_opened: WRITE_SESSIONS_OPENED.load(Ordering::Relaxed),
        sessions_closed: SESSIONS_CLOSED.load(Ordering::Relaxed),
        writers_active: WRITERS_ACTIVE.load(Ordering::Relaxed),

        lock_conflicts: LOCK_CONFLICTS.load(Ordering::Relaxed),

        registry_bootstraps: REGISTRY_BOOTSTRAPS.load(Ordering::Relaxed),
        registry_publishes: REGISTRY_PUBLISHES.load(Ordering::Relaxed),

        snapshot_copies: SNAPSHOT_COPIES.load(Ordering::Relaxed),
        snapshot_bytes_copied: SNAPSHOT_BYTES_COPIED.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    READ_SESSIONS_OPENED.store(0, Ordering::Relaxed);
    WRITE_SESSIONS_OPENED.store(0, Ordering::Relaxed);
    SESSIONS_CLOSED.store(0, Ordering::Relaxed);
    WRITERS_ACTIVE.store(0, Ordering::Relaxed);

    LOCK_CONFLICTS.store(0, Ordering::Relaxed);

    REGISTRY_BOOTSTRAPS.store(0, Ordering::Relaxed);
    REGISTRY_PUBLISHES.store(0, Ordering::Relaxed);

    SNAPSHOT_COPIES.store(0, Ordering::Relaxed);
    SNAPSHOT_BYTES_COPIED.store(0, Ordering::Relaxed);
}
