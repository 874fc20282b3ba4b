//! Centralized configuration and builder for Kingdom.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - KingdomConfig::from_env() reads the KINGDOM_* variables.
//! - ControllerBuilder returns a ready SessionController bound to one handle.
//!
//! Env:
//! - KINGDOM_BUSY_TIMEOUT_MS (default 5000): how long an engine handle waits on a locked
//!   registry file (e.g. a reader resolving "latest" while a writer publishes).
//! - KINGDOM_FSYNC_SNAPSHOTS (default true): fsync each snapshot copy before binding it.
//! - KINGDOM_VERIFY_ON_OPEN (default false): check the latest snapshot's CRC32 against its
//!   VersionRecord before binding any session.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::SqliteEngine;
use crate::session::SessionController;
use crate::util::env_flag;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KingdomConfig {
    /// Engine busy timeout in milliseconds.
    /// Env: KINGDOM_BUSY_TIMEOUT_MS
    pub busy_timeout_ms: u64,

    /// Whether to fsync a freshly copied snapshot.
    /// Env: KINGDOM_FSYNC_SNAPSHOTS = 0|1 (default 1)
    pub fsync_snapshots: bool,

    /// Verify the latest snapshot checksum on every open.
    /// Env: KINGDOM_VERIFY_ON_OPEN = 0|1 (default 0)
    pub verify_on_open: bool,
}

impl Default for KingdomConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            fsync_snapshots: true,
            verify_on_open: false,
        }
    }
}

impl KingdomConfig {
    /// Load configuration from environment variables on top of the defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("KINGDOM_BUSY_TIMEOUT_MS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.busy_timeout_ms = n;
            }
        }
        if let Some(on) = env_flag("KINGDOM_FSYNC_SNAPSHOTS") {
            cfg.fsync_snapshots = on;
        }
        if let Some(on) = env_flag("KINGDOM_VERIFY_ON_OPEN") {
            cfg.verify_on_open = on;
        }

        cfg
    }

    pub fn with_busy_timeout_ms(mut self, ms: u64) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    pub fn with_fsync_snapshots(mut self, on: bool) -> Self {
        self.fsync_snapshots = on;
        self
    }

    pub fn with_verify_on_open(mut self, on: bool) -> Self {
        self.verify_on_open = on;
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Default engine configured from this config.
    pub fn sqlite_engine(&self) -> SqliteEngine {
        SqliteEngine::new(self.busy_timeout())
    }
}

impl fmt::Display for KingdomConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KingdomConfig {{ busy_timeout_ms: {}, fsync_snapshots: {}, verify_on_open: {} }}",
            self.busy_timeout_ms, self.fsync_snapshots, self.verify_on_open,
        )
    }
}

/// Lightweight builder that produces a SessionController over SQLite.
#[derive(Clone, Debug)]
pub struct ControllerBuilder {
    handle: PathBuf,
    cfg: KingdomConfig,
}

impl ControllerBuilder {
    /// Start from env to preserve `SessionController::new` behavior, then allow overrides.
    pub fn new(handle: impl Into<PathBuf>) -> Self {
        Self {
            handle: handle.into(),
            cfg: KingdomConfig::from_env(),
        }
    }

    /// Start from a clean default (without reading env).
    pub fn from_default(handle: impl Into<PathBuf>) -> Self {
        Self {
            handle: handle.into(),
            cfg: KingdomConfig::default(),
        }
    }

    pub fn busy_timeout_ms(mut self, ms: u64) -> Self {
        self.cfg.busy_timeout_ms = ms;
        self
    }

    pub fn fsync_snapshots(mut self, on: bool) -> Self {
        self.cfg.fsync_snapshots = on;
        self
    }

    pub fn verify_on_open(mut self, on: bool) -> Self {
        self.cfg.verify_on_open = on;
        self
    }

    pub fn config(&self) -> &KingdomConfig {
        &self.cfg
    }

    pub fn build(self) -> SessionController {
        SessionController::with_config(self.handle, self.cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let b = ControllerBuilder::from_default("sandbox/test.db")
            .busy_timeout_ms(250)
            .fsync_snapshots(false)
            .verify_on_open(true);
        assert_eq!(
            b.config(),
            &KingdomConfig {
                busy_timeout_ms: 250,
                fsync_snapshots: false,
                verify_on_open: true,
            }
        );
        let ctl = b.build();
        assert_eq!(ctl.handle(), std::path::Path::new("sandbox/test.db"));
        assert_eq!(ctl.config().busy_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn display_lists_every_field() {
        let s = KingdomConfig::default().with_verify_on_open(true).to_string();
        assert!(s.contains("busy_timeout_ms: 5000"), "{s}");
        assert!(s.contains("fsync_snapshots: true"), "{s}");
        assert!(s.contains("verify_on_open: true"), "{s}");
    }
}
