//! util: общие утилиты.
//!
//! Содержит:
//! - now_nanos(): текущее Unix-время в наносекундах (i64, saturating).
//! - file_checksum(): CRC32 содержимого файла (потоково).
//! - quote_literal(): SQL string literal с экранированием кавычек.
//! - env_flag(): разбор булевых ENV (1|true|yes|on).

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Текущее Unix-время в наносекундах, обрезанное к i64 (saturating).
#[inline]
pub fn now_nanos() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_nanos().min(i64::MAX as u128) as i64
}

/// CRC32 of the whole file, read in 64 KiB chunks.
pub fn file_checksum(path: &Path) -> Result<u32> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = f
            .read(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Quote a string as an SQL literal: `it's` -> `'it''s'`.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

pub fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_ascii_lowercase())
        .map(|s| s == "1" || s == "true" || s == "yes" || s == "on")
}
