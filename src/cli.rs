use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::metrics;
use crate::session::{LockMode, SessionController};
use crate::Row;

#[derive(Parser, Debug)]
#[command(
    name = "kingdom",
    version,
    about = "Versioned copy-on-write sessions over an embedded SQLite database",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Create the registry and the first (empty) snapshot if absent
    Init {
        #[arg(long)]
        path: PathBuf,
    },
    /// Latest snapshot, version count, orphans
    Status {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// All published versions in append order
    History {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Run SQL in one session (write modes publish on exit)
    Sql {
        #[arg(long)]
        path: PathBuf,
        /// read | exclusive | overwrite
        #[arg(long, default_value = "read")]
        mode: LockMode,
        #[arg(long)]
        sql: String,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Check every published snapshot against its recorded CRC32
    Verify {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List snapshot files that were never published
    Orphans {
        #[arg(long)]
        path: PathBuf,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Init { path } => {
            let ctl = SessionController::new(&path);
            ctl.bootstrap()?;
            println!("Initialized {} -> {}", path.display(), ctl.latest()?.display());
        }
        Cmd::Status { path, json } => exec_status(&path, json)?,
        Cmd::History { path, json } => {
            let ctl = existing(&path)?;
            let hist = ctl.history()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hist)?);
            } else {
                for r in &hist {
                    println!(
                        "{:>6}  {}  {}  crc={}",
                        r.seq,
                        r.published_at,
                        r.snapshot_path.display(),
                        r.checksum
                            .map(|c| format!("{c:08x}"))
                            .unwrap_or_else(|| "-".to_string())
                    );
                }
            }
        }
        Cmd::Sql {
            path,
            mode,
            sql,
            json,
        } => {
            let ctl = SessionController::new(&path);
            let rows = ctl
                .with_session(mode, |s| s.query(&sql))
                .with_context(|| format!("sql on {} with {}", path.display(), mode))?;
            print_rows(&rows, json)?;
        }
        Cmd::Verify { path, json } => {
            let ctl = existing(&path)?;
            let report = ctl.verify()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("checked    = {}", report.checked);
                for p in &report.missing {
                    println!("missing    {}", p.display());
                }
                for p in &report.mismatched {
                    println!("mismatched {}", p.display());
                }
            }
            if !report.is_ok() {
                return Err(anyhow!(
                    "verify failed: {} missing, {} mismatched",
                    report.missing.len(),
                    report.mismatched.len()
                ));
            }
        }
        Cmd::Orphans { path } => {
            let ctl = existing(&path)?;
            for p in ctl.orphans()? {
                println!("{}", p.display());
            }
        }
    }
    Ok(())
}

/// Controller for a handle that must already be bootstrapped (read-only commands).
fn existing(path: &Path) -> Result<SessionController> {
    let ctl = SessionController::new(path);
    if !ctl.registry().exists() {
        return Err(anyhow!("{} is not initialized (run init)", path.display()));
    }
    Ok(ctl)
}

fn exec_status(path: &Path, json: bool) -> Result<()> {
    let ctl = existing(path)?;
    let latest = ctl.registry().latest_record()?;
    let versions = ctl.history()?.len();
    let orphans = ctl.orphans()?;

    if json {
        let out = serde_json::json!({
            "handle": path,
            "config": ctl.config().to_string(),
            "latest": latest,
            "versions": versions,
            "orphans": orphans,
            "metrics": metrics::snapshot(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Handle at {}", path.display());
    println!("  latest       = {}", latest.snapshot_path.display());
    println!("  latest_seq   = {}", latest.seq);
    println!("  published_at = {}", latest.published_at);
    println!("  versions     = {}", versions);
    println!("  orphans      = {}", orphans.len());
    Ok(())
}

fn print_rows(rows: &[Row], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(rows)?);
        return Ok(());
    }
    for row in rows {
        let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        println!("{}", cells.join("\t"));
    }
    Ok(())
}
