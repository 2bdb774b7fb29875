//! `tracing` subscriber setup for the `duet` binary.
//!
//! [`init_production`] writes JSON lines to a daily-rotated `duet.log` and
//! mirrors human-readable output to stderr. [`init_cli`] writes to stderr only,
//! keeping stdout free for the JSON the CLI prints.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "duet.log";

/// Keeps the file writer alive; dropping it flushes buffered entries.
pub struct LoggingGuard {
    _worker: WorkerGuard,
    logs_dir: PathBuf,
}

impl LoggingGuard {
    /// Directory the rotated log files are written to.
    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the file + stderr subscriber.
///
/// `RUST_LOG` takes precedence over `default_level`.
///
/// # Errors
///
/// Returns an error if `logs_dir` cannot be created.
pub fn init_production(logs_dir: &Path, default_level: &str) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let (writer, worker) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(LoggingGuard {
        _worker: worker,
        logs_dir: logs_dir.to_path_buf(),
    })
}

/// Install a stderr-only subscriber for one-shot subcommands.
pub fn init_cli(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_writer(std::io::stderr)
        .init();
}
