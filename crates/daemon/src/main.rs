// fencerund: JSON-RPC engine host for editor plugins, spoken over stdio.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use fencerun_daemon::config::{default_log_path, EngineConfig};
use tracing::info;

const LOG_FILE_ENV: &str = "FENCERUN_LOG_FILE";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol, so logs go to a file.
    let log_path = std::env::var_os(LOG_FILE_ENV)
        .map(PathBuf::from)
        .or_else(default_log_path)
        .context("cannot determine a log file location; set FENCERUN_LOG_FILE")?;
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory `{}`", parent.display()))?;
    }
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open log file `{}`", log_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .init();

    info!(pid = std::process::id(), "starting fencerun engine");
    fencerun_daemon::runtime::run_stdio(EngineConfig::load())
        .await
        .context("fencerun engine terminated unexpectedly")
}
