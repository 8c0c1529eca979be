use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Pick the log level: explicit flag, then `RUST_LOG`, then info.
pub fn resolve_level(explicit: Option<&str>) -> Level {
    let name = explicit
        .map(str::to_string)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    match name.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Install the global subscriber. With `log_file` set, output goes there
/// without colours so it can't corrupt a full-screen terminal.
pub fn init(level: Option<&str>, log_file: Option<&Path>) -> Result<()> {
    let level = resolve_level(level);
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true);

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let subscriber = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("setting default subscriber failed")?;
        }
        None => {
            let subscriber = builder.with_writer(std::io::stderr).finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("setting default subscriber failed")?;
        }
    }

    Ok(())
}
