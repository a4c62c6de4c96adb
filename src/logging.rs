//! Tracing subscriber setup.
//!
//! Logs go to stderr (text or JSON). With a log directory, a JSON copy is
//! also written to a daily-rolling file through a non-blocking writer; keep
//! the returned guard alive for the life of the process.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub verbose: bool,
    pub json: bool,
    pub log_dir: Option<PathBuf>,
}

/// Filter directive: `CHATOPS_LOG`, then `RUST_LOG`, then a default.
pub fn filter_directive(lookup: impl Fn(&str) -> Option<String>, verbose: bool) -> String {
    lookup("CHATOPS_LOG")
        .or_else(|| lookup("RUST_LOG"))
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| {
            if verbose {
                "chatops=debug,tower_http=debug".to_string()
            } else {
                "chatops=info".to_string()
            }
        })
}

pub fn init(options: &LogOptions) -> Result<Option<WorkerGuard>> {
    let directive = filter_directive(|key| std::env::var(key).ok(), options.verbose);
    let filter = EnvFilter::try_new(&directive)
        .map_err(|e| anyhow!("Invalid log filter '{}': {}", directive, e))?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);
    layers.push(if options.json {
        stderr.json().boxed()
    } else {
        stderr.boxed()
    });

    let guard = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .map_err(|e| anyhow!("Failed to create log directory {}: {}", dir.display(), e))?;
            let appender = tracing_appender::rolling::daily(dir, "chatops.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .json()
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;
    Ok(guard)
}
