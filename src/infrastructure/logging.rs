//! Logging system configuration and initialization
//!
//! This module provides the logging setup with:
//! - Console and file output support
//! - Configuration based log level control, overridable with `RUST_LOG`
//! - Structured JSON file logging (optional)
//! - Local-time timestamps
//! - Pruning of old log files at startup

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

const LOG_FILE_STEM: &str = "harvest";

// Keeps the non-blocking file writers alive for the whole process
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> = Mutex::new(Vec::new());
}

/// Local wall-clock timestamps
struct LocalTimeFormatter;

impl FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f %:z"))
    }
}

/// Log directory: configured, or `logs/` under the working directory
#[must_use]
pub fn log_directory(config: &LoggingConfig) -> PathBuf {
    config.log_dir.clone().unwrap_or_else(|| {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("logs")
    })
}

fn log_file_name(config: &LoggingConfig) -> String {
    match config.file_naming_strategy.as_str() {
        "timestamped" => format!("{}-{}.log", LOG_FILE_STEM, Local::now().format("%Y%m%d")),
        _ => format!("{}.log", LOG_FILE_STEM),
    }
}

/// Filter from `RUST_LOG` when set, otherwise the configured level with
/// noisy dependencies held back unless tracing everything
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let level = config.level.to_lowercase();
    let mut filter = EnvFilter::try_new(&level).with_context(|| format!("Invalid log level '{}'", config.level))?;

    if !level.contains("trace") {
        for directive in ["hyper=warn", "hyper_util=warn", "reqwest=info", "h2=warn", "rustls=warn"] {
            filter = filter.add_directive(directive.parse()?);
        }
    }
    for (module, module_level) in &config.module_filters {
        let directive = format!("{}={}", module, module_level);
        filter = filter.add_directive(
            directive
                .parse()
                .with_context(|| format!("Invalid module filter '{}'", directive))?,
        );
    }
    Ok(filter)
}

/// Initialize logging with custom configuration
///
/// Only the first successful call installs a subscriber; later calls return
/// an error, which callers in tests may ignore.
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_output {
        layers.push(
            fmt::Layer::new()
                .with_writer(std::io::stderr)
                .with_timer(LocalTimeFormatter)
                .with_target(false)
                .boxed(),
        );
    }

    let mut log_dir = None;
    if config.file_output {
        let dir = log_directory(config);
        std::fs::create_dir_all(&dir).map_err(|e| anyhow!("Failed to create log directory {:?}: {}", dir, e))?;
        let file_name = log_file_name(config);
        cleanup_old_logs(&dir, config.max_files, &file_name);

        let file_appender = rolling::never(&dir, &file_name);
        let (file_writer, file_guard) = non_blocking(file_appender);
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("Log guard registry poisoned"))?
            .push(file_guard);

        let file_layer = fmt::Layer::new()
            .with_writer(file_writer)
            .with_timer(LocalTimeFormatter)
            .with_ansi(false);
        layers.push(if config.json_format {
            file_layer
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .boxed()
        } else {
            file_layer.with_target(false).boxed()
        });
        log_dir = Some(dir);
    }

    if layers.is_empty() {
        return Err(anyhow!("No logging output configured"));
    }

    Registry::default()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow!("Failed to install logger: {}", e))?;

    info!("Logging initialized (level: {})", config.level);
    if let Some(dir) = log_dir {
        info!("Log directory: {:?}", dir);
    }
    Ok(())
}

/// Keeps `active` plus the newest `max_files - 1` other log files in `log_dir`,
/// so the directory holds at most `max_files` logs once `active` is opened
pub fn cleanup_old_logs(log_dir: &Path, max_files: u32, active: &str) {
    let Ok(entries) = std::fs::read_dir(log_dir) else {
        return;
    };

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "log"))
        .filter(|entry| entry.file_name() != active)
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((entry.path(), modified))
        })
        .collect();

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    let keep = (max_files as usize).saturating_sub(1);
    for (path, _) in log_files.iter().skip(keep) {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to remove old log file {:?}: {}", path, e);
        }
    }
}
