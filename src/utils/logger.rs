//! Diagnostic logging for the session process.
//!
//! Each run writes its own file, `rusty-gate.<timestamp>.log`, under the
//! configured log directory. Warnings and errors are also copied to stderr so
//! problems such as an unwritable audit log are never silent.
//!
//! `RUST_LOG` takes precedence over the `-v` count when set.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directive for a `-v` count.
pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

pub fn log_file_name(timestamp: &str) -> String {
    format!("rusty-gate.{}.log", timestamp)
}

/// Install the global subscriber and return the log file path.
///
/// Failing to create the log file is reported on stderr and leaves only the
/// stderr layer active.
pub fn init_logging(log_dir: &Path, verbosity: u8) -> Option<PathBuf> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for_verbosity(verbosity)));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(LevelFilter::WARN);

    let log_file = fs::create_dir_all(log_dir)
        .map_err(|e| eprintln!("Warning: Failed to create log directory: {}", e))
        .ok()
        .and_then(|_| {
            let timestamp = Local::now().format("%Y-%m-%d-%H-%M-%S").to_string();
            let path = log_dir.join(log_file_name(&timestamp));
            fs::File::create(&path)
                .map_err(|e| eprintln!("Warning: Failed to create log file: {}", e))
                .ok()
                .map(|file| (path, file))
        });

    let mut log_path = None;
    let file_layer = log_file.map(|(path, file)| {
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        // Keep the writer alive for the whole process.
        std::mem::forget(guard);
        log_path = Some(path);
        fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    if let Some(path) = &log_path {
        tracing::info!("Logging initialized - writing to {}", path.display());
    }
    log_path
}
