// Import local time formatting tools from chrono
use chrono::Local;

// Colors for the console level column
use fern::colors::{Color, ColoredLevelConfig};

// Set up the dispatch builder for combining logger outputs
use fern::Dispatch;

// Set the global log level (e.g., Debug, Info, Warn, Error)
use log::LevelFilter;

// JSON envelopes for structured file output
use serde_json::Value as JsonValue;

// Standard I/O and filesystem operations (stdout, file creation)
use std::{fs, io};

// Used to initialize a static value only once in a thread-safe way
use std::sync::OnceLock;

use crate::config::LoggerConfig;

/// Dated chat transcript and clock
pub mod journal;

pub use journal::{FileJournal, Journal, MemoryJournal};

/// A simple Logger struct that wraps logging functions.
/// Clonable to allow use across multiple tasks.
#[derive(Clone, Debug, Default)]
pub struct Logger;

impl Logger {
    /// Logs a message at DEBUG level
    pub fn debug(&self, msg: &str) {
        log::debug!("{}", msg);
    }

    /// Logs a message at INFO level
    pub fn info(&self, msg: &str) {
        log::info!("{}", msg);
    }

    /// Logs a message at WARN level
    pub fn warn(&self, msg: &str) {
        log::warn!("{}", msg);
    }

    /// Logs a message at ERROR level
    pub fn error(&self, msg: &str) {
        log::error!("{}", msg);
    }
}

/// Static global LOGGER instance, initialized once
static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Initialize the global logger exactly once, according to the provided settings.
/// Later calls return the same handle and leave the dispatcher untouched.
pub fn init_logger(name: &str, cfg: &LoggerConfig) -> Logger {
    LOGGER
        .get_or_init(|| {
            let level = cfg
                .log_level
                .parse::<LevelFilter>()
                .unwrap_or(LevelFilter::Info);

            let mut base = Dispatch::new().level(level);

            // Console branch: timestamp, name, colored level, message
            if cfg.enable_console_log {
                let nm = name.to_string();
                let datefmt = cfg.date_format.clone();
                let colors = ColoredLevelConfig::new()
                    .info(Color::Green)
                    .warn(Color::Yellow)
                    .error(Color::Red)
                    .debug(Color::Blue);

                base = base.chain(
                    Dispatch::new()
                        .format(move |out, message, record| {
                            out.finish(format_args!(
                                "\x1b[92m{}\x1b[0m - \x1b[94m{}\x1b[0m - {} - {}",
                                Local::now().format(&datefmt),
                                nm,
                                colors.color(record.level()),
                                message
                            ))
                        })
                        .chain(io::stdout()),
                );
            }

            // File branch: plain text or JSON lines at "<log_file_path>/<name>.log"
            if cfg.enable_file_log {
                if !cfg.log_file_path.is_empty() {
                    let _ = fs::create_dir_all(&cfg.log_file_path);
                }

                let nm = name.to_string();
                let datefmt = cfg.date_format.clone();
                let enable_json = cfg.enable_json_log;
                let filepath = diagnostic_log_path(&cfg.log_file_path, &nm);

                let log_format_file = move |out: fern::FormatCallback,
                                            message: &std::fmt::Arguments,
                                            record: &log::Record| {
                    if enable_json {
                        let envelope = json_envelope(
                            &Local::now().format(&datefmt).to_string(),
                            &nm,
                            record.level(),
                            &message.to_string(),
                        );
                        out.finish(format_args!("{}", envelope))
                    } else {
                        out.finish(format_args!(
                            "{} - {} - {} - {}",
                            Local::now().format(&datefmt),
                            nm,
                            record.level(),
                            message
                        ))
                    }
                };

                // Don't panic if the file can't be opened, fall back to a sink
                let file_output: Box<dyn io::Write + Send> = match fern::log_file(&filepath) {
                    Ok(fh) => Box::new(fh),
                    Err(err) => {
                        eprintln!("Warning: could not open log file {}: {}", filepath, err);
                        Box::new(io::sink())
                    }
                };

                base = base.chain(Dispatch::new().format(log_format_file).chain(file_output));
            }

            // Another logger may already be installed (tests, embedders); keep it.
            if let Err(err) = base.apply() {
                eprintln!("Warning: logger already initialized: {}", err);
            }

            Logger
        })
        .clone()
}

/// `<dir>/<name>.log`, with dots in the name replaced so it stays one file name.
fn diagnostic_log_path(dir: &str, name: &str) -> String {
    let file = format!("{}.log", name.replace('.', "_"));
    if dir.is_empty() {
        file
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), file)
    }
}

/// One JSON record for the structured file log.
fn json_envelope(timestamp: &str, name: &str, level: log::Level, message: &str) -> JsonValue {
    serde_json::json!({
        "timestamp": timestamp,
        "name":      name,
        "level":     level.to_string(),
        "message":   message,
    })
}
