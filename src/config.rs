// We need Duration to turn milliseconds into a Rust time value
use std::path::{Path, PathBuf};
use std::time::Duration;

// Settings are deserialized from an optional JSON file
use serde::Deserialize;

use crate::error::{ChatError, Result};

/// Environment variable naming an optional JSON configuration file.
pub const CONFIG_ENV: &str = "TCP_CHAT_CONFIG";

//////////////////////
// LoggerConfig     //
//////////////////////

/// Diagnostic logging settings (the fern dispatcher, not the chat transcript)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Minimum level, parsed as a `log::LevelFilter` ("debug", "info", ...)
    pub log_level: String,

    /// Print records to stdout
    pub enable_console_log: bool,

    /// Also write records to `<log_file_path>/<name>.log`
    pub enable_file_log: bool,

    /// Directory for the diagnostic log file; empty means the working directory
    pub log_file_path: String,

    /// Emit file records as JSON envelopes instead of plain lines
    pub enable_json_log: bool,

    /// chrono format string for record timestamps
    pub date_format: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            log_level: "info".to_string(),
            enable_console_log: true,
            enable_file_log: false,
            log_file_path: String::new(),
            enable_json_log: false,
            date_format: "%Y-%m-%d %H:%M:%S%.3f".to_string(),
        }
    }
}

//////////////////////
// ServerConfig     //
//////////////////////

/// All the settings the chat server needs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Hostname or IP to listen on
    pub host: String,

    /// Port number
    pub port: u16,

    /// Most sessions the registry holds at once
    pub max_clients: usize,

    /// Oldest history lines are dropped beyond this many; `None` keeps everything
    pub history_limit: Option<usize>,

    /// Longest line, in bytes, delivered as one input
    pub max_line_length: usize,

    /// Milliseconds to sleep after a failed accept
    pub accept_error_backoff_ms: u64,

    /// Milliseconds a single peer write may take before that peer is skipped
    pub write_timeout_ms: u64,

    /// Directory holding the dated chat transcript files
    pub log_dir: PathBuf,

    /// How many Tokio worker threads to spin up (defaults to cpu-1)
    pub worker_threads: usize,

    /// Diagnostic logger settings
    pub logger: LoggerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "localhost".to_string(),
            port: 8080,
            max_clients: 10,
            history_limit: None,
            max_line_length: 1024,
            accept_error_backoff_ms: 100,
            write_timeout_ms: 5000,
            log_dir: PathBuf::from("./logs"),
            worker_threads: num_cpus::get().saturating_sub(1).max(1),
            logger: LoggerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse a JSON document; missing keys keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ChatError::Config(e.to_string()))
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ChatError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    /// Build the startup configuration: the file named by `TCP_CHAT_CONFIG`
    /// (if set), then the command-line arguments on top.
    pub fn load<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let base = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        base.with_args(args)
    }

    /// Apply `[host] [port]` arguments (program name already removed).
    ///
    /// One argument is a port, two are host and port; anything after the
    /// second is ignored.
    pub fn with_args<I>(mut self, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let args: Vec<String> = args.into_iter().take(2).collect();
        match args.as_slice() {
            [] => {}
            [port] => {
                self.port = parse_port(port)?;
            }
            [host, port] => {
                self.port = parse_port(port)?;
                self.host = host.clone();
            }
            _ => return Err(ChatError::Usage),
        }
        Ok(self)
    }

    /// `host:port` string handed to the listener
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn accept_error_backoff(&self) -> Duration {
        Duration::from_millis(self.accept_error_backoff_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

fn parse_port(raw: &str) -> Result<u16> {
    raw.parse::<u16>()
        .map_err(|_| ChatError::InvalidPort(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_arguments_listen_on_localhost_8080() {
        let cfg = ServerConfig::default().with_args(args(&[])).unwrap();
        assert_eq!(cfg.addr(), "localhost:8080");
        assert_eq!(cfg.max_clients, 10);
        assert!(cfg.history_limit.is_none());
    }

    #[test]
    fn single_argument_is_a_port() {
        let cfg = ServerConfig::default().with_args(args(&["9000"])).unwrap();
        assert_eq!(cfg.addr(), "localhost:9000");
    }

    #[test]
    fn two_arguments_are_host_and_port() {
        let cfg = ServerConfig::default()
            .with_args(args(&["0.0.0.0", "4242", "ignored"]))
            .unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 4242);
    }

    #[test]
    fn non_numeric_port_is_rejected() {
        let err = ServerConfig::default()
            .with_args(args(&["localhost", "http"]))
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidPort(p) if p == "http"));

        let err = ServerConfig::default().with_args(args(&["-1"])).unwrap_err();
        assert!(matches!(err, ChatError::InvalidPort(_)));
    }

    #[test]
    fn json_overrides_only_given_keys() {
        let cfg = ServerConfig::from_json_str(
            r#"{ "port": 7000, "history_limit": 50, "logger": { "log_level": "debug" } }"#,
        )
        .unwrap();
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.history_limit, Some(50));
        assert_eq!(cfg.host, "localhost");
        assert_eq!(cfg.logger.log_level, "debug");
        assert!(cfg.logger.enable_console_log);
    }

    #[test]
    fn write_timeout_defaults_to_five_seconds() {
        assert_eq!(ServerConfig::default().write_timeout(), Duration::from_secs(5));
        let cfg = ServerConfig::from_json_str(r#"{ "write_timeout_ms": 250 }"#).unwrap();
        assert_eq!(cfg.write_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = ServerConfig::from_json_str("{ port: ").unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }
}
