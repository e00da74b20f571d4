//! Configuration management for pty-server.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::pty::{PtySize, SpawnEnv};
use crate::server::ServerConfig;
use crate::session::{OutputTiming, SessionConfig};
use crate::shell::ShellChoice;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerSection,
    /// Per-session configuration.
    pub session: SessionSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Loopback port to listen on (0 = OS-assigned).
    pub port: u16,
    /// How long shutdown waits for sessions to close.
    pub shutdown_grace_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: 0,
            shutdown_grace_ms: 3000,
        }
    }
}

/// Session configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Initial terminal width.
    pub cols: u16,
    /// Initial terminal height.
    pub rows: u16,
    /// `TERM` for shells when the server's environment has none.
    pub term: String,
    /// `TERM_PROGRAM` exported to shells.
    pub term_program: String,
    /// Working directory for shells.
    pub cwd: Option<PathBuf>,
    /// Shell name (`cmd`, `powershell`, `wsl`, `gitbash`, `bash`, `zsh`,
    /// `fish`, `custom:<path>`) or program; platform candidates when unset.
    pub shell: Option<String>,
    /// Arguments for `shell`, replacing its defaults when non-empty.
    pub shell_args: Vec<String>,
    /// Working-directory reporting for bash, zsh and fish (Unix only).
    pub shell_integration: bool,
    /// PTY read buffer size in bytes.
    pub read_buffer_size: usize,
    /// Output drain period after the shell exits.
    pub flush_grace_ms: u64,
    /// How long to wait for the exit status after the PTY closes.
    pub exit_wait_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        let env = SpawnEnv::default();
        let size = PtySize::default();
        Self {
            cols: size.cols,
            rows: size.rows,
            term: env.term,
            term_program: env.term_program,
            cwd: None,
            shell: None,
            shell_args: Vec::new(),
            shell_integration: true,
            read_buffer_size: crate::pty::DEFAULT_BUFFER_SIZE,
            flush_grace_ms: 250,
            exit_wait_ms: 2000,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or filter directives.
    pub level: String,
    /// Colored diagnostics.
    pub color: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            color: true,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply environment variable overrides using `lookup`.
    ///
    /// Runs before logging is up, so bad values are errors, not warnings.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PTY_SERVER_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PTY_SERVER_PORT", port))?;
        }

        if let Some(level) = lookup("PTY_SERVER_LOG_LEVEL").filter(|l| !l.is_empty()) {
            self.logging.level = level;
        } else if let Some(level) = lookup("RUST_LOG").filter(|l| !l.is_empty()) {
            self.logging.level = level;
        }

        // https://no-color.org: any non-empty value disables color.
        if lookup("NO_COLOR").is_some_and(|v| !v.is_empty()) {
            self.logging.color = false;
        }

        Ok(())
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(port) = args.port {
            self.server.port = port;
        }

        if let Some(ref shell) = args.shell {
            self.session.shell = Some(shell.clone());
            self.session.shell_args.clear();
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }

        if args.no_color {
            self.logging.color = false;
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        // Start with defaults
        let mut config = Config::default();

        // Load from config file if specified
        if let Some(ref path) = args.config {
            config = Config::from_file(path)?;
        }

        // Apply environment variable overrides
        config.apply_env()?;

        // Apply CLI argument overrides (highest priority)
        config.apply_args(args);

        Ok(config)
    }

    /// Convert to the runtime server configuration.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let session = &self.session;

        if session.cols == 0 {
            return Err(ConfigError::InvalidValue("session.cols", "0".into()));
        }
        if session.rows == 0 {
            return Err(ConfigError::InvalidValue("session.rows", "0".into()));
        }
        if session.read_buffer_size == 0 {
            return Err(ConfigError::InvalidValue(
                "session.read_buffer_size",
                "0".into(),
            ));
        }

        let shell = match &session.shell {
            Some(program) if program.trim().is_empty() => {
                return Err(ConfigError::InvalidValue("session.shell", program.clone()));
            }
            Some(name) => ShellChoice::Named {
                name: name.trim().to_string(),
                args: session.shell_args.clone(),
            },
            None => ShellChoice::Auto,
        };

        let session_config = SessionConfig {
            initial_size: PtySize::new(session.rows, session.cols),
            spawn_env: SpawnEnv {
                term: session.term.clone(),
                term_program: session.term_program.clone(),
                cwd: session.cwd.clone(),
            },
            shell,
            shell_integration: session.shell_integration,
            read_buffer_size: session.read_buffer_size,
            timing: OutputTiming {
                flush_grace: Duration::from_millis(session.flush_grace_ms),
                exit_wait: Duration::from_millis(session.exit_wait_ms),
            },
        };

        Ok(ServerConfig {
            port: self.server.port,
            shutdown_grace: Duration::from_millis(self.server.shutdown_grace_ms),
            session: session_config,
        })
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// A setting has a value the server cannot run with.
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidValue(key, value) => write!(f, "invalid value for {}: '{}'", key, value),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 0);
        assert_eq!(config.session.cols, 80);
        assert_eq!(config.session.rows, 24);
        assert_eq!(config.session.term, "xterm-256color");
        assert_eq!(config.session.term_program, "pty-server");
        assert_eq!(config.session.read_buffer_size, 8192);
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.color);
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "server": {
                "port": 8080,
                "shutdown_grace_ms": 500
            },
            "session": {
                "cols": 120,
                "rows": 40,
                "shell": "/bin/zsh",
                "shell_args": ["-l"]
            },
            "logging": {
                "level": "debug",
                "color": false
            }
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.shutdown_grace_ms, 500);
        assert_eq!(config.session.cols, 120);
        assert_eq!(config.session.shell.as_deref(), Some("/bin/zsh"));
        assert_eq!(config.session.shell_args, vec!["-l".to_string()]);
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.color);
    }

    #[test]
    fn test_config_partial_json() {
        let json = r#"{
            "session": {
                "rows": 50
            }
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.session.rows, 50);
        assert_eq!(config.session.cols, 80); // Default
        assert_eq!(config.server.port, 0);
    }

    #[test]
    fn test_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();

        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::Json(_))
        ));
        assert!(matches!(
            Config::from_file(Path::new("/nonexistent/pty-server.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_apply_env() {
        let mut config = Config::default();
        config
            .apply_env_from(env(&[
                ("PTY_SERVER_PORT", "7000"),
                ("PTY_SERVER_LOG_LEVEL", "trace"),
                ("RUST_LOG", "warn"),
                ("NO_COLOR", "1"),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.logging.level, "trace");
        assert!(!config.logging.color);
    }

    #[test]
    fn test_apply_env_fallbacks() {
        let mut config = Config::default();
        config
            .apply_env_from(env(&[("RUST_LOG", "pty_server=debug"), ("NO_COLOR", "")]))
            .unwrap();

        assert_eq!(config.server.port, 0);
        assert_eq!(config.logging.level, "pty_server=debug");
        assert!(config.logging.color);
    }

    #[test]
    fn test_invalid_env_port_is_error() {
        let mut config = Config::default();
        let result = config.apply_env_from(env(&[("PTY_SERVER_PORT", "not-a-port")]));

        match result {
            Err(ConfigError::InvalidValue(key, value)) => {
                assert_eq!(key, "PTY_SERVER_PORT");
                assert_eq!(value, "not-a-port");
            }
            other => panic!("expected InvalidValue, got {:?}", other),
        }
        assert_eq!(config.server.port, 0);

        assert!(config
            .apply_env_from(env(&[("PTY_SERVER_PORT", "70000")]))
            .is_err());
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.server.port = 7000;
        config.session.shell_args = vec!["-l".into()];
        let args = Args {
            port: Some(5000),
            shell: Some("fish".into()),
            log_level: Some("debug".into()),
            no_color: true,
            ..Args::default()
        };

        config.apply_args(&args);

        assert_eq!(config.server.port, 5000);
        assert_eq!(config.session.shell.as_deref(), Some("fish"));
        assert!(config.session.shell_args.is_empty());
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.color);
    }

    #[test]
    fn test_args_without_values_keep_config() {
        let mut config = Config::default();
        config.server.port = 7000;

        config.apply_args(&Args::default());
        assert_eq!(config.server.port, 7000);
        assert!(config.logging.color);
    }

    #[test]
    fn test_to_server_config() {
        let mut config = Config::default();
        config.session.cols = 100;
        config.session.rows = 40;
        config.session.flush_grace_ms = 10;
        let server_config = config.to_server_config().unwrap();

        assert_eq!(server_config.port, 0);
        assert_eq!(server_config.shutdown_grace, Duration::from_secs(3));
        assert_eq!(server_config.session.initial_size, PtySize::new(40, 100));
        assert_eq!(
            server_config.session.timing.flush_grace,
            Duration::from_millis(10)
        );
        assert_eq!(server_config.session.shell, ShellChoice::Auto);
        assert!(server_config.session.shell_integration);
    }

    #[test]
    fn test_to_server_config_shell() {
        let mut config = Config::default();
        config.session.shell = Some(" gitbash ".into());
        config.session.shell_args = vec!["-i".into()];
        config.session.shell_integration = false;

        let session = config.to_server_config().unwrap().session;
        assert_eq!(
            session.shell,
            ShellChoice::Named {
                name: "gitbash".into(),
                args: vec!["-i".to_string()],
            }
        );
        assert!(!session.shell_integration);

        config.session.shell = Some("  ".into());
        assert!(matches!(
            config.to_server_config(),
            Err(ConfigError::InvalidValue("session.shell", _))
        ));
    }

    #[test]
    fn test_zero_size_rejected() {
        let mut config = Config::default();
        config.session.cols = 0;
        assert!(matches!(
            config.to_server_config(),
            Err(ConfigError::InvalidValue("session.cols", _))
        ));

        let mut config = Config::default();
        config.session.rows = 0;
        assert!(config.to_server_config().is_err());

        let mut config = Config::default();
        config.session.read_buffer_size = 0;
        assert!(config.to_server_config().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"port\""));
        assert!(json.contains("\"term_program\""));

        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session.rows, config.session.rows);
    }
}
