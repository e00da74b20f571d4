//! Command-line interface for pty-server.
//!
//! Uses lexopt to keep the binary small.

use std::ffi::OsString;
use std::path::PathBuf;

/// Command-line arguments.
///
/// Every setting is optional here; unset values fall through to the
/// environment, the config file, and finally the built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Port to listen on (0 = OS-assigned).
    pub port: Option<u16>,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Shell name or program to run instead of the platform candidates.
    pub shell: Option<String>,
    /// Log filter (error, warn, info, debug, trace, or directives).
    pub log_level: Option<String>,
    /// Disable ANSI colors in diagnostics.
    pub no_color: bool,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('p') | Long("port") => {
                let value: String = parser.value()?.parse()?;
                result.port = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("port", value))?,
                );
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('s') | Long("shell") => {
                let value: String = parser.value()?.parse()?;
                if value.trim().is_empty() {
                    return Err(ArgsError::InvalidValue("shell", value));
                }
                result.shell = Some(value);
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Long("no-color") => {
                result.no_color = true;
            }
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(val.to_string_lossy().into()));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"pty-server {version}
Serve interactive shells over WebSocket on localhost

USAGE:
    pty-server [OPTIONS]

On startup a single line {{"port":<n>,"pid":<pid>}} is printed to stdout.
Diagnostics go to stderr.

OPTIONS:
    -p, --port <PORT>       Port to listen on, 0 = OS-assigned [default: 0]
    -c, --config <FILE>     Path to configuration file (JSON)
    -s, --shell <SHELL>     Shell to run instead of the platform default:
                            cmd, powershell, wsl, gitbash, bash, zsh, fish,
                            custom:<path>, or a program name or path
    -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)
        --no-color          Disable colored diagnostics
    -h, --help              Print help
    -V, --version           Print version

ENVIRONMENT VARIABLES:
    PTY_SERVER_PORT         Port number (overrides config)
    PTY_SERVER_LOG_LEVEL    Log level (overrides config)
    RUST_LOG                Alternative log level setting
    NO_COLOR                Disable colored diagnostics

EXAMPLES:
    # OS-assigned port, platform default shell
    pty-server

    # Fixed port with debug logging
    pty-server -p 8765 -l debug

    # Git Bash on Windows
    pty-server --shell gitbash

    # Start with config file
    pty-server -c ~/.config/pty-server/config.json
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("pty-server {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
    /// Unexpected positional argument.
    UnexpectedArgument(String),
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
            Self::UnexpectedArgument(arg) => {
                write!(f, "unexpected argument: '{}'", arg)
            }
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}
