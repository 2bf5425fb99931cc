//! Logging setup shared by embedding binaries and tests.
//!
//! There is no CLI in this system, so configuration is programmatic: build
//! a `LogArgs`, hand it to `init_logging` once at startup. Levels compose
//! with `RUST_LOG`-style directives through the env filter.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogArgs {
    pub level: LogLevel,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized value '{0}'")]
pub struct ParseError(String);

impl std::str::FromStr for LogLevel {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ParseError(other.to_string())),
        }
    }
}

/// The output format for logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// jsonl on stderr; structured fields survive log forwarding.
    Json,
    /// Plain text with no colors.
    #[default]
    Text,
    /// Plain text with colors for interactive terminals.
    Color,
}

impl std::str::FromStr for LogFormat {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            "color" => Ok(LogFormat::Color),
            other => Err(ParseError(other.to_string())),
        }
    }
}

/// Initializes logging. Panics if called twice; use
/// [`try_init_logging`] where another initializer may have won.
pub fn init_logging(args: &LogArgs) {
    builder(args, true)
}

/// As [`init_logging`], but quietly loses the race when a subscriber is
/// already installed. Tests use this.
pub fn try_init_logging(args: &LogArgs) {
    builder(args, false)
}

fn builder(args: &LogArgs, must_win: bool) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(
                    args.level
                        .as_str()
                        .parse()
                        .expect("level directives are well-formed"),
                )
                .from_env_lossy(),
        )
        // CLOSE span events log each span once, when its future completes,
        // with timing and all recorded fields.
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .with_target(false);

    match (args.format, must_win) {
        (LogFormat::Json, true) => builder.json().flatten_event(true).init(),
        (LogFormat::Json, false) => {
            let _ = builder.json().flatten_event(true).try_init();
        }
        (LogFormat::Text, true) => builder.compact().with_ansi(false).init(),
        (LogFormat::Text, false) => {
            let _ = builder.compact().with_ansi(false).try_init();
        }
        (LogFormat::Color, true) => builder.compact().with_ansi(true).init(),
        (LogFormat::Color, false) => {
            let _ = builder.compact().with_ansi(true).try_init();
        }
    }
}
