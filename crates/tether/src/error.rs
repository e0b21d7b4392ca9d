//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use tether_config::ConfigError;
use tether_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const UNSUPPORTED: i32 = 5;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const CANCELLED: i32 = 130;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Device ───────────────────────────────────────────────────────

    #[error("Operation cancelled")]
    #[diagnostic(code(tether::cancelled))]
    Cancelled,

    #[error("Device '{device_id}' is no longer supervised")]
    #[diagnostic(code(tether::disposed))]
    Disposed { device_id: String },

    #[error("Transport error ({kind}): {message}")]
    #[diagnostic(
        code(tether::transport),
        help("The link failed in a way that is not retried. Run with -v for details.")
    )]
    Transport { kind: String, message: String },

    #[error("'{path}' not found")]
    #[diagnostic(code(tether::not_found))]
    NotFound { path: String },

    #[error("Command `{command}` exited with status {status}")]
    #[diagnostic(code(tether::command_failed))]
    CommandFailed { command: String, status: i32 },

    #[error("Operation '{operation}' is not supported by {transport}")]
    #[diagnostic(code(tether::unsupported))]
    Unsupported { operation: String, transport: String },

    #[error("Operation failed ({kind}): {message}")]
    #[diagnostic(
        code(tether::operation_failed),
        help("Add '{kind}' to retryable_kinds in the config to retry it on a new connection.")
    )]
    OperationFailed { kind: String, message: String },

    #[error("Connection release check failed: {leaked} never released, {duplicated} released more than once")]
    #[diagnostic(code(tether::release_mismatch))]
    ReleaseMismatch { leaked: usize, duplicated: usize },

    #[error("Internal error: {0}")]
    #[diagnostic(code(tether::internal))]
    Internal(String),

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(tether::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Configuration file already exists")]
    #[diagnostic(
        code(tether::config_exists),
        help("Pass --force to overwrite it.\nPath: {path}")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(
        code(tether::config),
        help("Run: tether config path to locate the file in use")
    )]
    Config(Box<ConfigError>),

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(tether::json))]
    Json(#[from] serde_json::Error),

    #[error("Failed to render YAML: {0}")]
    #[diagnostic(code(tether::yaml))]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to render TOML: {0}")]
    #[diagnostic(code(tether::toml))]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Cancelled => exit_code::CANCELLED,
            Self::Transport { .. } | Self::Disposed { .. } => exit_code::CONNECTION,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Unsupported { .. } => exit_code::UNSUPPORTED,
            Self::ConfigExists { .. } => exit_code::CONFLICT,
            Self::Validation { .. } => exit_code::USAGE,
            Self::Config(err) if matches!(**err, ConfigError::Validation { .. }) => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::Config(Box::new(err))
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Cancelled => CliError::Cancelled,
            CoreError::Disposed { device_id } => CliError::Disposed { device_id },
            CoreError::InvalidArgument { message } => CliError::Validation {
                field: "argument".into(),
                reason: message,
            },
            CoreError::FileNotFound { path } => CliError::NotFound { path },
            CoreError::CommandFailed { command, status } => {
                CliError::CommandFailed { command, status }
            }
            CoreError::Unsupported {
                operation,
                transport,
            } => CliError::Unsupported {
                operation,
                transport,
            },
            CoreError::Transport { kind, message } => CliError::Transport { kind, message },
            CoreError::OperationFailed { kind, message } => {
                CliError::OperationFailed { kind, message }
            }
            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}
