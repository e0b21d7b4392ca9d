// ── Core error types ──
//
// User-facing errors from tether-core. Callers never see raw transport
// failures for link-level problems; those are retried. The
// `From<tether_api::Error>` impl translates whatever does escape into
// domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
///
/// `Clone` so a single command outcome can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Device {device_id} has been disposed")]
    Disposed { device_id: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    // ── Command errors ───────────────────────────────────────────────
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Command `{command}` exited with status {status}")]
    CommandFailed { command: String, status: i32 },

    #[error("Operation not supported: {operation} (transport: {transport})")]
    Unsupported {
        operation: String,
        transport: String,
    },

    // ── Transport errors (not retried) ───────────────────────────────
    #[error("Transport error ({kind}): {message}")]
    Transport { kind: String, message: String },

    #[error("Operation failed ({kind}): {message}")]
    OperationFailed { kind: String, message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<tether_api::Error> for CoreError {
    fn from(err: tether_api::Error) -> Self {
        use tether_api::Error as ApiError;

        match err {
            ApiError::Cancelled => CoreError::Cancelled,
            ApiError::FileNotFound { path } => CoreError::FileNotFound { path },
            ApiError::CommandFailed { command, status } => {
                CoreError::CommandFailed { command, status }
            }
            ApiError::Unsupported {
                transport,
                operation,
            } => CoreError::Unsupported {
                operation: operation.to_string(),
                transport,
            },
            ApiError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound => {
                CoreError::FileNotFound {
                    path: e.to_string(),
                }
            }
            ApiError::Other { kind, message } => CoreError::OperationFailed { kind, message },
            ref other => CoreError::Transport {
                kind: other.kind().to_string(),
                message: other.to_string(),
            },
        }
    }
}
