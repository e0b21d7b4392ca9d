use std::io;

use thiserror::Error;

/// Top-level error type for the `tether-api` crate.
///
/// Covers every failure a device transport can report: link-level
/// breakage (socket resets, dead sessions, vanished devices) and
/// command-level failures (missing files, non-zero exits).
/// `tether-core` maps these into user-facing errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Link ────────────────────────────────────────────────────────
    /// Socket-level failure (connection reset, refused, aborted).
    #[error("Network error: {0}")]
    Network(String),

    /// I/O failure on the transport stream or a local file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The debug bridge no longer knows about the device.
    #[error("Device not found: {serial}")]
    DeviceNotFound { serial: String },

    /// A shell command stopped producing output within the allowed window.
    #[error("Shell command unresponsive after {timeout_secs}s: {command}")]
    ShellUnresponsive { command: String, timeout_secs: u64 },

    /// Remote-shell session or protocol failure.
    #[error("Session error: {0}")]
    Session(String),

    /// Proxy or tunnel in front of the device failed.
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// The transport object tore itself down underneath the caller.
    #[error("Connection is defunct")]
    Defunct,

    // ── Command ─────────────────────────────────────────────────────
    /// Remote path does not exist.
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    /// Command ran but exited unsuccessfully.
    #[error("Command `{command}` exited with status {status}")]
    CommandFailed { command: String, status: i32 },

    /// Operation not available on this transport.
    #[error("Unsupported operation on {transport}: {operation}")]
    Unsupported {
        transport: String,
        operation: &'static str,
    },

    /// The caller's cancellation token fired inside the transport call.
    #[error("Operation cancelled")]
    Cancelled,

    /// Transport-specific failure identified by a free-form kind.
    #[error("{kind}: {message}")]
    Other { kind: String, message: String },
}

impl Error {
    /// Returns `true` if the error means the link itself is broken and the
    /// operation is worth retrying on a fresh connection.
    pub fn is_transport_failure(&self) -> bool {
        match self {
            Self::Network(_)
            | Self::DeviceNotFound { .. }
            | Self::ShellUnresponsive { .. }
            | Self::Session(_)
            | Self::Proxy(_)
            | Self::Defunct => true,
            Self::Io(e) => e.kind() != io::ErrorKind::NotFound,
            Self::FileNotFound { .. }
            | Self::CommandFailed { .. }
            | Self::Unsupported { .. }
            | Self::Cancelled
            | Self::Other { .. } => false,
        }
    }

    /// Stable snake_case identifier for this error's kind.
    ///
    /// Used by configuration to name additional retryable kinds.
    pub fn kind(&self) -> &str {
        match self {
            Self::Network(_) => "network",
            Self::Io(_) => "io",
            Self::DeviceNotFound { .. } => "device_not_found",
            Self::ShellUnresponsive { .. } => "shell_unresponsive",
            Self::Session(_) => "session",
            Self::Proxy(_) => "proxy",
            Self::Defunct => "defunct",
            Self::FileNotFound { .. } => "file_not_found",
            Self::CommandFailed { .. } => "command_failed",
            Self::Unsupported { .. } => "unsupported",
            Self::Cancelled => "cancelled",
            Self::Other { kind, .. } => kind,
        }
    }

    /// Returns `true` if this is a "not found" error for a remote or local path.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::FileNotFound { .. } => true,
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
