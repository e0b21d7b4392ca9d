//! Connection supervision for devices reached over ephemeral links.
//!
//! This crate sits between transport implementations (`tether-api`) and
//! consumers such as the `tether` CLI:
//!
//! - **[`PersistentDevice`]**: Stable handle for one logical device.
//!   [`execute()`](PersistentDevice::execute) runs an operation against the
//!   current connection and transparently retries it on the next one when
//!   the link fails; [`provide_connection()`](PersistentDevice::provide_connection)
//!   installs a replacement. Every connection is released exactly once.
//!
//! - **[`CommandResult`]**: One handle per shell command whose output
//!   stream survives retries across connections.
//!
//! - **[`DeviceEvent`] / [`ConnectionState`]**: Broadcast events and a
//!   watchable state for observers (UI, logging, discovery).
//!
//! - **[`FailureClassifier`]**: Decides which errors retire a connection;
//!   [`TransportClassifier`] is the default, extensible by error kind.
//!
//! - **[`DeviceRegistry`]**: Devices keyed by identity, the entry point for
//!   a discovery component.

pub mod classify;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
mod gate;
pub mod registry;
mod slot;

// ── Primary re-exports ──────────────────────────────────────────────
pub use classify::{FailureClassifier, TransportClassifier};
pub use command::{CANCELLED_OUTPUT, CommandResult};
pub use config::SupervisorConfig;
pub use device::{OFFLINE, PersistentDevice};
pub use error::CoreError;
pub use event::{ConnectionState, DeviceEvent};
pub use registry::DeviceRegistry;

// Re-export the connection contract for convenience.
pub use tether_api::{
    DeviceConnection, Error as ApiError, Progress, ShellExecution, TransportDescriptor,
    TransportKind,
};
