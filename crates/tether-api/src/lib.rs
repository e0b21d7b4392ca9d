// tether-api: Connection contract between device transports and the supervisor.

pub mod connection;
pub mod error;
pub mod progress;
pub mod shell;

pub use connection::{DeviceConnection, TransportDescriptor, TransportKind};
pub use error::Error;
pub use progress::Progress;
pub use shell::ShellExecution;
