//! The device connection contract.
//!
//! A [`DeviceConnection`] owns one physical link to a device (a debug-bridge
//! session, a remote shell, ...). Links are ephemeral: any call may fail
//! with a transport-class [`Error`] once the link has dropped. Whoever holds
//! the connection is responsible for calling [`release`](DeviceConnection::release)
//! exactly once.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::progress::Progress;
use crate::shell::ShellExecution;

// ── Transport descriptor ─────────────────────────────────────────────

/// Which kind of transport produced a connection.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// USB / TCP debug bridge.
    DebugBridge,
    /// Remote shell over the network.
    RemoteShell,
    /// In-process simulated link (demos and tests).
    Simulated,
}

impl TransportKind {
    /// Human-readable name used when none is supplied.
    pub fn default_display_name(self) -> &'static str {
        match self {
            Self::DebugBridge => "ADB",
            Self::RemoteShell => "SSH",
            Self::Simulated => "Simulated",
        }
    }
}

/// Describes the transport (scanner) that owns a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportDescriptor {
    pub kind: TransportKind,
    pub display_name: String,
}

impl TransportDescriptor {
    pub fn new(kind: TransportKind, display_name: impl Into<String>) -> Self {
        Self {
            kind,
            display_name: display_name.into(),
        }
    }
}

impl From<TransportKind> for TransportDescriptor {
    fn from(kind: TransportKind) -> Self {
        Self::new(kind, kind.default_display_name())
    }
}

impl fmt::Display for TransportDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name)
    }
}

// ── DeviceConnection ─────────────────────────────────────────────────

/// One physical link to a device.
#[async_trait]
pub trait DeviceConnection: Send + Sync + fmt::Debug {
    /// Identifier of this particular link (serial number, host address, ...).
    fn connection_id(&self) -> &str;

    /// The transport that produced this link.
    fn owner(&self) -> &TransportDescriptor;

    /// Start a shell command. Output streams through the returned
    /// execution; failures surface when its completion resolves.
    fn execute_shell(&self, command: &str) -> ShellExecution;

    /// Copy a file from the device to the local filesystem.
    async fn pull_file(
        &self,
        device_path: &str,
        local_path: &Path,
        cancel: &CancellationToken,
        progress: Option<&Progress>,
    ) -> Result<(), Error>;

    /// Copy a local file onto the device.
    async fn push_file(
        &self,
        local_path: &Path,
        device_path: &str,
        cancel: &CancellationToken,
        progress: Option<&Progress>,
    ) -> Result<(), Error>;

    /// Reboot the device. The link is expected to drop afterwards.
    async fn reboot(&self) -> Result<(), Error>;

    /// Tear down the physical link.
    async fn release(&self) -> Result<(), Error>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn transport_kind_uses_kebab_case_names() {
        assert_eq!(TransportKind::DebugBridge.to_string(), "debug-bridge");
        assert_eq!(
            TransportKind::from_str("remote-shell").ok(),
            Some(TransportKind::RemoteShell)
        );
        assert!(TransportKind::from_str("carrier-pigeon").is_err());
    }

    #[test]
    fn descriptor_defaults_to_kind_display_name() {
        let owner = TransportDescriptor::from(TransportKind::RemoteShell);
        assert_eq!(owner.display_name, "SSH");
        assert_eq!(owner.to_string(), "SSH");
    }

    #[test]
    fn descriptor_serializes_kind_in_kebab_case() {
        let owner = TransportDescriptor::new(TransportKind::DebugBridge, "USB bridge");
        let json = serde_json::to_value(&owner).unwrap();
        assert_eq!(json["kind"], "debug-bridge");
        assert_eq!(json["display_name"], "USB bridge");
    }
}
