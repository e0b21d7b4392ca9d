// ── Device registry ──
//
// Keyed collection of persistent devices. A discovery component calls
// `attach` whenever it finds a connection; the registry decides whether
// that starts a new device or reconnects a known one.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::join_all;
use tether_api::DeviceConnection;
use tracing::{debug, info};

use crate::config::SupervisorConfig;
use crate::device::PersistentDevice;
use crate::error::CoreError;

type ConfigResolver = dyn Fn(&str) -> SupervisorConfig + Send + Sync;

/// All supervised devices, keyed by device identity.
pub struct DeviceRegistry {
    devices: DashMap<String, PersistentDevice>,
    resolve_config: Arc<ConfigResolver>,
}

impl DeviceRegistry {
    /// Every device gets the same configuration.
    pub fn new(config: SupervisorConfig) -> Self {
        Self::with_resolver(move |_| config.clone())
    }

    /// Configuration is looked up per device id when a device is created.
    pub fn with_resolver(
        resolve_config: impl Fn(&str) -> SupervisorConfig + Send + Sync + 'static,
    ) -> Self {
        Self {
            devices: DashMap::new(),
            resolve_config: Arc::new(resolve_config),
        }
    }

    /// Start supervising `device_id` with `connection`, or hand the
    /// connection to the device already known under that id.
    pub async fn attach(
        &self,
        device_id: &str,
        connection: Arc<dyn DeviceConnection>,
    ) -> Result<PersistentDevice, CoreError> {
        if device_id.trim().is_empty() {
            return Err(CoreError::InvalidArgument {
                message: "device id must not be blank".into(),
            });
        }

        let existing = match self.devices.entry(device_id.to_owned()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let config = (self.resolve_config)(device_id);
                let device = PersistentDevice::new(device_id, connection, config);
                entry.insert(device.clone());
                info!(device_id, "device attached");
                return Ok(device);
            }
        };

        debug!(device_id, "known device, providing new connection");
        existing.provide_connection(connection).await?;
        Ok(existing)
    }

    pub fn get(&self, device_id: &str) -> Option<PersistentDevice> {
        self.devices.get(device_id).map(|entry| entry.value().clone())
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Forget a device and dispose it.
    pub async fn remove(&self, device_id: &str) -> Option<PersistentDevice> {
        let (_, device) = self.devices.remove(device_id)?;
        device.dispose().await;
        info!(device_id, "device removed");
        Some(device)
    }

    /// Dispose every device and empty the registry.
    pub async fn dispose_all(&self) {
        let devices: Vec<PersistentDevice> = self
            .devices
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.devices.clear();
        join_all(devices.iter().map(PersistentDevice::dispose)).await;
        debug!(count = devices.len(), "all devices disposed");
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.ids())
            .finish_non_exhaustive()
    }
}
