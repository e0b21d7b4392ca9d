// ── Device events and connection state ──
//
// Two signals per device: a broadcast of discrete events (lost /
// established) and a watch of the current connection state. Both are
// published outside the slot lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tether_api::{DeviceConnection, Error as ApiError};
use tokio::sync::{broadcast, watch};

/// A connection lifecycle event for one device.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A connection was retired after a transport failure. The connection
    /// is released once in-flight operations against it have drained.
    ConnectionLost {
        device_id: String,
        connection: Arc<dyn DeviceConnection>,
        error: Arc<ApiError>,
        at: DateTime<Utc>,
    },
    /// A new connection became active.
    ConnectionEstablished {
        device_id: String,
        connection_id: String,
        method: String,
        at: DateTime<Utc>,
    },
}

impl DeviceEvent {
    pub fn device_id(&self) -> &str {
        match self {
            Self::ConnectionLost { device_id, .. }
            | Self::ConnectionEstablished { device_id, .. } => device_id,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::ConnectionLost { at, .. } | Self::ConnectionEstablished { at, .. } => *at,
        }
    }
}

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connected {
        connection_id: String,
        method: String,
    },
    AwaitingConnection,
    Disposed,
}

pub(crate) struct EventNotifier {
    events: broadcast::Sender<DeviceEvent>,
    state: watch::Sender<ConnectionState>,
}

impl EventNotifier {
    pub(crate) fn new(capacity: usize, initial: ConnectionState) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (state, _) = watch::channel(initial);
        Self { events, state }
    }

    /// Fire-and-forget; having no subscribers is fine.
    pub(crate) fn emit(&self, event: DeviceEvent) {
        let _ = self.events.send(event);
    }

    /// Recompute the state inside the watch lock so concurrent publishers
    /// always settle on the newest value.
    pub(crate) fn publish_state(&self, compute: impl FnOnce() -> ConnectionState) {
        self.state.send_if_modified(|current| {
            let next = compute();
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }
}
