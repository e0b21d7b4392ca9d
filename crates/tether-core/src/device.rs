// ── Persistent device ──
//
// A stable handle for one logical device whose physical connection comes
// and goes. Operations run against whatever connection is current; a
// transport failure retires that connection and the operation waits for
// the next one instead of failing.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::Utc;
use dashmap::DashSet;
use tether_api::{DeviceConnection, Error as ApiError, Progress};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::command::CommandResult;
use crate::config::SupervisorConfig;
use crate::error::CoreError;
use crate::event::{ConnectionState, DeviceEvent, EventNotifier};
use crate::gate::ConcurrencyGate;
use crate::slot::{
    ConnectionSlot, ConnectionSource, SharedConnection, connection_key, same_connection,
};

/// Method name reported while no connection is resolved.
pub const OFFLINE: &str = "Offline";

// ── PersistentDevice ─────────────────────────────────────────────────

/// Supervisor for one device's exchangeable connection.
///
/// Cheaply cloneable via `Arc<DeviceInner>`. Every connection handed to
/// the device (initially or through [`provide_connection`](Self::provide_connection))
/// is released exactly once: on retirement, on replacement or on
/// [`dispose`](Self::dispose).
#[derive(Clone)]
pub struct PersistentDevice {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    device_id: String,
    slot: ConnectionSlot,
    gate: ConcurrencyGate,
    config: SupervisorConfig,
    notifier: EventNotifier,
    latest_connection_id: ArcSwap<String>,
    /// Retired connections whose release has not finished yet.
    retiring: DashSet<usize>,
    /// Shared token, read once per attempt.
    cancellation: ArcSwapOption<CancellationToken>,
    /// Fired by `dispose()` to wake operations waiting for a connection.
    shutdown: CancellationToken,
    disposed: AtomicBool,
}

impl PersistentDevice {
    /// Start supervising `device_id` with `initial` as its first connection.
    pub fn new(
        device_id: impl Into<String>,
        initial: Arc<dyn DeviceConnection>,
        config: SupervisorConfig,
    ) -> Self {
        let device_id = device_id.into();
        let initial_state = connected_state(&initial);
        let latest_connection_id = initial.connection_id().to_owned();

        debug!(
            device_id = %device_id,
            connection_id = %latest_connection_id,
            concurrency = config.concurrency,
            "supervising device"
        );

        Self {
            inner: Arc::new(DeviceInner {
                slot: ConnectionSlot::new(initial),
                gate: ConcurrencyGate::new(config.concurrency),
                notifier: EventNotifier::new(config.event_capacity, initial_state),
                latest_connection_id: ArcSwap::from_pointee(latest_connection_id),
                retiring: DashSet::new(),
                cancellation: ArcSwapOption::empty(),
                shutdown: CancellationToken::new(),
                disposed: AtomicBool::new(false),
                device_id,
                config,
            }),
        }
    }

    // ── Properties ───────────────────────────────────────────────────

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    /// Id of the most recently provided connection. Not cleared when that
    /// connection is retired.
    pub fn latest_connection_id(&self) -> String {
        self.inner.latest_connection_id.load().to_string()
    }

    /// Display name of the current connection's transport, or [`OFFLINE`].
    pub fn current_connection_method(&self) -> String {
        self.inner
            .slot
            .load()
            .get()
            .map_or_else(|| OFFLINE.to_owned(), |c| c.owner().display_name.clone())
    }

    pub fn concurrency(&self) -> usize {
        self.inner.gate.capacity()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Install (or clear) the token shared by every command on this device.
    /// Operations past their current suspension point are unaffected.
    pub fn set_cancellation_token(&self, token: Option<CancellationToken>) {
        self.inner.cancellation.store(token.map(Arc::new));
    }

    pub fn cancellation_token(&self) -> Option<CancellationToken> {
        self.inner
            .cancellation
            .load_full()
            .map(|token| CancellationToken::clone(&token))
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.notifier.subscribe()
    }

    pub fn event_stream(&self) -> BroadcastStream<DeviceEvent> {
        BroadcastStream::new(self.subscribe())
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.notifier.watch_state()
    }

    pub fn state_stream(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.connection_state())
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.notifier.state()
    }

    // ── Retrying execution ───────────────────────────────────────────

    /// Run `operation` against the current connection, retrying on the
    /// next connection whenever it fails with a transport failure.
    ///
    /// `operation` may be invoked once per attempt. Non-transport errors
    /// are returned as-is (converted to [`CoreError`]) without touching the
    /// slot. Fails with [`CoreError::Cancelled`] if the shared token fires
    /// while waiting and with [`CoreError::Disposed`] once the device is
    /// disposed.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, CoreError>
    where
        F: Fn(Arc<dyn DeviceConnection>, CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let inner = &self.inner;
        let mut attempt: u32 = 0;

        loop {
            if inner.disposed.load(Ordering::Acquire) {
                return Err(inner.disposed_error());
            }

            let observed = inner.slot.load();
            let cancel = inner.current_token();

            let connection = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(CoreError::Cancelled),
                () = inner.shutdown.cancelled() => return Err(inner.disposed_error()),
                resolved = observed.resolution() => resolved,
            };
            let Some(connection) = connection else {
                return Err(CoreError::Internal("connection source dropped".into()));
            };

            let _shared = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(CoreError::Cancelled),
                guard = inner.slot.read() => guard,
            };
            if !inner.slot.is_current(&observed) {
                trace!(device_id = %inner.device_id, "slot changed while waiting, reloading");
                continue;
            }

            let _permit = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(CoreError::Cancelled),
                permit = inner.gate.enter() => permit?,
            };

            attempt += 1;
            match operation(Arc::clone(&connection), cancel.clone()).await {
                Ok(value) => return Ok(value),
                Err(error) if inner.config.classifier.is_transport_failure(&error) => {
                    warn!(
                        device_id = %inner.device_id,
                        connection_id = %connection.connection_id(),
                        attempt,
                        error = %error,
                        "transport failure, waiting for a new connection"
                    );
                    self.retire(&observed, connection, error);
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Retire `observed` after a transport failure. Called with read access
    /// held; only the first caller per connection does anything.
    fn retire(
        &self,
        observed: &Arc<ConnectionSource>,
        connection: SharedConnection,
        error: ApiError,
    ) {
        let inner = &self.inner;
        if !inner.slot.retire(observed) {
            trace!(
                device_id = %inner.device_id,
                connection_id = %connection.connection_id(),
                "connection already retired"
            );
            return;
        }
        let key = connection_key(&connection);
        inner.retiring.insert(key);
        inner.refresh_state();

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            inner.notifier.emit(DeviceEvent::ConnectionLost {
                device_id: inner.device_id.clone(),
                connection: Arc::clone(&connection),
                error: Arc::new(error),
                at: Utc::now(),
            });
            // Wait for every reader still using the old connection.
            drop(inner.slot.write().await);
            inner.release(connection).await;
            inner.retiring.remove(&key);
        });
    }

    // ── Connection replacement ───────────────────────────────────────

    /// Hand a new connection to the device. The device owns it from here.
    ///
    /// Resolves a pending slot (waking waiting operations) or replaces the
    /// current connection, releasing the old one. Fails with
    /// [`CoreError::InvalidArgument`] for a connection with a blank id, the
    /// connection already installed, or one retired but not yet released,
    /// and with [`CoreError::Disposed`] after disposal (the offered
    /// connection is released).
    pub async fn provide_connection(
        &self,
        connection: Arc<dyn DeviceConnection>,
    ) -> Result<(), CoreError> {
        let inner = &self.inner;
        if connection.connection_id().trim().is_empty() {
            return Err(CoreError::InvalidArgument {
                message: "connection id must not be blank".into(),
            });
        }

        let exclusive = inner.slot.write().await;
        if inner.retiring.contains(&connection_key(&connection)) {
            return Err(CoreError::InvalidArgument {
                message: format!(
                    "connection {} was retired and is being released",
                    connection.connection_id()
                ),
            });
        }
        if inner.disposed.load(Ordering::Acquire) {
            drop(exclusive);
            inner.release(connection).await;
            return Err(inner.disposed_error());
        }

        let current = inner.slot.load();
        if current
            .get()
            .is_some_and(|installed| same_connection(&installed, &connection))
        {
            return Err(CoreError::InvalidArgument {
                message: format!(
                    "connection {} is already installed",
                    connection.connection_id()
                ),
            });
        }

        let replaced = match current.resolve(Arc::clone(&connection)) {
            Ok(()) => None,
            Err(connection) => inner
                .slot
                .replace(ConnectionSource::resolved(connection))
                .get(),
        };
        inner
            .latest_connection_id
            .store(Arc::new(connection.connection_id().to_owned()));
        inner.refresh_state();
        drop(exclusive);

        info!(
            device_id = %inner.device_id,
            connection_id = %connection.connection_id(),
            method = %connection.owner(),
            "connection established"
        );
        inner.notifier.emit(DeviceEvent::ConnectionEstablished {
            device_id: inner.device_id.clone(),
            connection_id: connection.connection_id().to_owned(),
            method: connection.owner().display_name.clone(),
            at: Utc::now(),
        });

        if let Some(old) = replaced {
            inner.release(old).await;
        }
        Ok(())
    }

    // ── Disposal ─────────────────────────────────────────────────────

    /// Stop supervising. Waiting operations fail with
    /// [`CoreError::Disposed`], in-flight operations drain, and the current
    /// connection (if any) is released. Idempotent.
    pub async fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.shutdown.cancel();

        let exclusive = inner.slot.write().await;
        let previous = inner.slot.replace(ConnectionSource::pending());
        inner.refresh_state();
        drop(exclusive);

        debug!(device_id = %inner.device_id, "device disposed");
        if let Some(connection) = previous.get() {
            inner.release(connection).await;
        }
    }

    // ── Command surface ──────────────────────────────────────────────

    /// Start a shell command. Requires a Tokio runtime.
    ///
    /// The returned handle stays valid across reconnects: its output
    /// follows whichever attempt is current.
    pub fn execute_shell_command(&self, command: impl Into<String>) -> CommandResult {
        let command = command.into();
        let result = CommandResult::new(command.clone());
        let device = self.clone();
        let forwarder = result.clone();

        tokio::spawn(async move {
            let outcome = device
                .execute(|connection, _cancel| {
                    forwarder.attach(connection.execute_shell(&command))
                })
                .await;
            if let Err(ref error) = outcome {
                debug!(
                    device_id = %device.device_id(),
                    command = %command,
                    error = %error,
                    "shell command failed"
                );
            }
            forwarder.finish(outcome);
        });

        result
    }

    /// Copy `device_path` from the device to `local_path`.
    pub async fn pull_file(
        &self,
        device_path: &str,
        local_path: &Path,
        progress: Option<Progress>,
    ) -> Result<(), CoreError> {
        self.execute(|connection, cancel| {
            let progress = progress.clone();
            async move {
                connection
                    .pull_file(device_path, local_path, &cancel, progress.as_ref())
                    .await
            }
        })
        .await
    }

    /// Copy `local_path` onto the device at `device_path`.
    pub async fn push_file(
        &self,
        local_path: &Path,
        device_path: &str,
        progress: Option<Progress>,
    ) -> Result<(), CoreError> {
        self.execute(|connection, cancel| {
            let progress = progress.clone();
            async move {
                connection
                    .push_file(local_path, device_path, &cancel, progress.as_ref())
                    .await
            }
        })
        .await
    }

    pub async fn reboot(&self) -> Result<(), CoreError> {
        self.execute(|connection, _cancel| async move { connection.reboot().await })
            .await
    }
}

impl std::fmt::Debug for PersistentDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentDevice")
            .field("device_id", &self.inner.device_id)
            .field("latest_connection_id", &self.latest_connection_id())
            .field("method", &self.current_connection_method())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

// ── DeviceInner ──────────────────────────────────────────────────────

impl DeviceInner {
    fn current_token(&self) -> CancellationToken {
        self.cancellation
            .load_full()
            .map_or_else(CancellationToken::new, |token| {
                CancellationToken::clone(&token)
            })
    }

    fn disposed_error(&self) -> CoreError {
        CoreError::Disposed {
            device_id: self.device_id.clone(),
        }
    }

    fn refresh_state(&self) {
        self.notifier.publish_state(|| {
            if self.disposed.load(Ordering::Acquire) {
                return ConnectionState::Disposed;
            }
            self.slot
                .load()
                .get()
                .map_or(ConnectionState::AwaitingConnection, |c| connected_state(&c))
        });
    }

    /// Release a connection, bounded by the configured timeout. Failures
    /// are logged only.
    async fn release(&self, connection: SharedConnection) {
        let connection_id = connection.connection_id().to_owned();
        match tokio::time::timeout(self.config.release_timeout, connection.release()).await {
            Ok(Ok(())) => {
                debug!(
                    device_id = %self.device_id,
                    connection_id = %connection_id,
                    "connection released"
                );
            }
            Ok(Err(e)) => {
                warn!(
                    device_id = %self.device_id,
                    connection_id = %connection_id,
                    error = %e,
                    "connection release failed"
                );
            }
            Err(_) => {
                let timeout_ms =
                    u64::try_from(self.config.release_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    device_id = %self.device_id,
                    connection_id = %connection_id,
                    timeout_ms,
                    "connection release timed out"
                );
            }
        }
    }
}

fn connected_state(connection: &SharedConnection) -> ConnectionState {
    ConnectionState::Connected {
        connection_id: connection.connection_id().to_owned(),
        method: connection.owner().display_name.clone(),
    }
}
