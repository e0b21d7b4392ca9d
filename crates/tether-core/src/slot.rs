// ── Connection slot ──
//
// The exchangeable "current connection or promise of one". The slot
// always points at a `ConnectionSource`; a source is either resolved
// (holds a connection) or pending (resolves at most once, later).
//
// Swap discipline:
// - retirement CASes a resolved source to a fresh pending one while the
//   retiring operation still holds read access;
// - replacement and disposal swap under write access;
// - a pending source is only ever resolved, never swapped out, while
//   the device is live.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tether_api::DeviceConnection;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, watch};

pub(crate) type SharedConnection = Arc<dyn DeviceConnection>;

/// One generation of the slot: a connection, or a one-shot promise of one.
pub(crate) struct ConnectionSource {
    cell: watch::Sender<Option<SharedConnection>>,
}

impl ConnectionSource {
    pub(crate) fn resolved(connection: SharedConnection) -> Self {
        let (cell, _) = watch::channel(Some(connection));
        Self { cell }
    }

    pub(crate) fn pending() -> Self {
        let (cell, _) = watch::channel(None);
        Self { cell }
    }

    pub(crate) fn get(&self) -> Option<SharedConnection> {
        self.cell.borrow().clone()
    }

    /// Wait until this source holds a connection.
    ///
    /// Only `None` if the source was dropped mid-wait, which cannot happen
    /// while the caller holds `&self`.
    pub(crate) async fn resolution(&self) -> Option<SharedConnection> {
        let mut rx = self.cell.subscribe();
        let resolved = rx.wait_for(Option::is_some).await.ok()?;
        let connection = (*resolved).clone();
        drop(resolved);
        connection
    }

    /// Resolve a pending source. Hands the connection back if the source
    /// was already resolved.
    pub(crate) fn resolve(&self, connection: SharedConnection) -> Result<(), SharedConnection> {
        let mut incoming = Some(connection);
        self.cell.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = incoming.take();
            true
        });
        incoming.map_or(Ok(()), Err)
    }
}

/// The slot itself plus the reader/writer discipline around it.
pub(crate) struct ConnectionSlot {
    current: ArcSwap<ConnectionSource>,
    lock: RwLock<()>,
}

impl ConnectionSlot {
    pub(crate) fn new(initial: SharedConnection) -> Self {
        Self {
            current: ArcSwap::from_pointee(ConnectionSource::resolved(initial)),
            lock: RwLock::new(()),
        }
    }

    pub(crate) fn load(&self) -> Arc<ConnectionSource> {
        self.current.load_full()
    }

    pub(crate) fn is_current(&self, observed: &Arc<ConnectionSource>) -> bool {
        Arc::ptr_eq(&self.current.load(), observed)
    }

    /// Swap `observed` for a fresh pending source. Returns `true` only for
    /// the caller whose swap took effect.
    pub(crate) fn retire(&self, observed: &Arc<ConnectionSource>) -> bool {
        let previous = self
            .current
            .compare_and_swap(observed, Arc::new(ConnectionSource::pending()));
        Arc::ptr_eq(&previous, observed)
    }

    /// Unconditionally install `source`. Callers must hold write access.
    pub(crate) fn replace(&self, source: ConnectionSource) -> Arc<ConnectionSource> {
        self.current.swap(Arc::new(source))
    }

    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().await
    }
}

/// Identity comparison for connections (ignores vtable pointers).
pub(crate) fn same_connection(a: &SharedConnection, b: &SharedConnection) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Address of the connection instance, stable while any `Arc` to it lives.
pub(crate) fn connection_key(connection: &SharedConnection) -> usize {
    Arc::as_ptr(connection).cast::<()>().addr()
}
