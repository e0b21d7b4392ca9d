// Shared test doubles for tether-core integration tests.

#![allow(clippy::unwrap_used, dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tether_core::{
    ApiError, DeviceConnection, Progress, ShellExecution, TransportDescriptor, TransportKind,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

// ── Faults ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub enum Fault {
    #[default]
    None,
    /// Link is down: every call fails with a network error.
    Broken,
    /// Command-level failure, never retried.
    CommandFailed,
    /// Transport-specific failure identified by kind.
    Vendor(&'static str),
}

// ── Probe ───────────────────────────────────────────────────────────

/// Counters shared between a mock connection and the test body.
#[derive(Debug, Default)]
pub struct Probe {
    calls: AtomicUsize,
    released: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    used_after_release: AtomicBool,
    fail_release: AtomicBool,
    fault: Mutex<Fault>,
    delay: Mutex<Duration>,
    release_delay: Mutex<Duration>,
}

impl Probe {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Operations currently running on this connection.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn used_after_release(&self) -> bool {
        self.used_after_release.load(Ordering::SeqCst)
    }

    pub fn set_fault(&self, fault: Fault) {
        *self.fault.lock().unwrap() = fault;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_release_delay(&self, delay: Duration) {
        *self.release_delay.lock().unwrap() = delay;
    }

    pub fn fail_release(&self) {
        self.fail_release.store(true, Ordering::SeqCst);
    }

    fn check_not_released(&self) {
        if self.released() > 0 {
            self.used_after_release.store(true, Ordering::SeqCst);
        }
    }

    async fn run(&self, output: String) -> Result<String, ApiError> {
        self.check_not_released();
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.check_not_released();

        let fault = self.fault.lock().unwrap().clone();
        match fault {
            Fault::None => Ok(output),
            Fault::Broken => Err(ApiError::Network("connection reset by peer".into())),
            Fault::CommandFailed => Err(ApiError::CommandFailed {
                command: output,
                status: 1,
            }),
            Fault::Vendor(kind) => Err(ApiError::Other {
                kind: kind.into(),
                message: "transport reported a failure".into(),
            }),
        }
    }
}

// ── MockConnection ──────────────────────────────────────────────────

#[derive(Debug)]
pub struct MockConnection {
    id: String,
    owner: TransportDescriptor,
    probe: Arc<Probe>,
}

impl MockConnection {
    pub fn new(id: &str, kind: TransportKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            owner: kind.into(),
            probe: Arc::new(Probe::default()),
        })
    }

    pub fn probe(&self) -> &Probe {
        &self.probe
    }
}

/// Unsize a mock into the trait object the supervisor takes.
pub fn dynamic(connection: &Arc<MockConnection>) -> Arc<dyn DeviceConnection> {
    Arc::clone(connection) as Arc<dyn DeviceConnection>
}

#[async_trait]
impl DeviceConnection for MockConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn owner(&self) -> &TransportDescriptor {
        &self.owner
    }

    fn execute_shell(&self, command: &str) -> ShellExecution {
        let (tx, rx) = watch::channel(String::new());
        let probe = Arc::clone(&self.probe);
        let running = format!("{command}: running on {}", self.id);
        let done = format!("{command}: done on {}", self.id);
        ShellExecution::new(rx, async move {
            tx.send_replace(running);
            let output = probe.run(done).await?;
            tx.send_replace(output.clone());
            Ok(output)
        })
    }

    async fn pull_file(
        &self,
        device_path: &str,
        _local_path: &Path,
        _cancel: &CancellationToken,
        progress: Option<&Progress>,
    ) -> Result<(), ApiError> {
        self.probe.run(device_path.to_owned()).await?;
        if let Some(progress) = progress {
            progress.report(1.0);
        }
        Ok(())
    }

    async fn push_file(
        &self,
        _local_path: &Path,
        device_path: &str,
        _cancel: &CancellationToken,
        progress: Option<&Progress>,
    ) -> Result<(), ApiError> {
        self.probe.run(device_path.to_owned()).await?;
        if let Some(progress) = progress {
            progress.report(1.0);
        }
        Ok(())
    }

    async fn reboot(&self) -> Result<(), ApiError> {
        self.probe.run("reboot".into()).await.map(drop)
    }

    async fn release(&self) -> Result<(), ApiError> {
        self.probe.released.fetch_add(1, Ordering::SeqCst);
        let delay = *self.probe.release_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.probe.fail_release.load(Ordering::SeqCst) {
            return Err(ApiError::Session("release handshake failed".into()));
        }
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Poll `condition` until it holds, panicking after a generous deadline.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}
