// ── Simulated transport ──
//
// In-process links that behave like a flaky debug bridge or remote
// shell: each link survives a fixed number of operations and then reports
// network failures. Every link is tracked so the run can check that each
// one was released exactly once.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use tether_core::{
    ApiError, DeviceConnection, Progress, ShellExecution, TransportDescriptor, TransportKind,
};

const TRANSFER_STEPS: u32 = 4;

// ── Transport ────────────────────────────────────────────────────────

/// Factory for simulated links, shared with the discovery task.
#[derive(Debug)]
pub struct SimulatedTransport {
    owner: TransportDescriptor,
    fail_after: u32,
    op_delay: Duration,
    activity: Arc<Activity>,
    issued: Mutex<Vec<Arc<SimulatedConnection>>>,
}

/// Concurrency observed across every link of one transport.
#[derive(Debug, Default)]
struct Activity {
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Link accounting at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransportReport {
    pub created: usize,
    pub released: usize,
    pub leaked: usize,
    pub double_released: usize,
    pub peak_concurrency: usize,
}

impl TransportReport {
    pub fn is_balanced(&self) -> bool {
        self.leaked == 0 && self.double_released == 0
    }
}

impl SimulatedTransport {
    pub fn new(kind: TransportKind, fail_after: u32, op_delay: Duration) -> Self {
        Self {
            owner: kind.into(),
            fail_after,
            op_delay,
            activity: Arc::new(Activity::default()),
            issued: Mutex::new(Vec::new()),
        }
    }

    /// Open a fresh link.
    pub fn connect(&self) -> Arc<SimulatedConnection> {
        let id = format!("sim-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let connection = Arc::new(SimulatedConnection {
            id,
            owner: self.owner.clone(),
            link: Arc::new(LinkState {
                fail_after: self.fail_after,
                op_delay: self.op_delay,
                activity: Arc::clone(&self.activity),
                ops: AtomicU32::new(0),
                released: AtomicU32::new(0),
                rebooted: AtomicBool::new(false),
            }),
        });
        debug!(connection_id = %connection.id, "simulated link opened");
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&connection));
        connection
    }

    pub fn report(&self) -> TransportReport {
        let issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
        let releases: Vec<u32> = issued.iter().map(|c| c.release_count()).collect();
        TransportReport {
            created: releases.len(),
            released: releases.iter().filter(|&&n| n >= 1).count(),
            leaked: releases.iter().filter(|&&n| n == 0).count(),
            double_released: releases.iter().filter(|&&n| n > 1).count(),
            peak_concurrency: self.activity.peak.load(Ordering::Acquire),
        }
    }

    /// Wait until every issued link has been released or `deadline` passes.
    /// Releases after a retirement run in the background.
    pub async fn settle(&self, deadline: Duration) -> TransportReport {
        let started = tokio::time::Instant::now();
        loop {
            let report = self.report();
            if report.leaked == 0 || started.elapsed() >= deadline {
                return report;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

// ── Connection ───────────────────────────────────────────────────────

#[derive(Debug)]
pub struct SimulatedConnection {
    id: String,
    owner: TransportDescriptor,
    link: Arc<LinkState>,
}

#[derive(Debug)]
struct LinkState {
    fail_after: u32,
    op_delay: Duration,
    activity: Arc<Activity>,
    ops: AtomicU32,
    released: AtomicU32,
    rebooted: AtomicBool,
}

impl SimulatedConnection {
    pub fn release_count(&self) -> u32 {
        self.link.released.load(Ordering::Acquire)
    }
}

impl LinkState {
    /// One operation on the link: fails once the link is used up.
    async fn operate(&self) -> Result<(), ApiError> {
        if self.released.load(Ordering::Acquire) > 0 {
            return Err(ApiError::Defunct);
        }
        if self.rebooted.load(Ordering::Acquire) {
            return Err(ApiError::DeviceNotFound {
                serial: "rebooting".into(),
            });
        }
        let n = self.ops.fetch_add(1, Ordering::AcqRel) + 1;
        if self.fail_after > 0 && n > self.fail_after {
            return Err(ApiError::Network("simulated link drop".into()));
        }

        let active = self.activity.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.activity.peak.fetch_max(active, Ordering::AcqRel);
        tokio::time::sleep(self.op_delay).await;
        self.activity.active.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }

    async fn transfer(
        &self,
        cancel: &CancellationToken,
        progress: Option<&Progress>,
    ) -> Result<(), ApiError> {
        self.operate().await?;
        for step in 1..=TRANSFER_STEPS {
            if cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }
            if let Some(progress) = progress {
                progress.report(f64::from(step) / f64::from(TRANSFER_STEPS));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceConnection for SimulatedConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn owner(&self) -> &TransportDescriptor {
        &self.owner
    }

    fn execute_shell(&self, command: &str) -> ShellExecution {
        let (tx, rx) = watch::channel(String::new());
        let link = Arc::clone(&self.link);
        let command = command.to_owned();
        let id = self.id.clone();
        ShellExecution::new(rx, async move {
            tx.send_replace(format!("$ {command}"));
            link.operate().await?;
            let output = format!("$ {command}\n[{id}] ok");
            tx.send_replace(output.clone());
            trace!(connection_id = %id, command = %command, "simulated command finished");
            Ok(output)
        })
    }

    async fn pull_file(
        &self,
        _device_path: &str,
        _local_path: &Path,
        cancel: &CancellationToken,
        progress: Option<&Progress>,
    ) -> Result<(), ApiError> {
        self.link.transfer(cancel, progress).await
    }

    async fn push_file(
        &self,
        _local_path: &Path,
        _device_path: &str,
        cancel: &CancellationToken,
        progress: Option<&Progress>,
    ) -> Result<(), ApiError> {
        self.link.transfer(cancel, progress).await
    }

    async fn reboot(&self) -> Result<(), ApiError> {
        self.link.operate().await?;
        self.link.rebooted.store(true, Ordering::Release);
        Ok(())
    }

    async fn release(&self) -> Result<(), ApiError> {
        let previous = self.link.released.fetch_add(1, Ordering::AcqRel);
        debug!(connection_id = %self.id, previous, "simulated link released");
        Ok(())
    }
}
