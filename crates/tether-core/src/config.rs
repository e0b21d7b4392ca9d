// ── Supervisor tuning ──
//
// Runtime knobs for a `PersistentDevice`. Built by the CLI (usually from
// `tether-config`); core never reads config files.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::classify::{FailureClassifier, TransportClassifier};

/// Parallel operations allowed against one connection.
pub const DEFAULT_CONCURRENCY: usize = 4;
/// Upper bound on a single `release()` call.
pub const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(10);
/// Buffered events per subscriber before lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration for one supervised device.
#[derive(Clone)]
pub struct SupervisorConfig {
    /// Gate capacity. Zero is treated as one.
    pub concurrency: usize,
    /// How long a connection release may take before it is abandoned.
    pub release_timeout: Duration,
    /// Capacity of the device event channel.
    pub event_capacity: usize,
    /// Which failures retire the connection and retry.
    pub classifier: Arc<dyn FailureClassifier>,
}

impl SupervisorConfig {
    #[must_use]
    pub fn with_classifier(mut self, classifier: impl FailureClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            release_timeout: DEFAULT_RELEASE_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            classifier: Arc::new(TransportClassifier::default()),
        }
    }
}

impl fmt::Debug for SupervisorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorConfig")
            .field("concurrency", &self.concurrency)
            .field("release_timeout", &self.release_timeout)
            .field("event_capacity", &self.event_capacity)
            .finish_non_exhaustive()
    }
}
