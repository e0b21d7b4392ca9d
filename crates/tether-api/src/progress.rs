use std::fmt;
use std::sync::Arc;

/// Cloneable sink for transfer progress, reported as a fraction in `[0, 1]`.
#[derive(Clone)]
pub struct Progress {
    report: Arc<dyn Fn(f64) + Send + Sync>,
}

impl Progress {
    pub fn new(report: impl Fn(f64) + Send + Sync + 'static) -> Self {
        Self {
            report: Arc::new(report),
        }
    }

    /// Report progress. Values outside `[0, 1]` (and NaN) are clamped.
    pub fn report(&self, fraction: f64) {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        (self.report)(fraction);
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress").finish_non_exhaustive()
    }
}
