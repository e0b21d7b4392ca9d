// ── Failure classification ──
//
// Decides which transport errors retire the current connection. Anything
// a classifier accepts is retried on the next connection; everything else
// reaches the caller untouched.

use std::collections::HashSet;

use tether_api::Error as ApiError;

/// Predicate deciding whether an error means the link itself is broken.
pub trait FailureClassifier: Send + Sync {
    fn is_transport_failure(&self, error: &ApiError) -> bool;
}

impl<F> FailureClassifier for F
where
    F: Fn(&ApiError) -> bool + Send + Sync,
{
    fn is_transport_failure(&self, error: &ApiError) -> bool {
        self(error)
    }
}

/// The built-in transport-class set, optionally widened with extra
/// error kinds (matched against [`ApiError::kind`]).
#[derive(Debug, Clone, Default)]
pub struct TransportClassifier {
    extra_kinds: HashSet<String>,
}

impl TransportClassifier {
    /// Also treat errors of `kind` as transport failures.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.extra_kinds.insert(kind.into());
        self
    }

    #[must_use]
    pub fn with_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_kinds.extend(kinds.into_iter().map(Into::into));
        self
    }

    /// Extra kinds registered on top of the built-in set.
    pub fn extra_kinds(&self) -> impl Iterator<Item = &str> {
        self.extra_kinds.iter().map(String::as_str)
    }
}

impl FailureClassifier for TransportClassifier {
    fn is_transport_failure(&self, error: &ApiError) -> bool {
        error.is_transport_failure() || self.extra_kinds.contains(error.kind())
    }
}
