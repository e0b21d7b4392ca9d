// ── Command result forwarding ──
//
// A shell command may run several times (once per connection attempt).
// `CommandResult` is the single handle the caller keeps: one output
// stream that follows whichever attempt is current, and one outcome.

use std::fmt;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use arc_swap::ArcSwapOption;
use futures::future::BoxFuture;
use tether_api::{Error as ApiError, ShellExecution};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::trace;

use crate::error::CoreError;

/// Output shown once a command was cancelled.
pub const CANCELLED_OUTPUT: &str = "(Cancelled)";

/// Stable view of a shell command across retries.
///
/// Cheaply cloneable; all clones observe the same command.
#[derive(Clone)]
pub struct CommandResult {
    inner: Arc<ForwardingInner>,
}

struct ForwardingInner {
    command_text: String,
    output: watch::Sender<String>,
    outcome: watch::Sender<Option<Result<String, CoreError>>>,
    attempts: AtomicU32,
    sealed: AtomicBool,
    relay: ArcSwapOption<AbortHandle>,
}

impl CommandResult {
    pub(crate) fn new(command_text: impl Into<String>) -> Self {
        let (output, _) = watch::channel(String::new());
        let (outcome, _) = watch::channel(None);
        Self {
            inner: Arc::new(ForwardingInner {
                command_text: command_text.into(),
                output,
                outcome,
                attempts: AtomicU32::new(0),
                sealed: AtomicBool::new(false),
                relay: ArcSwapOption::empty(),
            }),
        }
    }

    pub fn command_text(&self) -> &str {
        &self.inner.command_text
    }

    /// Output of the current attempt, the final output, or
    /// [`CANCELLED_OUTPUT`].
    pub fn output(&self) -> String {
        self.inner.output.borrow().clone()
    }

    /// One continuous output stream across every attempt.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.inner.output.subscribe()
    }

    /// Number of connection attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.inner.outcome.borrow().is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(*self.inner.outcome.borrow(), Some(Err(CoreError::Cancelled)))
    }

    /// Wait for the command to finish on some connection.
    pub async fn wait(&self) -> Result<String, CoreError> {
        let mut rx = self.inner.outcome.subscribe();
        let done = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| CoreError::Internal("command outcome channel closed".into()))?;
        let outcome = (*done).clone();
        drop(done);
        outcome.unwrap_or_else(|| {
            Err(CoreError::Internal(
                "command finished without outcome".into(),
            ))
        })
    }

    /// Make `execution` the current attempt and relay its output.
    /// Returns the attempt's completion.
    pub(crate) fn attach(
        &self,
        execution: ShellExecution,
    ) -> BoxFuture<'static, Result<String, ApiError>> {
        let inner = &self.inner;
        if let Some(previous) = inner.relay.swap(None) {
            previous.abort();
        }

        let attempt = inner.attempts.fetch_add(1, Ordering::AcqRel) + 1;
        let (mut source, completion) = execution.into_parts();
        let seed = source.borrow_and_update().clone();
        inner.output.send_if_modified(|current| {
            if inner.sealed.load(Ordering::Acquire) {
                return false;
            }
            *current = seed;
            true
        });

        let forwarder = Arc::downgrade(inner);
        let relay = tokio::spawn(async move {
            while source.changed().await.is_ok() {
                let text = source.borrow_and_update().clone();
                if !relay_output(&forwarder, attempt, text) {
                    break;
                }
            }
        });
        inner.relay.store(Some(Arc::new(relay.abort_handle())));

        trace!(command = %inner.command_text, attempt, "attached shell execution");
        completion
    }

    /// Record the final outcome and stop relaying.
    pub(crate) fn finish(&self, outcome: Result<String, CoreError>) {
        let inner = &self.inner;
        let text = match &outcome {
            Ok(output) => Some(output.clone()),
            Err(CoreError::Cancelled) => Some(CANCELLED_OUTPUT.to_owned()),
            Err(_) => None,
        };
        inner.output.send_if_modified(|current| {
            inner.sealed.store(true, Ordering::Release);
            match text {
                Some(text) if *current != text => {
                    *current = text;
                    true
                }
                _ => false,
            }
        });
        if let Some(relay) = inner.relay.swap(None) {
            relay.abort();
        }
        inner.outcome.send_replace(Some(outcome));
    }
}

/// Forward one output update from `attempt`. Returns `false` once the
/// relay should stop.
fn relay_output(forwarder: &Weak<ForwardingInner>, attempt: u32, text: String) -> bool {
    let Some(inner) = forwarder.upgrade() else {
        return false;
    };
    let mut current_attempt = true;
    inner.output.send_if_modified(|current| {
        if inner.sealed.load(Ordering::Acquire)
            || inner.attempts.load(Ordering::Acquire) != attempt
        {
            current_attempt = false;
            return false;
        }
        if *current == text {
            return false;
        }
        *current = text;
        true
    });
    current_attempt
}

impl fmt::Debug for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandResult")
            .field("command_text", &self.inner.command_text)
            .field("attempts", &self.attempts())
            .field("complete", &self.is_complete())
            .finish_non_exhaustive()
    }
}
