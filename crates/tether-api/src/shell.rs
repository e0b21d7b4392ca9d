// ── Shell execution ──
//
// One attempt at running a shell command on one connection. The output
// channel updates while the command runs; the completion future yields
// the final output or the failure.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use tokio::sync::watch;

use crate::error::Error;

/// A shell command started on a single connection.
pub struct ShellExecution {
    output: watch::Receiver<String>,
    completion: BoxFuture<'static, Result<String, Error>>,
}

impl ShellExecution {
    /// Pair a live output channel with the future that completes the command.
    pub fn new<F>(output: watch::Receiver<String>, completion: F) -> Self
    where
        F: Future<Output = Result<String, Error>> + Send + 'static,
    {
        Self {
            output,
            completion: Box::pin(completion),
        }
    }

    /// An execution that never produces output and fails with `error`.
    pub fn failed(error: Error) -> Self {
        let (_tx, output) = watch::channel(String::new());
        Self::new(output, async move { Err(error) })
    }

    /// Output produced so far.
    pub fn output(&self) -> String {
        self.output.borrow().clone()
    }

    /// Split into the output channel and the completion future.
    pub fn into_parts(
        self,
    ) -> (
        watch::Receiver<String>,
        BoxFuture<'static, Result<String, Error>>,
    ) {
        (self.output, self.completion)
    }
}

impl fmt::Debug for ShellExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellExecution")
            .field("output", &*self.output.borrow())
            .finish_non_exhaustive()
    }
}
