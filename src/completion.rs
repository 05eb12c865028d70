//! Asynchronous completion handles returned by exporters and senders.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::ExportError;

pub type ExportResult = Result<(), ExportError>;

/// Resolves once with the outcome of an export, flush or shutdown.
///
/// Dropping the handle does not cancel the underlying work.
#[derive(Debug)]
pub struct CompletionHandle {
    state: State,
}

#[derive(Debug)]
enum State {
    Ready(Option<ExportResult>),
    Pending(oneshot::Receiver<ExportResult>),
}

impl CompletionHandle {
    pub fn success() -> Self {
        Self {
            state: State::Ready(Some(Ok(()))),
        }
    }

    pub fn failure(err: ExportError) -> Self {
        Self {
            state: State::Ready(Some(Err(err))),
        }
    }

    /// A handle and the [`Completer`] that resolves it.
    pub fn pending() -> (Completer, Self) {
        let (tx, rx) = oneshot::channel();
        let completer = Completer {
            tx: Arc::new(Mutex::new(Some(tx))),
        };
        (
            completer,
            Self {
                state: State::Pending(rx),
            },
        )
    }

    /// Wait at most `timeout` for the outcome.
    pub async fn wait_timeout(self, timeout: Duration) -> ExportResult {
        match tokio::time::timeout(timeout, self).await {
            Ok(result) => result,
            Err(_) => Err(ExportError::Timeout(timeout)),
        }
    }
}

impl Future for CompletionHandle {
    type Output = ExportResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<ExportResult> {
        match &mut self.state {
            State::Ready(result) => Poll::Ready(result.take().unwrap_or(Ok(()))),
            State::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(ExportError::Abandoned))),
        }
    }
}

/// Resolves a [`CompletionHandle`]. Clones share the same slot: the first
/// completion wins and later ones are ignored.
#[derive(Debug, Clone)]
pub struct Completer {
    tx: Arc<Mutex<Option<oneshot::Sender<ExportResult>>>>,
}

impl Completer {
    /// Returns `false` when the handle had already been resolved.
    pub fn complete(&self, result: ExportResult) -> bool {
        match self.tx.lock().take() {
            Some(tx) => {
                // receiver may be gone; the outcome is still consumed
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    pub fn succeed(&self) -> bool {
        self.complete(Ok(()))
    }

    pub fn fail(&self, err: ExportError) -> bool {
        self.complete(Err(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    #[tokio::test]
    async fn ready_handles_resolve_immediately() {
        assert!(CompletionHandle::success().await.is_ok());
        assert!(matches!(
            CompletionHandle::failure(ExportError::Shutdown).await,
            Err(ExportError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn first_completion_wins() {
        let (completer, handle) = CompletionHandle::pending();
        let other = completer.clone();

        assert!(completer.fail(ExportError::Transport(TransportError::Cancelled)));
        assert!(!other.succeed());

        assert!(matches!(
            handle.await,
            Err(ExportError::Transport(TransportError::Cancelled))
        ));
    }

    #[tokio::test]
    async fn dropped_completer_reports_abandoned() {
        let (completer, handle) = CompletionHandle::pending();
        drop(completer);

        assert!(matches!(handle.await, Err(ExportError::Abandoned)));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_timeout_expires() {
        let (_completer, handle) = CompletionHandle::pending();

        let result = handle.wait_timeout(Duration::from_millis(50)).await;

        assert!(matches!(result, Err(ExportError::Timeout(_))));
    }
}
