use crate::error::AbruptTerminationFailure;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Why a stream did not complete normally.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamFailure {
    #[error(transparent)]
    AbruptTermination(#[from] AbruptTerminationFailure),
    #[error("stage `{stage}` failed: {error:#}")]
    Stage {
        stage: String,
        error: Arc<anyhow::Error>,
    },
    #[error("stream was cancelled by `{0}`")]
    Cancelled(String),
}

impl StreamFailure {
    pub fn stage(stage: impl Into<String>, error: anyhow::Error) -> Self {
        Self::Stage {
            stage: stage.into(),
            error: Arc::new(error),
        }
    }
}

/// Creates the two halves of a completion signal for `endpoint`.
///
/// If the sender is dropped without being used, the receiving side resolves with
/// [`AbruptTerminationFailure`] instead of hanging.
pub fn completion_signal<T>(endpoint: impl Into<String>) -> (CompletionSender<T>, StreamCompletion<T>) {
    let endpoint = endpoint.into();
    let (tx, rx) = oneshot::channel();
    (
        CompletionSender {
            endpoint: endpoint.clone(),
            tx,
        },
        StreamCompletion { endpoint, rx },
    )
}

#[derive(Debug)]
pub struct CompletionSender<T> {
    endpoint: String,
    tx: oneshot::Sender<Result<T, StreamFailure>>,
}

impl<T> CompletionSender<T> {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn complete(self, value: T) {
        // nobody waiting is fine
        let _ = self.tx.send(Ok(value));
    }

    pub fn fail(self, failure: StreamFailure) {
        let _ = self.tx.send(Err(failure));
    }
}

/// Resolves once the endpoint completes, fails, or disappears.
#[derive(Debug)]
pub struct StreamCompletion<T> {
    endpoint: String,
    rx: oneshot::Receiver<Result<T, StreamFailure>>,
}

impl<T> StreamCompletion<T> {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl<T> Future for StreamCompletion<T> {
    type Output = Result<T, StreamFailure>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(StreamFailure::AbruptTermination(
                AbruptTerminationFailure::new(self.endpoint.clone()),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn completes_with_value() {
        let (sender, completion) = completion_signal::<u32>("flow-1-0-sink");
        assert_eq!(sender.endpoint(), "flow-1-0-sink");
        sender.complete(7);
        assert_eq!(completion.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn propagates_stage_failure() {
        let (sender, completion) = completion_signal::<()>("sink");
        sender.fail(StreamFailure::stage("map", anyhow::anyhow!("bad element")));
        let err = completion.await.unwrap_err();
        assert_eq!(err.to_string(), "stage `map` failed: bad element");
    }

    #[tokio::test]
    async fn dropped_sender_is_abrupt_termination() {
        let (sender, completion) = completion_signal::<()>("flow-3-1-collect");
        drop(sender);
        assert_matches!(
            completion.await,
            Err(StreamFailure::AbruptTermination(failure)) if failure.endpoint() == "flow-3-1-collect"
        );
    }
}
