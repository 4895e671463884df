use strata_materializer::{AbruptTerminationFailure, StageContext, StreamFailure};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// What travels between two stages.
///
/// A channel that closes without `Complete` or `Failure` means the upstream stage went away
/// abruptly.
#[derive(Debug)]
pub enum StreamSignal<T> {
    Element(T),
    Complete,
    Failure(StreamFailure),
}

/// Raised by [`Outlet::push`] once the downstream stage stopped listening. Stages usually just
/// `?` it: the runner treats it as a regular stop.
#[derive(Debug, Clone, thiserror::Error)]
#[error("downstream of stage `{0}` cancelled")]
pub struct DownstreamCancelled(pub String);

/// Receiving end of a stage's input channel.
#[derive(Debug)]
pub struct Inlet<T> {
    rx: mpsc::Receiver<StreamSignal<T>>,
    upstream: String,
    stage: String,
    debug_logging: bool,
    finished: bool,
}

impl<T> Inlet<T> {
    pub fn new(
        rx: mpsc::Receiver<StreamSignal<T>>,
        upstream: impl Into<String>,
        ctx: &StageContext,
    ) -> Self {
        Self {
            rx,
            upstream: upstream.into(),
            stage: ctx.name().to_owned(),
            debug_logging: ctx.settings().is_debug_logging(),
            finished: false,
        }
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// Next element; `Ok(None)` once upstream completed.
    pub async fn pull(&mut self) -> Result<Option<T>, StreamFailure> {
        let signal = self.rx.recv().await;
        self.on_signal(signal)
    }

    /// Like [`Inlet::pull`] but never waits; `Ok(None)` also means nothing is available yet.
    pub fn try_pull(&mut self) -> Result<Option<T>, StreamFailure> {
        match self.rx.try_recv() {
            Ok(signal) => self.on_signal(Some(signal)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => self.on_signal(None),
        }
    }

    /// Whether upstream completed or failed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Stops upstream. Elements already in flight are dropped.
    pub fn cancel(&mut self) {
        self.finished = true;
        self.rx.close();
    }

    fn on_signal(&mut self, signal: Option<StreamSignal<T>>) -> Result<Option<T>, StreamFailure> {
        if self.finished {
            return Ok(None);
        }
        match signal {
            Some(StreamSignal::Element(element)) => {
                if self.debug_logging {
                    tracing::debug!(stage = %self.stage, upstream = %self.upstream, "received element");
                }
                Ok(Some(element))
            }
            Some(StreamSignal::Complete) => {
                self.finished = true;
                Ok(None)
            }
            Some(StreamSignal::Failure(failure)) => {
                self.finished = true;
                Err(failure)
            }
            None => {
                self.finished = true;
                Err(AbruptTerminationFailure::new(self.upstream.clone()).into())
            }
        }
    }
}

/// Sending end of a stage's output channel.
///
/// Yields to the runtime after `output_burst_limit` consecutive emissions, and at random points
/// in fuzzing mode.
#[derive(Debug)]
pub struct Outlet<T> {
    tx: mpsc::Sender<StreamSignal<T>>,
    stage: String,
    burst_limit: usize,
    burst: usize,
    fuzzing: bool,
    debug_logging: bool,
}

impl<T> Outlet<T> {
    pub fn new(tx: mpsc::Sender<StreamSignal<T>>, ctx: &StageContext) -> Self {
        let settings = ctx.settings();
        Self {
            tx,
            stage: ctx.name().to_owned(),
            burst_limit: settings.output_burst_limit(),
            burst: 0,
            fuzzing: settings.is_fuzzing_mode(),
            debug_logging: settings.is_debug_logging(),
        }
    }

    pub async fn push(&mut self, element: T) -> Result<(), DownstreamCancelled> {
        if self.debug_logging {
            tracing::debug!(stage = %self.stage, "emitting element");
        }
        self.tx
            .send(StreamSignal::Element(element))
            .await
            .map_err(|_| DownstreamCancelled(self.stage.clone()))?;

        self.burst += 1;
        if self.burst >= self.burst_limit {
            self.burst = 0;
            tokio::task::yield_now().await;
        } else if self.fuzzing && rand::random::<bool>() {
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    pub async fn complete(self) {
        // a cancelled downstream does not care
        let _ = self.tx.send(StreamSignal::Complete).await;
    }

    pub async fn fail(self, failure: StreamFailure) {
        let _ = self.tx.send(StreamSignal::Failure(failure)).await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use strata_materializer::MaterializerSettings;

    fn ctx(name: &str) -> StageContext {
        StageContext::detached(name, MaterializerSettings::default())
    }

    #[tokio::test]
    async fn completion_ends_the_stream() {
        let (tx, rx) = mpsc::channel(4);
        let mut outlet = Outlet::new(tx, &ctx("up"));
        let mut inlet = Inlet::new(rx, "up", &ctx("down"));

        outlet.push(1u32).await.unwrap();
        outlet.complete().await;
        assert_eq!(inlet.pull().await.unwrap(), Some(1));
        assert_eq!(inlet.pull().await.unwrap(), None);
        assert!(inlet.is_finished());
        assert_eq!(inlet.pull().await.unwrap(), None);
    }

    #[tokio::test]
    async fn vanished_upstream_is_abrupt_termination() {
        let (tx, rx) = mpsc::channel(4);
        let mut outlet = Outlet::new(tx, &ctx("flow-1-0-source"));
        let mut inlet = Inlet::new(rx, "flow-1-0-source", &ctx("down"));
        outlet.push(1u32).await.unwrap();
        drop(outlet);

        assert_eq!(inlet.try_pull().unwrap(), Some(1));
        assert_matches!(
            inlet.pull().await,
            Err(StreamFailure::AbruptTermination(failure)) if failure.endpoint() == "flow-1-0-source"
        );
    }

    #[tokio::test]
    async fn cancelled_inlet_stops_upstream() {
        let (tx, rx) = mpsc::channel(4);
        let mut outlet = Outlet::new(tx, &ctx("up"));
        let mut inlet: Inlet<u32> = Inlet::new(rx, "up", &ctx("down"));
        assert_eq!(inlet.try_pull().unwrap(), None);

        inlet.cancel();
        assert!(outlet.is_cancelled());
        assert_matches!(outlet.push(1).await, Err(DownstreamCancelled(stage)) if stage == "up");
    }

    #[tokio::test]
    async fn burst_limit_yields_without_losing_elements() {
        let settings = MaterializerSettings::default()
            .with_output_burst_limit(2)
            .unwrap()
            .with_fuzzing_mode(true);
        let (tx, rx) = mpsc::channel(16);
        let mut outlet = Outlet::new(tx, &StageContext::detached("up", settings));
        let mut inlet = Inlet::new(rx, "up", &ctx("down"));
        for i in 0..5u32 {
            outlet.push(i).await.unwrap();
        }
        outlet.complete().await;

        let mut received = Vec::new();
        while let Some(element) = inlet.pull().await.unwrap() {
            received.push(element);
        }
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
    }
}
