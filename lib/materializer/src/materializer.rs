use crate::attributes::Attributes;
use crate::error::{IllegalStateError, MaterializationFailure};
use crate::graph::{GraphDescription, WiringContext};
use crate::host::{ExecutionHost, HostError, TokioExecutionHost};
use crate::metrics::{METRICS, MaterializationOutcome};
use crate::names::NameAllocator;
use crate::orphan::SubscriptionTimeoutSupervisor;
use crate::settings::MaterializerSettings;
use crate::supervisor::{SpawnError, StreamSupervisor, fuse};
use crate::timer::{Cancellable, TimerService};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Turns graph descriptions into running execution units.
///
/// A materializer is `Active` until [`Materializer::shutdown`] is called and shut down for good
/// afterwards; every operation may be called concurrently.
pub trait Materializer: Send + Sync {
    fn settings(&self) -> &MaterializerSettings;

    fn is_shutdown(&self) -> bool;

    /// Wires `graph` and starts its stages. Either every stage is started or none is.
    fn materialize<G>(&self, graph: G) -> Result<G::Mat, MaterializationFailure>
    where
        G: GraphDescription,
        Self: Sized;

    /// Base settings with `attributes` applied on top.
    fn effective_settings(&self, attributes: &Attributes) -> MaterializerSettings;

    fn schedule_once<F>(&self, delay: Duration, action: F) -> Result<Cancellable, IllegalStateError>
    where
        F: FnOnce() + Send + 'static,
        Self: Sized;

    fn schedule_repeatedly<F>(
        &self,
        initial_delay: Duration,
        interval: Duration,
        action: F,
    ) -> Result<Cancellable, IllegalStateError>
    where
        F: FnMut() + Send + 'static,
        Self: Sized;

    /// View of the same materializer that names new flows after `prefix`.
    fn with_name_prefix(&self, prefix: &str) -> Self
    where
        Self: Sized;

    /// Tears down everything this materializer started. Idempotent.
    fn shutdown(&self);
}

struct Shared {
    settings: MaterializerSettings,
    shutdown: AtomicBool,
    supervisor: StreamSupervisor,
    names: NameAllocator,
    timer: TimerService,
    owns_timer: bool,
    subscription_timeouts: SubscriptionTimeoutSupervisor,
}

/// [`Materializer`] running every execution unit as a tokio task.
#[derive(Clone)]
pub struct TokioMaterializer {
    shared: Arc<Shared>,
    name_prefix: String,
}

impl TokioMaterializer {
    pub const DEFAULT_NAME_PREFIX: &'static str = "flow";

    pub fn builder() -> TokioMaterializerBuilder {
        TokioMaterializerBuilder::default()
    }

    /// Materializer on the current tokio runtime.
    pub fn new(settings: MaterializerSettings) -> Result<Self, HostError> {
        Self::builder().settings(settings).build()
    }

    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    pub fn supervisor(&self) -> &StreamSupervisor {
        &self.shared.supervisor
    }

    pub fn subscription_timeouts(&self) -> &SubscriptionTimeoutSupervisor {
        &self.shared.subscription_timeouts
    }

    /// Resolves once the materializer was shut down and every unit it started has stopped.
    pub async fn terminated(&self) {
        self.shared.supervisor.terminated().await
    }

    fn record(outcome: MaterializationOutcome) {
        METRICS.materializations[&outcome].inc();
    }
}

impl Materializer for TokioMaterializer {
    fn settings(&self) -> &MaterializerSettings {
        &self.shared.settings
    }

    fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    fn materialize<G>(&self, graph: G) -> Result<G::Mat, MaterializationFailure>
    where
        G: GraphDescription,
    {
        if self.is_shutdown() {
            Self::record(MaterializationOutcome::ShutDown);
            return Err(MaterializationFailure::shut_down());
        }
        let shape = graph.shape();
        if !shape.is_closed() {
            Self::record(MaterializationOutcome::OpenGraph);
            return Err(MaterializationFailure::new(format!(
                "cannot materialize a graph with dangling ports: {shape}"
            )));
        }

        let flow = self.shared.names.next_name(&self.name_prefix);
        let mut ctx = WiringContext::new(
            flow.clone(),
            &self.shared.settings,
            graph.attributes().clone(),
        );
        let mat = graph.wire(&mut ctx).map_err(|err| {
            Self::record(MaterializationOutcome::WiringFailed);
            MaterializationFailure::with_cause(format!("failed to wire `{flow}`"), err)
        })?;
        let (units, orphans) = ctx.into_parts();

        let host = self.shared.supervisor.host();
        if let Some(unit) = units.iter().find(|unit| !host.has_dispatcher(unit.dispatcher())) {
            Self::record(MaterializationOutcome::UnknownDispatcher);
            return Err(MaterializationFailure::with_cause(
                format!("stage `{}` cannot be placed", unit.name()),
                HostError::UnknownDispatcher(unit.dispatcher().to_owned()),
            ));
        }

        let stages = units.len();
        let units = fuse(units, self.shared.settings.is_auto_fusing());
        let execution_units = units.len();
        let subscription_timeouts = &self.shared.subscription_timeouts;
        // registering under the spawn lock keeps a racing shutdown from missing the orphans
        self.shared
            .supervisor
            .spawn_all(units, || {
                for (endpoint, settings) in orphans {
                    subscription_timeouts.register(endpoint, settings);
                }
            })
            .map_err(|err| match err {
                SpawnError::Terminated(_) => {
                    Self::record(MaterializationOutcome::ShutDown);
                    MaterializationFailure::shut_down()
                }
                SpawnError::Host(err) => {
                    Self::record(MaterializationOutcome::UnknownDispatcher);
                    MaterializationFailure::with_cause(format!("failed to start `{flow}`"), err)
                }
            })?;

        Self::record(MaterializationOutcome::Success);
        tracing::debug!(flow = %flow, stages, execution_units, "materialized graph");
        Ok(mat)
    }

    fn effective_settings(&self, attributes: &Attributes) -> MaterializerSettings {
        self.shared.settings.resolve(attributes)
    }

    fn schedule_once<F>(&self, delay: Duration, action: F) -> Result<Cancellable, IllegalStateError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shutdown() {
            return Err(IllegalStateError::ShutDown);
        }
        Ok(self.shared.timer.schedule_once(delay, action))
    }

    fn schedule_repeatedly<F>(
        &self,
        initial_delay: Duration,
        interval: Duration,
        action: F,
    ) -> Result<Cancellable, IllegalStateError>
    where
        F: FnMut() + Send + 'static,
    {
        if self.is_shutdown() {
            return Err(IllegalStateError::ShutDown);
        }
        Ok(self
            .shared
            .timer
            .schedule_repeatedly(initial_delay, interval, action))
    }

    fn with_name_prefix(&self, prefix: &str) -> Self {
        Self {
            shared: self.shared.clone(),
            name_prefix: prefix.to_owned(),
        }
    }

    fn shutdown(&self) {
        if self
            .shared
            .shutdown
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.shared.supervisor.terminate();
        self.shared.subscription_timeouts.stop();
        if self.shared.owns_timer {
            self.shared.timer.shutdown();
        }
        METRICS.shutdowns.inc();
        tracing::info!(supervisor = self.shared.supervisor.name(), "materializer shut down");
    }
}

impl fmt::Debug for TokioMaterializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioMaterializer")
            .field("name_prefix", &self.name_prefix)
            .field("settings", &self.shared.settings)
            .field("is_shutdown", &self.is_shutdown())
            .field("supervisor", &self.shared.supervisor)
            .finish()
    }
}

#[derive(Debug)]
pub struct TokioMaterializerBuilder {
    settings: MaterializerSettings,
    host: Option<Arc<dyn ExecutionHost>>,
    timer: Option<TimerService>,
    name_prefix: String,
}

impl Default for TokioMaterializerBuilder {
    fn default() -> Self {
        Self {
            settings: MaterializerSettings::default(),
            host: None,
            timer: None,
            name_prefix: TokioMaterializer::DEFAULT_NAME_PREFIX.to_owned(),
        }
    }
}

impl TokioMaterializerBuilder {
    pub fn settings(mut self, settings: MaterializerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn host(mut self, host: Arc<dyn ExecutionHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Shares an existing timer service instead of creating one.
    pub fn timer(mut self, timer: TimerService) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Fails outside of a tokio runtime unless both a host and a timer were provided, or if the
    /// host does not know the base dispatcher.
    pub fn build(self) -> Result<TokioMaterializer, HostError> {
        let host = match self.host {
            Some(host) => host,
            None => Arc::new(TokioExecutionHost::current()?),
        };
        if !host.has_dispatcher(self.settings.dispatcher()) {
            return Err(HostError::UnknownDispatcher(
                self.settings.dispatcher().to_owned(),
            ));
        }
        let (timer, owns_timer) = match self.timer {
            Some(timer) => (timer, false),
            None => (TimerService::current()?, true),
        };
        let subscription_timeouts = SubscriptionTimeoutSupervisor::start(
            &timer,
            self.settings.subscription_timeout_settings().sweep_interval(),
        );
        let supervisor = StreamSupervisor::new(format!("{}-supervisor", self.name_prefix), host);
        tracing::debug!(
            supervisor = supervisor.name(),
            settings = ?self.settings,
            "created materializer"
        );

        Ok(TokioMaterializer {
            shared: Arc::new(Shared {
                settings: self.settings,
                shutdown: AtomicBool::new(false),
                supervisor,
                names: NameAllocator::new(),
                timer,
                owns_timer,
                subscription_timeouts,
            }),
            name_prefix: self.name_prefix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Shape;
    use crate::supervision::SupervisionDecider;
    use crate::host::UnitBody;
    use crate::orphan::EndpointState;
    use crate::subscription_timeout::SubscriptionTimeoutSettings;
    use crate::substream::SubstreamSource;
    use assert_matches::assert_matches;
    use futures::FutureExt;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use tokio::sync::mpsc;

    /// Graph of independent stages that never finish on their own.
    struct StageSet {
        shape: Shape,
        attributes: Attributes,
        stages: Vec<Attributes>,
        fail_wiring: bool,
    }

    impl StageSet {
        fn closed(stages: usize) -> Self {
            Self {
                shape: Shape::closed(),
                attributes: Attributes::none(),
                stages: vec![Attributes::none(); stages],
                fail_wiring: false,
            }
        }
    }

    impl GraphDescription for StageSet {
        type Mat = Vec<String>;

        fn shape(&self) -> Shape {
            self.shape.clone()
        }

        fn attributes(&self) -> &Attributes {
            &self.attributes
        }

        fn wire(self, ctx: &mut WiringContext<'_>) -> anyhow::Result<Self::Mat> {
            let mut names = Vec::new();
            for attributes in &self.stages {
                let name = ctx.add_unit("stage", attributes, |_| {
                    futures::future::pending::<anyhow::Result<()>>().boxed()
                });
                names.push(name.to_owned());
            }
            if self.fail_wiring {
                anyhow::bail!("stage ports do not line up");
            }
            Ok(names)
        }
    }

    #[tokio::test]
    async fn materializes_closed_graph() {
        let materializer = TokioMaterializer::new(MaterializerSettings::default()).unwrap();
        let names = materializer.materialize(StageSet::closed(2)).unwrap();
        assert_eq!(names, vec!["flow-1-0-stage", "flow-1-1-stage"]);
        // fused into a single unit
        assert_eq!(materializer.supervisor().active_units(), 1);

        let names = materializer
            .with_name_prefix("ingest")
            .materialize(StageSet::closed(1))
            .unwrap();
        assert_eq!(names, vec!["ingest-1-0-stage"]);
        assert_eq!(materializer.supervisor().active_units(), 2);
    }

    #[tokio::test]
    async fn rejected_graphs_start_nothing() {
        let materializer = TokioMaterializer::new(MaterializerSettings::default()).unwrap();

        let mut open = StageSet::closed(1);
        open.shape = Shape::closed().with_outlet("out");
        let err = materializer.materialize(open).unwrap_err();
        assert!(err.message().contains("dangling ports"));

        let mut broken = StageSet::closed(3);
        broken.fail_wiring = true;
        let err = materializer.materialize(broken).unwrap_err();
        assert_eq!(err.message(), "failed to wire `flow-1`");

        let mut misplaced = StageSet::closed(2);
        misplaced.stages[1] = Attributes::dispatcher("gpu");
        let err = materializer.materialize(misplaced).unwrap_err();
        assert_eq!(err.message(), "stage `flow-2-1-stage` cannot be placed");

        assert_eq!(materializer.supervisor().active_units(), 0);
    }

    #[tokio::test]
    async fn shutdown_is_final() {
        let materializer = TokioMaterializer::new(MaterializerSettings::default()).unwrap();
        materializer.materialize(StageSet::closed(3)).unwrap();

        materializer.shutdown();
        assert!(materializer.is_shutdown());
        materializer.terminated().await;
        assert_eq!(materializer.supervisor().active_units(), 0);

        materializer.shutdown();
        assert!(materializer.is_shutdown());
        assert_eq!(materializer.supervisor().teardown_count(), 1);

        let err = materializer.materialize(StageSet::closed(1)).unwrap_err();
        assert!(err.is_shut_down());
        assert_matches!(
            materializer.schedule_once(Duration::from_millis(1), || {}),
            Err(IllegalStateError::ShutDown)
        );
        assert_matches!(
            materializer
                .with_name_prefix("other")
                .schedule_repeatedly(Duration::ZERO, Duration::from_millis(1), || {}),
            Err(IllegalStateError::ShutDown)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn schedules_on_shared_timer() {
        let materializer = TokioMaterializer::new(MaterializerSettings::default()).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        materializer
            .schedule_once(Duration::from_millis(10), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn effective_settings_leave_base_untouched() {
        let materializer = TokioMaterializer::new(MaterializerSettings::default()).unwrap();
        let attributes = Attributes::input_buffer(1, 2)
            .unwrap()
            .and(&Attributes::supervision_strategy(SupervisionDecider::resuming()));

        let first = materializer.effective_settings(&attributes);
        let second = materializer.effective_settings(&attributes);
        assert_eq!(first, second);
        assert_eq!(first.max_input_buffer_size(), 2);
        assert_eq!(materializer.settings(), &MaterializerSettings::default());
    }

    /// Closed graph with one idle stage whose output stays an unattached substream.
    struct Orphaned {
        attributes: Attributes,
    }

    impl GraphDescription for Orphaned {
        type Mat = SubstreamSource<u32>;

        fn shape(&self) -> Shape {
            Shape::closed()
        }

        fn attributes(&self) -> &Attributes {
            &self.attributes
        }

        fn wire(self, ctx: &mut WiringContext<'_>) -> anyhow::Result<Self::Mat> {
            let (tx, rx) = mpsc::channel(1);
            let name = ctx
                .add_unit("source", &Attributes::none(), move |_| {
                    async move {
                        let _tx = tx;
                        futures::future::pending::<anyhow::Result<()>>().await
                    }
                    .boxed()
                })
                .to_owned();
            let substream = SubstreamSource::new(name, rx);
            ctx.register_orphan(substream.as_orphan(), SubscriptionTimeoutSettings::default());
            Ok(substream)
        }
    }

    /// Shuts the materializer down from another thread while its first unit is being spawned.
    #[derive(Debug)]
    struct ShutdownOnSpawn {
        inner: TokioExecutionHost,
        target: Mutex<Option<TokioMaterializer>>,
        shutdown: Mutex<Option<thread::JoinHandle<()>>>,
    }

    impl ExecutionHost for ShutdownOnSpawn {
        fn has_dispatcher(&self, dispatcher: &str) -> bool {
            self.inner.has_dispatcher(dispatcher)
        }

        fn spawn_unit(&self, name: &str, dispatcher: &str, body: UnitBody) -> Result<(), HostError> {
            self.inner.spawn_unit(name, dispatcher, body)?;
            if let Some(materializer) = self.target.lock().take() {
                *self.shutdown.lock() = Some(thread::spawn(move || materializer.shutdown()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn shutdown_racing_materialize_releases_its_orphans() {
        let host = Arc::new(ShutdownOnSpawn {
            inner: TokioExecutionHost::current().unwrap(),
            target: Mutex::new(None),
            shutdown: Mutex::new(None),
        });
        let materializer = TokioMaterializer::builder()
            .host(host.clone())
            .build()
            .unwrap();
        *host.target.lock() = Some(materializer.clone());

        let substream = materializer
            .materialize(Orphaned {
                attributes: Attributes::none(),
            })
            .unwrap();
        let shutdown = host.shutdown.lock().take().unwrap();
        shutdown.join().unwrap();

        assert!(materializer.is_shutdown());
        // teardown ran after the registration, so nothing is left for a sweep that no longer runs
        assert_eq!(materializer.subscription_timeouts().pending_count(), 0);
        assert_eq!(substream.state(), EndpointState::Pending);
        materializer.terminated().await;
    }

    #[tokio::test]
    async fn build_rejects_unknown_base_dispatcher() {
        let settings = MaterializerSettings::default().with_dispatcher("gpu");
        assert_matches!(
            TokioMaterializer::new(settings),
            Err(HostError::UnknownDispatcher(name)) if name == "gpu"
        );
    }
}
