use crate::attributes::Attributes;
use crate::metrics::METRICS;
use crate::orphan::OrphanEndpoint;
use crate::settings::MaterializerSettings;
use crate::subscription_timeout::SubscriptionTimeoutSettings;
use crate::supervision::Directive;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Unconnected external ports of a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Shape {
    inlets: Vec<String>,
    outlets: Vec<String>,
}

impl Shape {
    pub fn closed() -> Self {
        Self::default()
    }

    pub fn with_inlet(mut self, name: impl Into<String>) -> Self {
        self.inlets.push(name.into());
        self
    }

    pub fn with_outlet(mut self, name: impl Into<String>) -> Self {
        self.outlets.push(name.into());
        self
    }

    pub fn inlets(&self) -> &[String] {
        &self.inlets
    }

    pub fn outlets(&self) -> &[String] {
        &self.outlets
    }

    pub fn is_closed(&self) -> bool {
        self.inlets.is_empty() && self.outlets.is_empty()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_closed() {
            return f.write_str("closed");
        }
        write!(
            f,
            "inlets [{}], outlets [{}]",
            self.inlets.join(", "),
            self.outlets.join(", ")
        )
    }
}

/// Description of a stream graph that a materializer can bring to life.
///
/// `wire` declares the graph's stages on the [`WiringContext`] and returns the materialized
/// value. It must not start anything itself: the materializer spawns the declared units only after
/// wiring succeeded, so a failing `wire` leaves nothing behind.
pub trait GraphDescription: Send {
    type Mat;

    fn shape(&self) -> Shape;

    fn attributes(&self) -> &Attributes;

    fn wire(self, ctx: &mut WiringContext<'_>) -> anyhow::Result<Self::Mat>;
}

/// Body of a single stage. Returning an error fails the stage; the error has already been through
/// the stage's supervision decider by then.
pub type StageBody = BoxFuture<'static, anyhow::Result<()>>;

/// Stage that was declared during wiring and waits to be spawned.
pub struct UnitDescription {
    pub(crate) name: String,
    pub(crate) dispatcher: String,
    pub(crate) async_boundary: bool,
    pub(crate) body: StageBody,
}

impl UnitDescription {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dispatcher(&self) -> &str {
        &self.dispatcher
    }

    pub fn is_async_boundary(&self) -> bool {
        self.async_boundary
    }
}

impl fmt::Debug for UnitDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitDescription")
            .field("name", &self.name)
            .field("dispatcher", &self.dispatcher)
            .field("async_boundary", &self.async_boundary)
            .finish_non_exhaustive()
    }
}

pub(crate) type DeferredOrphan = (Arc<dyn OrphanEndpoint>, SubscriptionTimeoutSettings);

/// Collects the stages and orphaned endpoints of one materialization.
pub struct WiringContext<'a> {
    flow_name: String,
    base: &'a MaterializerSettings,
    graph_attributes: Attributes,
    units: Vec<UnitDescription>,
    orphans: Vec<DeferredOrphan>,
}

impl<'a> WiringContext<'a> {
    pub(crate) fn new(
        flow_name: String,
        base: &'a MaterializerSettings,
        graph_attributes: Attributes,
    ) -> Self {
        Self {
            flow_name,
            base,
            graph_attributes,
            units: Vec::new(),
            orphans: Vec::new(),
        }
    }

    pub fn flow_name(&self) -> &str {
        &self.flow_name
    }

    /// Settings a stage with `stage_attributes` runs with. Stage attributes are more specific
    /// than the graph's own.
    pub fn effective_settings(&self, stage_attributes: &Attributes) -> MaterializerSettings {
        self.base
            .resolve(&self.graph_attributes.and(stage_attributes))
    }

    /// Declares a stage. `body` receives the stage's context (unique name plus effective
    /// settings) and returns the future to run once the graph is spawned.
    pub fn add_unit<F>(&mut self, stage_name: &str, stage_attributes: &Attributes, body: F) -> &str
    where
        F: FnOnce(StageContext) -> StageBody,
    {
        let attributes = self.graph_attributes.and(stage_attributes);
        let settings = self.base.resolve(&attributes);
        let stage_name = stage_attributes.get_name().unwrap_or(stage_name);
        let name = format!("{}-{}-{stage_name}", self.flow_name, self.units.len());
        let dispatcher = settings.dispatcher().to_owned();
        let context = StageContext {
            name: name.clone(),
            settings,
        };
        self.units.push(UnitDescription {
            name,
            dispatcher,
            async_boundary: stage_attributes.is_async_boundary(),
            body: body(context),
        });
        &self.units[self.units.len() - 1].name
    }

    /// Hands `endpoint` to the subscription timeout supervisor once the graph is running.
    pub fn register_orphan(
        &mut self,
        endpoint: Arc<dyn OrphanEndpoint>,
        settings: SubscriptionTimeoutSettings,
    ) {
        self.orphans.push((endpoint, settings));
    }

    pub fn units(&self) -> &[UnitDescription] {
        &self.units
    }

    pub(crate) fn into_parts(self) -> (Vec<UnitDescription>, Vec<DeferredOrphan>) {
        (self.units, self.orphans)
    }
}

/// What a running stage knows about itself.
#[derive(Debug, Clone)]
pub struct StageContext {
    name: String,
    settings: MaterializerSettings,
}

impl StageContext {
    /// Context for a stage run outside of a materializer, e.g. in tests.
    pub fn detached(name: impl Into<String>, settings: MaterializerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &MaterializerSettings {
        &self.settings
    }

    /// Consults the stage's supervision decider about `error`.
    pub fn decide(&self, error: &anyhow::Error) -> Directive {
        let decider = self.settings.supervision_decider();
        let directive = decider.decide(error);
        METRICS.supervision_directives[&directive].inc();
        tracing::warn!(
            stage = %self.name,
            decider = decider.name(),
            ?directive,
            "stage failed to process element: {error:#}"
        );
        directive
    }
}
