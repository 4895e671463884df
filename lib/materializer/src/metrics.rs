use crate::subscription_timeout::SubscriptionTimeoutMode;
use crate::supervision::Directive;
use vise::{Counter, EncodeLabelValue, LabeledFamily, Metrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
#[metrics(rename_all = "snake_case")]
pub(crate) enum MaterializationOutcome {
    Success,
    OpenGraph,
    WiringFailed,
    UnknownDispatcher,
    ShutDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
#[metrics(rename_all = "snake_case")]
pub(crate) enum UnitOutcome {
    Completed,
    Failed,
    Cancelled,
    Panicked,
}

#[derive(Debug, Metrics)]
#[metrics(prefix = "strata_materializer")]
pub(crate) struct MaterializerMetrics {
    /// Materialization attempts by outcome.
    #[metrics(labels = ["outcome"])]
    pub materializations: LabeledFamily<MaterializationOutcome, Counter>,

    /// Execution units handed to the execution host.
    pub units_spawned: Counter,

    /// Stages that share an execution unit with at least one other stage.
    pub fused_stages: Counter,

    /// How supervised stages ended; `cancelled` counts whole execution units.
    #[metrics(labels = ["outcome"])]
    pub unit_outcomes: LabeledFamily<UnitOutcome, Counter>,

    /// Supervision decisions taken by stages.
    #[metrics(labels = ["directive"])]
    pub supervision_directives: LabeledFamily<Directive, Counter>,

    /// Orphaned endpoints registered for subscription timeout tracking.
    pub orphans_registered: Counter,

    /// Orphaned endpoints whose subscription timeout elapsed, by the mode that was applied.
    #[metrics(labels = ["mode"])]
    pub orphans_timed_out: LabeledFamily<SubscriptionTimeoutMode, Counter>,

    /// Callbacks scheduled on the timer service.
    pub scheduled_callbacks: Counter,

    /// Materializer shutdowns.
    pub shutdowns: Counter,
}

#[vise::register]
pub(crate) static METRICS: vise::Global<MaterializerMetrics> = vise::Global::new();
