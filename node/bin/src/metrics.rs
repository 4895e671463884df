use vise::{Counter, Gauge, LabeledFamily, Metrics};

#[derive(Debug, Metrics)]
#[metrics(prefix = "node_meta")]
pub struct NodeMetaMetrics {
    /// Gauge always set to `1` with `version` label set to the current semver version
    #[metrics(labels = ["version"])]
    pub version: LabeledFamily<&'static str, Gauge<u64>>,
}

#[vise::register]
pub(crate) static NODE_META_METRICS: vise::Global<NodeMetaMetrics> = vise::Global::new();

#[derive(Debug, Metrics)]
#[metrics(prefix = "demo")]
pub struct DemoMetrics {
    /// Producer/consumer pairs materialized.
    pub rounds: Counter,
    /// Batches received by consumer flows.
    pub batches: Counter,
    /// Consumer flows that did not complete normally.
    pub failed_rounds: Counter,
}

#[vise::register]
pub(crate) static DEMO_METRICS: vise::Global<DemoMetrics> = vise::Global::new();
