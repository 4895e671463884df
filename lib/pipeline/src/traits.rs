use crate::signal::{Inlet, Outlet};
use anyhow::Result;
use async_trait::async_trait;
use strata_materializer::{Attributes, StageContext};

/// A stage that generates elements and starts the pipeline.
#[async_trait]
pub trait Source: Send + 'static {
    /// The type of elements this source produces
    type Output: Send + 'static;

    /// Human-readable name for logging and unit names
    const NAME: &'static str;

    /// Stage-local overrides (buffer sizes, dispatcher, supervision, ...)
    fn attributes(&self) -> Attributes {
        Attributes::none()
    }

    /// Run the source, pushing elements to the output until exhausted
    async fn run(self, ctx: StageContext, output: Outlet<Self::Output>) -> Result<()>;
}

/// A stage that transforms elements in the pipeline.
///
/// Any per-element state is confined to the `run()` method.
#[async_trait]
pub trait PipelineComponent: Send + 'static {
    /// The type of elements this component receives
    type Input: Send + 'static;

    /// The type of elements this component produces
    type Output: Send + 'static;

    const NAME: &'static str;

    fn attributes(&self) -> Attributes {
        Attributes::none()
    }

    /// Run the component, receiving from input and sending to output
    async fn run(
        self,
        ctx: StageContext,
        input: Inlet<Self::Input>,
        output: Outlet<Self::Output>,
    ) -> Result<()>;
}

/// A stage that consumes elements and ends the pipeline.
#[async_trait]
pub trait Sink: Send + 'static {
    type Input: Send + 'static;

    /// What materializing a graph ending in this sink returns
    type Mat: Send + 'static;

    const NAME: &'static str;

    fn attributes(&self) -> Attributes {
        Attributes::none()
    }

    /// Called once during wiring, before `run`, with the unique name of the stage.
    fn materialized_value(&mut self, stage: &str) -> Self::Mat;

    async fn run(self, ctx: StageContext, input: Inlet<Self::Input>) -> Result<()>;
}
