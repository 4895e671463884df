use crate::signal::{DownstreamCancelled, Inlet, Outlet, StreamSignal};
use crate::{PipelineComponent, Sink, Source};
use anyhow::Result;
use futures::FutureExt;
use std::future::Future;
use strata_materializer::{
    Attributes, GraphDescription, Shape, StageBody, SubstreamSource, WiringContext,
};
use tokio::sync::mpsc;

/// Output of a materialized pipeline handed out as an orphaned endpoint.
pub type Substream<T> = SubstreamSource<StreamSignal<T>>;

/// Channel end produced by the last wired stage.
struct Upstream<T> {
    rx: mpsc::Receiver<StreamSignal<T>>,
    stage: String,
}

/// Wires everything up to the current end of the pipeline; the argument is the capacity of the
/// channel the last stage writes to.
type WireFn<T> =
    Box<dyn for<'a, 'b> FnOnce(&'a mut WiringContext<'b>, usize) -> Result<Upstream<T>> + Send>;

/// Fluent pipeline builder with automatic channel wiring
///
/// Nothing runs until the resulting graph is materialized. Every stage's output channel is sized
/// by the input buffer of the stage reading from it.
///
/// Example:
/// ```ignore
/// let completion = materializer.materialize(
///     Pipeline::new()
///         .pipe(IterSource::new(0..10))          // Source stage
///         .pipe(TryMap::stateless(parse))        // Transformer stage
///         .to(Collect::new()),                   // Sink stage
/// )?;
/// let elements = completion.await?;
/// ```
pub struct Pipeline {
    attributes: Attributes,
}

impl Pipeline {
    /// Create a new empty pipeline
    pub fn new() -> Self {
        Self {
            attributes: Attributes::none(),
        }
    }

    /// Attributes applying to every stage of the pipeline unless a stage overrides them.
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = self.attributes.and(&attributes);
        self
    }

    /// Add a source stage to start the pipeline
    pub fn pipe<S>(self, source: S) -> PipelineWithOutput<S::Output>
    where
        S: Source,
    {
        let stage_attributes = source.attributes();
        let wire: WireFn<S::Output> = Box::new(move |ctx, capacity| {
            let (tx, rx) = mpsc::channel(capacity);
            let stage = ctx
                .add_unit(S::NAME, &stage_attributes, move |stage| {
                    let outlet = Outlet::new(tx, &stage);
                    stage_body(stage.name().to_owned(), source.run(stage, outlet))
                })
                .to_owned();
            Ok(Upstream { rx, stage })
        });

        PipelineWithOutput {
            attributes: self.attributes,
            last_stage: S::NAME,
            wire,
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pipeline with a dangling output that can be piped to more stages.
///
/// Materializing it as is fails: its shape has an unconnected outlet.
pub struct PipelineWithOutput<Output: Send + 'static> {
    attributes: Attributes,
    last_stage: &'static str,
    wire: WireFn<Output>,
}

impl<Output: Send + 'static> PipelineWithOutput<Output> {
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = self.attributes.and(&attributes);
        self
    }

    /// Add a transformer stage to the pipeline
    pub fn pipe<C>(self, component: C) -> PipelineWithOutput<C::Output>
    where
        C: PipelineComponent<Input = Output>,
    {
        let upstream_wire = self.wire;
        let stage_attributes = component.attributes();
        let wire: WireFn<C::Output> = Box::new(move |ctx, capacity| {
            let input_capacity = ctx
                .effective_settings(&stage_attributes)
                .max_input_buffer_size();
            let upstream = upstream_wire(ctx, input_capacity)?;
            let (tx, rx) = mpsc::channel(capacity);
            let stage = ctx
                .add_unit(C::NAME, &stage_attributes, move |stage| {
                    let input = Inlet::new(upstream.rx, upstream.stage, &stage);
                    let output = Outlet::new(tx, &stage);
                    stage_body(stage.name().to_owned(), component.run(stage, input, output))
                })
                .to_owned();
            Ok(Upstream { rx, stage })
        });

        PipelineWithOutput {
            attributes: self.attributes,
            last_stage: C::NAME,
            wire,
        }
    }

    /// Close the pipeline with a sink. The graph materializes to the sink's value.
    pub fn to<S>(self, mut sink: S) -> RunnableGraph<S::Mat>
    where
        S: Sink<Input = Output>,
    {
        let upstream_wire = self.wire;
        let stage_attributes = sink.attributes();
        RunnableGraph {
            attributes: self.attributes,
            wire: Box::new(move |ctx| {
                let input_capacity = ctx
                    .effective_settings(&stage_attributes)
                    .max_input_buffer_size();
                let upstream = upstream_wire(ctx, input_capacity)?;
                let mut mat = None;
                ctx.add_unit(S::NAME, &stage_attributes, |stage| {
                    mat = Some(sink.materialized_value(stage.name()));
                    let input = Inlet::new(upstream.rx, upstream.stage, &stage);
                    stage_body(stage.name().to_owned(), sink.run(stage, input))
                });
                mat.ok_or_else(|| anyhow::anyhow!("sink `{}` was not wired", S::NAME))
            }),
        }
    }

    /// Close the pipeline by handing its output out as a [`Substream`].
    ///
    /// The substream is an orphan until someone attaches to it; if that does not happen within
    /// the subscription timeout, the configured timeout mode applies.
    pub fn into_substream(self) -> RunnableGraph<Substream<Output>> {
        let upstream_wire = self.wire;
        RunnableGraph {
            attributes: self.attributes,
            wire: Box::new(move |ctx| {
                let settings = ctx.effective_settings(&Attributes::none());
                let upstream = upstream_wire(ctx, settings.max_input_buffer_size())?;
                let substream = SubstreamSource::new(upstream.stage, upstream.rx);
                ctx.register_orphan(
                    substream.as_orphan(),
                    settings.subscription_timeout_settings(),
                );
                Ok(substream)
            }),
        }
    }
}

impl<Output: Send + 'static> GraphDescription for PipelineWithOutput<Output> {
    type Mat = ();

    fn shape(&self) -> Shape {
        Shape::closed().with_outlet(format!("{}.out", self.last_stage))
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn wire(self, _ctx: &mut WiringContext<'_>) -> Result<()> {
        anyhow::bail!("output of stage `{}` is not connected", self.last_stage)
    }
}

/// Closed pipeline, ready to be materialized.
pub struct RunnableGraph<M> {
    attributes: Attributes,
    wire: Box<dyn for<'a, 'b> FnOnce(&'a mut WiringContext<'b>) -> Result<M> + Send>,
}

impl<M> RunnableGraph<M> {
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = self.attributes.and(&attributes);
        self
    }
}

impl<M> GraphDescription for RunnableGraph<M> {
    type Mat = M;

    fn shape(&self) -> Shape {
        Shape::closed()
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn wire(self, ctx: &mut WiringContext<'_>) -> Result<M> {
        (self.wire)(ctx)
    }
}

/// A stage whose downstream went away stops quietly.
fn stage_body<F>(stage: String, run: F) -> StageBody
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    async move {
        match run.await {
            Err(err) if err.is::<DownstreamCancelled>() => {
                tracing::debug!(stage = %stage, "downstream cancelled, stopping");
                Ok(())
            }
            other => other,
        }
    }
    .boxed()
}
