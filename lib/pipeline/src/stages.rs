use crate::builder::Substream;
use crate::signal::{Inlet, Outlet};
use crate::{PipelineComponent, Sink, Source};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use strata_materializer::{
    Attributes, CompletionSender, Directive, StageContext, StreamBuffer, StreamCompletion,
    StreamFailure, completion_signal,
};

/// Emits the elements of an iterator, then completes.
pub struct IterSource<I> {
    iter: I,
    attributes: Attributes,
}

impl<I> IterSource<I>
where
    I: Iterator + Send + 'static,
    I::Item: Send + 'static,
{
    pub fn new(iter: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            iter: iter.into_iter(),
            attributes: Attributes::none(),
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

#[async_trait]
impl<I> Source for IterSource<I>
where
    I: Iterator + Send + 'static,
    I::Item: Send + 'static,
{
    type Output = I::Item;

    const NAME: &'static str = "iter-source";

    fn attributes(&self) -> Attributes {
        self.attributes.clone()
    }

    async fn run(self, _ctx: StageContext, mut output: Outlet<I::Item>) -> Result<()> {
        for element in self.iter {
            output.push(element).await?;
        }
        output.complete().await;
        Ok(())
    }
}

/// Continues a [`Substream`] produced by another materialization.
///
/// Attaching happens when the stage starts; a substream that already timed out fails the stage.
pub struct SubstreamInput<T> {
    substream: Substream<T>,
}

impl<T: Send + 'static> SubstreamInput<T> {
    pub fn new(substream: Substream<T>) -> Self {
        Self { substream }
    }
}

#[async_trait]
impl<T: Send + 'static> Source for SubstreamInput<T> {
    type Output = T;

    const NAME: &'static str = "substream-input";

    async fn run(self, ctx: StageContext, mut output: Outlet<T>) -> Result<()> {
        let rx = self
            .substream
            .attach()
            .with_context(|| format!("stage `{}` cannot subscribe", ctx.name()))?;
        let mut input = Inlet::new(rx, self.substream.id(), &ctx);
        loop {
            match input.pull().await {
                Ok(Some(element)) => output.push(element).await?,
                Ok(None) => {
                    output.complete().await;
                    return Ok(());
                }
                Err(failure) => {
                    forward_failure(&ctx, output, failure).await;
                    return Ok(());
                }
            }
        }
    }
}

/// Fallible, stateful map honouring the stage's supervision decider.
///
/// `Resume` drops the failing element, `Restart` drops it and re-creates the state, `Stop` fails
/// the stream.
pub struct TryMap<In, Out, S, F> {
    init: Box<dyn Fn() -> S + Send>,
    f: F,
    attributes: Attributes,
    _elements: PhantomData<fn(In) -> Out>,
}

impl<In, Out, S, F> TryMap<In, Out, S, F>
where
    F: FnMut(&mut S, In) -> Result<Out> + Send + 'static,
    S: Send + 'static,
{
    pub fn new(init: impl Fn() -> S + Send + 'static, f: F) -> Self {
        Self {
            init: Box::new(init),
            f,
            attributes: Attributes::none(),
            _elements: PhantomData,
        }
    }
}

impl<In, Out, S, F> TryMap<In, Out, S, F> {
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

impl<In, Out, F> TryMap<In, Out, (), StatelessFn<F>>
where
    F: FnMut(In) -> Result<Out> + Send + 'static,
{
    pub fn stateless(f: F) -> Self {
        Self {
            init: Box::new(|| ()),
            f: StatelessFn(f),
            attributes: Attributes::none(),
            _elements: PhantomData,
        }
    }
}

/// Adapts a plain closure to the stateful map signature.
pub struct StatelessFn<F>(F);

/// Mapping function of a [`TryMap`].
pub trait MapFn<S, In, Out>: Send + 'static {
    fn apply(&mut self, state: &mut S, element: In) -> Result<Out>;
}

impl<S, In, Out, F> MapFn<S, In, Out> for F
where
    F: FnMut(&mut S, In) -> Result<Out> + Send + 'static,
{
    fn apply(&mut self, state: &mut S, element: In) -> Result<Out> {
        self(state, element)
    }
}

impl<In, Out, F> MapFn<(), In, Out> for StatelessFn<F>
where
    F: FnMut(In) -> Result<Out> + Send + 'static,
{
    fn apply(&mut self, _state: &mut (), element: In) -> Result<Out> {
        (self.0)(element)
    }
}

#[async_trait]
impl<In, Out, S, F> PipelineComponent for TryMap<In, Out, S, F>
where
    In: Send + 'static,
    Out: Send + 'static,
    S: Send + 'static,
    F: MapFn<S, In, Out>,
{
    type Input = In;
    type Output = Out;

    const NAME: &'static str = "try-map";

    fn attributes(&self) -> Attributes {
        self.attributes.clone()
    }

    async fn run(
        mut self,
        ctx: StageContext,
        mut input: Inlet<In>,
        mut output: Outlet<Out>,
    ) -> Result<()> {
        let mut state = (self.init)();
        loop {
            let element = match input.pull().await {
                Ok(Some(element)) => element,
                Ok(None) => {
                    output.complete().await;
                    return Ok(());
                }
                Err(failure) => {
                    forward_failure(&ctx, output, failure).await;
                    return Ok(());
                }
            };
            match self.f.apply(&mut state, element) {
                Ok(mapped) => output.push(mapped).await?,
                Err(err) => match ctx.decide(&err) {
                    Directive::Resume => {}
                    Directive::Restart => state = (self.init)(),
                    Directive::Stop => {
                        let failure = StreamFailure::stage(ctx.name(), err);
                        input.cancel();
                        output.fail(failure.clone()).await;
                        return Err(failure.into());
                    }
                },
            }
        }
    }
}

/// Chunks the stream into groups of `size`; the last group may be smaller.
pub struct Grouped<T> {
    size: NonZeroUsize,
    _elements: PhantomData<fn(T)>,
}

impl<T> Grouped<T> {
    pub fn new(size: NonZeroUsize) -> Self {
        Self {
            size,
            _elements: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> PipelineComponent for Grouped<T> {
    type Input = T;
    type Output = Vec<T>;

    const NAME: &'static str = "grouped";

    async fn run(
        self,
        ctx: StageContext,
        mut input: Inlet<T>,
        mut output: Outlet<Vec<T>>,
    ) -> Result<()> {
        let mut group = StreamBuffer::for_capacity(self.size.get(), ctx.settings());
        loop {
            let element = match input.pull().await {
                Ok(Some(element)) => element,
                Ok(None) => break,
                Err(failure) => {
                    forward_failure(&ctx, output, failure).await;
                    return Ok(());
                }
            };
            if let Err(element) = group.push(element) {
                output.push(group.drain_all()).await?;
                let _ = group.push(element);
            }
            // take whatever is already waiting without yielding
            while !group.is_full() {
                match input.try_pull() {
                    Ok(Some(element)) => {
                        let _ = group.push(element);
                    }
                    Ok(None) => break,
                    Err(failure) => {
                        forward_failure(&ctx, output, failure).await;
                        return Ok(());
                    }
                }
            }
            if group.is_full() {
                output.push(group.drain_all()).await?;
            }
            if input.is_finished() {
                break;
            }
        }
        if !group.is_empty() {
            output.push(group.drain_all()).await?;
        }
        output.complete().await;
        Ok(())
    }
}

/// Collects every element; materializes to the collected elements once the stream completes.
pub struct Collect<T> {
    completion: Option<CompletionSender<Vec<T>>>,
    attributes: Attributes,
}

impl<T> Collect<T> {
    pub fn new() -> Self {
        Self {
            completion: None,
            attributes: Attributes::none(),
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

impl<T> Default for Collect<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> Sink for Collect<T> {
    type Input = T;
    type Mat = StreamCompletion<Vec<T>>;

    const NAME: &'static str = "collect";

    fn attributes(&self) -> Attributes {
        self.attributes.clone()
    }

    fn materialized_value(&mut self, stage: &str) -> Self::Mat {
        let (sender, completion) = completion_signal(stage);
        self.completion = Some(sender);
        completion
    }

    async fn run(self, _ctx: StageContext, mut input: Inlet<T>) -> Result<()> {
        let completion = self
            .completion
            .context("collect sink started without a materialized value")?;
        let mut elements = Vec::new();
        loop {
            match input.pull().await {
                Ok(Some(element)) => elements.push(element),
                Ok(None) => {
                    completion.complete(elements);
                    return Ok(());
                }
                Err(failure) => {
                    completion.fail(failure);
                    return Ok(());
                }
            }
        }
    }
}

/// Drains the stream; materializes to the number of elements seen.
pub struct Ignore<T> {
    completion: Option<CompletionSender<u64>>,
    _elements: PhantomData<fn(T)>,
}

impl<T> Ignore<T> {
    pub fn new() -> Self {
        Self {
            completion: None,
            _elements: PhantomData,
        }
    }
}

impl<T> Default for Ignore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> Sink for Ignore<T> {
    type Input = T;
    type Mat = StreamCompletion<u64>;

    const NAME: &'static str = "ignore";

    fn materialized_value(&mut self, stage: &str) -> Self::Mat {
        let (sender, completion) = completion_signal(stage);
        self.completion = Some(sender);
        completion
    }

    async fn run(self, _ctx: StageContext, mut input: Inlet<T>) -> Result<()> {
        let completion = self
            .completion
            .context("ignore sink started without a materialized value")?;
        let mut seen = 0u64;
        loop {
            match input.pull().await {
                Ok(Some(_)) => seen += 1,
                Ok(None) => {
                    completion.complete(seen);
                    return Ok(());
                }
                Err(failure) => {
                    completion.fail(failure);
                    return Ok(());
                }
            }
        }
    }
}

async fn forward_failure<T>(ctx: &StageContext, output: Outlet<T>, failure: StreamFailure) {
    tracing::debug!(stage = %ctx.name(), "forwarding upstream failure: {failure}");
    output.fail(failure).await;
}
