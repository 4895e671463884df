//! Strata Pipeline Framework
//!
//! This crate provides traits and utilities for building type-safe, composable
//! linear stream pipelines that a `strata_materializer::Materializer` turns into
//! running, supervised stages.
//!
//! # Core Concepts
//!
//! - **Source**: Stages that generate elements (iterators, substreams)
//! - **PipelineComponent**: Stages that transform elements (e.g. `TryMap`, `Grouped`)
//! - **Sink**: End of pipeline; decides what materializing the pipeline returns
//!
//! Stages exchange [`StreamSignal`]s over bounded channels, so a slow stage
//! backpressures everything upstream of it.

pub mod builder;
pub mod signal;
pub mod stages;
pub mod traits;

pub use builder::{Pipeline, PipelineWithOutput, RunnableGraph, Substream};
pub use signal::{DownstreamCancelled, Inlet, Outlet, StreamSignal};
pub use stages::{Collect, Grouped, Ignore, IterSource, MapFn, StatelessFn, SubstreamInput, TryMap};
pub use traits::{PipelineComponent, Sink, Source};
