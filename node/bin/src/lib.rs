pub mod config;
mod metrics;

use crate::config::{Config, DemoConfig};
use crate::metrics::{DEMO_METRICS, NODE_META_METRICS};
use anyhow::{Context, Result};
use std::num::NonZeroUsize;
use strata_materializer::{
    Attributes, Materializer, MaterializerSettings, SupervisionDecider, TokioMaterializer,
};
use strata_pipeline::{Grouped, Ignore, IterSource, Pipeline, Substream, SubstreamInput, TryMap};
use tokio::sync::watch;

pub const NODE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runs demo flows on a fresh materializer until `stop_receiver` flips, then shuts the
/// materializer down and waits for its units to stop.
pub async fn run(mut stop_receiver: watch::Receiver<bool>, config: Config) -> Result<()> {
    NODE_META_METRICS.version[&NODE_VERSION].set(1);

    let settings = MaterializerSettings::from_config(&config.materializer_config)
        .context("invalid materializer config")?;
    let materializer = TokioMaterializer::builder()
        .settings(settings)
        .name_prefix("node")
        .build()
        .context("failed to create materializer")?;
    tracing::info!(settings = ?materializer.settings(), "materializer started");

    let demo = config.demo_config;
    let mut ticker = tokio::time::interval(demo.interval);
    loop {
        tokio::select! {
            _ = stop_receiver.changed() => break,
            _ = ticker.tick() => {
                if let Err(err) = start_round(&materializer, &demo) {
                    tracing::error!("failed to start demo round: {err:#}");
                }
            }
        }
    }

    tracing::info!("stop signal received, shutting down materializer");
    materializer.shutdown();
    materializer.terminated().await;
    Ok(())
}

/// Materializes a producer flow that hands its output out as a substream, and a consumer flow
/// that subscribes to it.
fn start_round(materializer: &TokioMaterializer, demo: &DemoConfig) -> Result<()> {
    let batch_size = NonZeroUsize::new(demo.batch_size).context("batch_size must be positive")?;
    let producer = materializer.with_name_prefix("producer");

    let substream = producer.materialize(producer_flow(demo))?;
    let consumer = materializer.with_name_prefix("consumer");
    let completion = consumer.materialize(
        Pipeline::new()
            .pipe(SubstreamInput::new(substream))
            .pipe(Grouped::new(batch_size))
            .to(Ignore::new()),
    )?;
    DEMO_METRICS.rounds.inc();

    if demo.leave_orphan {
        let orphan = producer.materialize(producer_flow(demo))?;
        tracing::info!(endpoint = orphan.id(), "left substream without subscriber");
    }

    let endpoint = completion.endpoint().to_owned();
    tokio::spawn(async move {
        match completion.await {
            Ok(batches) => {
                DEMO_METRICS.batches.inc_by(batches);
                tracing::info!(%endpoint, batches, "consumer flow completed");
            }
            Err(failure) => {
                DEMO_METRICS.failed_rounds.inc();
                tracing::warn!(%endpoint, "consumer flow failed: {failure}");
            }
        }
    });
    Ok(())
}

fn producer_flow(demo: &DemoConfig) -> strata_pipeline::RunnableGraph<Substream<u64>> {
    let fail_every = demo.fail_every;
    let process = TryMap::stateless(move |element: u64| {
        if fail_every != 0 && (element + 1) % fail_every == 0 {
            anyhow::bail!("injected failure at element {element}");
        }
        Ok(element)
    })
    .with_attributes(Attributes::supervision_strategy(
        SupervisionDecider::resuming(),
    ));

    Pipeline::new()
        .pipe(IterSource::new(0..demo.elements))
        .pipe(process)
        .into_substream()
}
