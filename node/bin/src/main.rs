use smart_config::{ConfigRepository, ConfigSchema, DescribeConfig, Environment};
use std::time::Duration;
use strata_materializer::MaterializerConfig;
use strata_node::config::{Config, DemoConfig, LogConfig};
use strata_node::run;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;

const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
pub async fn main() {
    // =========== load configs ===========
    let config = build_configs();

    // =========== init tracing ===========
    strata_tracing::Tracer::new(config.log_config.format, config.log_config.use_color).init();
    tracing::info!(?config, "Loaded config");

    // =========== init interruption channel ===========
    let (stop_sender, stop_receiver) = watch::channel(false);
    let main_stop = stop_receiver.clone();
    let main_task = run(main_stop, config);

    tokio::select! {
        res = main_task => {
            match res {
                Ok(()) if *stop_receiver.borrow() => {
                    tracing::info!("Main task exited gracefully after stop signal");
                }
                Ok(()) => tracing::warn!("Main task unexpectedly exited"),
                Err(e) => tracing::error!("Main task failed: {e:#}"),
            }
        },
        _ = handle_delayed_termination(stop_sender) => {},
    }
}

async fn handle_delayed_termination(stop_sender: watch::Sender<bool>) {
    // sigint is sent on Ctrl+C
    let mut sigint =
        signal(SignalKind::interrupt()).expect("failed to register interrupt signal handler");

    // sigterm is sent on `kill <pid>` or by kubernetes during pod shutdown
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to register terminate signal handler");
    tokio::select! {
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, shutting down immediately");
        },
        _ = sigterm.recv() => {
            tracing::info!(
                "Received SIGTERM: stopping flows, waiting up to {GRACEFUL_SHUTDOWN_TIMEOUT:?}"
            );

            stop_sender
                .send(true)
                .expect("failed to send terminate signal");

            tokio::time::sleep(GRACEFUL_SHUTDOWN_TIMEOUT).await;
        },
    }
}

fn build_configs() -> Config {
    let mut schema = ConfigSchema::default();
    schema
        .insert(&LogConfig::DESCRIPTION, "log")
        .expect("Failed to insert log config");
    schema
        .insert(&MaterializerConfig::DESCRIPTION, "materializer")
        .expect("Failed to insert materializer config");
    schema
        .insert(&DemoConfig::DESCRIPTION, "demo")
        .expect("Failed to insert demo config");

    let repo = ConfigRepository::new(&schema).with(Environment::prefixed(""));

    let log_config = repo
        .single::<LogConfig>()
        .expect("Failed to load log config")
        .parse()
        .expect("Failed to parse log config");

    let materializer_config = repo
        .single::<MaterializerConfig>()
        .expect("Failed to load materializer config")
        .parse()
        .expect("Failed to parse materializer config");

    let demo_config = repo
        .single::<DemoConfig>()
        .expect("Failed to load demo config")
        .parse()
        .expect("Failed to parse demo config");

    Config {
        log_config,
        materializer_config,
        demo_config,
    }
}
