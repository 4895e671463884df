use smart_config::{DescribeConfig, DeserializeConfig, Serde};
use std::time::Duration;
use strata_materializer::MaterializerConfig;
use strata_tracing::LogFormat;

/// Configuration for the node.
/// Includes configurations of all subsystems.
/// Default values are provided for local setup.
#[derive(Debug)]
pub struct Config {
    pub log_config: LogConfig,
    pub materializer_config: MaterializerConfig,
    pub demo_config: DemoConfig,
}

#[derive(Clone, Debug, DescribeConfig, DeserializeConfig)]
#[config(derive(Default))]
pub struct LogConfig {
    /// `json`, `logfmt` or `terminal`.
    #[config(default_t = LogFormat::Terminal)]
    #[config(with = Serde![str])]
    pub format: LogFormat,

    #[config(default_t = true)]
    pub use_color: bool,
}

/// Pipelines the node runs to exercise the materializer.
#[derive(Clone, Debug, DescribeConfig, DeserializeConfig)]
#[config(derive(Default))]
pub struct DemoConfig {
    /// Elements emitted by every producer flow.
    #[config(default_t = 10_000)]
    pub elements: u64,

    /// Size of the batches the consumer flow groups elements into.
    #[config(default_t = 256)]
    pub batch_size: usize,

    /// How often a producer/consumer pair is materialized.
    #[config(default_t = Duration::from_secs(5))]
    pub interval: Duration,

    /// Every n-th element fails to process and goes through the supervision decider.
    /// `0` disables injected failures.
    #[config(default_t = 0)]
    pub fail_every: u64,

    /// Also materialize a producer nobody subscribes to, so the subscription timeout has
    /// something to reclaim.
    #[config(default_t = false)]
    pub leave_orphan: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use smart_config::{ConfigRepository, ConfigSchema, Environment};

    #[test]
    fn log_format_is_read_from_string() {
        let mut schema = ConfigSchema::default();
        schema.insert(&LogConfig::DESCRIPTION, "log").unwrap();
        let repo = ConfigRepository::new(&schema).with(Environment::from_iter(
            "",
            [("LOG_FORMAT".to_owned(), "json".to_owned())],
        ));
        let config: LogConfig = repo.single().unwrap().parse().unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.use_color);
    }
}
