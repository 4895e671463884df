use crate::subscription_timeout::SubscriptionTimeoutMode;
use smart_config::{DescribeConfig, DeserializeConfig, Serde};
use std::time::Duration;

/// Configuration of the stream materializer.
/// Resolved once into [`MaterializerSettings`](crate::MaterializerSettings); default values
/// are suitable for local runs.
#[derive(Clone, Debug, DescribeConfig, DeserializeConfig)]
#[config(derive(Default))]
pub struct MaterializerConfig {
    /// Initial size of the element lookahead buffer of each stage.
    #[config(default_t = 4)]
    pub initial_input_buffer_size: usize,

    /// Max size of the element lookahead buffer of each stage.
    #[config(default_t = 16)]
    pub max_input_buffer_size: usize,

    /// Name of the execution pool stages run on.
    #[config(default_t = "default".into())]
    pub dispatcher: String,

    /// Enables verbose per-element diagnostics in stages.
    #[config(default_t = false)]
    pub debug_logging: bool,

    /// Max number of elements a stage emits before yielding its scheduling turn.
    #[config(default_t = 1000)]
    pub output_burst_limit: usize,

    #[config(nest)]
    pub debug: MaterializerDebugConfig,

    /// Collapse adjacent stages that share a dispatcher into one execution unit.
    #[config(default_t = true)]
    pub auto_fusing: bool,

    /// Largest buffer that is still backed by a preallocated fixed-capacity ring.
    #[config(default_t = 1_000_000_000)]
    pub max_fixed_buffer_size: usize,

    #[config(nest)]
    pub subscription_timeout: SubscriptionTimeoutConfig,
}

#[derive(Clone, Debug, DescribeConfig, DeserializeConfig)]
#[config(derive(Default))]
pub struct MaterializerDebugConfig {
    /// Randomizes stage scheduling to shake out ordering assumptions. Test use only.
    #[config(default_t = false)]
    pub fuzzing_mode: bool,
}

#[derive(Clone, Debug, DescribeConfig, DeserializeConfig)]
#[config(derive(Default))]
pub struct SubscriptionTimeoutConfig {
    /// What to do with substream endpoints nobody connected to in time:
    /// `no` / `off` / `false` / `noop`, `warn` or `cancel`.
    #[config(default_t = SubscriptionTimeoutMode::Cancel)]
    #[config(with = Serde![str])]
    pub mode: SubscriptionTimeoutMode,

    /// Grace period before `mode` is applied.
    #[config(default_t = Duration::from_secs(5))]
    pub timeout: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use smart_config::{ConfigRepository, ConfigSchema, Environment};

    fn load(env: &[(&str, &str)]) -> Option<MaterializerConfig> {
        let mut schema = ConfigSchema::default();
        schema
            .insert(&MaterializerConfig::DESCRIPTION, "materializer")
            .unwrap();
        let repo = ConfigRepository::new(&schema).with(Environment::from_iter(
            "",
            env.iter().map(|&(key, value)| (key.to_owned(), value.to_owned())),
        ));
        repo.single::<MaterializerConfig>().unwrap().parse().ok()
    }

    fn load_mode(mode: &str) -> Option<SubscriptionTimeoutMode> {
        load(&[("MATERIALIZER_SUBSCRIPTION_TIMEOUT_MODE", mode)])
            .map(|config| config.subscription_timeout.mode)
    }

    #[test]
    fn loads_defaults_from_empty_environment() {
        let config = load(&[]).unwrap();
        assert_eq!(config.initial_input_buffer_size, 4);
        assert_eq!(config.max_input_buffer_size, 16);
        assert_eq!(config.dispatcher, "default");
        assert_eq!(config.subscription_timeout.mode, SubscriptionTimeoutMode::Cancel);
        assert_eq!(config.subscription_timeout.timeout, Duration::from_secs(5));
    }

    #[test]
    fn loads_every_mode_spelling() {
        for noop in ["no", "off", "false", "noop"] {
            assert_eq!(load_mode(noop), Some(SubscriptionTimeoutMode::Noop), "{noop}");
        }
        assert_eq!(load_mode("warn"), Some(SubscriptionTimeoutMode::Warn));
        assert_eq!(load_mode("cancel"), Some(SubscriptionTimeoutMode::Cancel));
    }

    #[test]
    fn unknown_mode_fails_loading() {
        assert_eq!(load_mode("bogus"), None);
        assert_eq!(load_mode("terminate"), None);
        // spellings are case-sensitive
        assert_eq!(load_mode("Warn"), None);
    }
}
