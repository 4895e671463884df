//! Immutable materializer settings.
//!
//! Every `with_*` call returns a fully populated copy; numeric fields are validated when the copy
//! is made, so an instance that exists is always usable.

use crate::attributes::Attributes;
use crate::config::MaterializerConfig;
use crate::subscription_timeout::SubscriptionTimeoutSettings;
use crate::supervision::SupervisionDecider;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("`{field}` must be positive")]
    NonPositive { field: &'static str },
    #[error(
        "initial input buffer size ({initial}) must not exceed max input buffer size ({max})"
    )]
    InitialExceedsMax { initial: usize, max: usize },
}

fn ensure_positive(field: &'static str, value: usize) -> Result<usize, SettingsError> {
    if value == 0 {
        return Err(SettingsError::NonPositive { field });
    }
    Ok(value)
}

/// Bounds of the element lookahead buffer of a stage; `0 < initial <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputBuffer {
    initial: usize,
    max: usize,
}

impl InputBuffer {
    pub fn new(initial: usize, max: usize) -> Result<Self, SettingsError> {
        let initial = ensure_positive("initial_input_buffer_size", initial)?;
        let max = ensure_positive("max_input_buffer_size", max)?;
        if initial > max {
            return Err(SettingsError::InitialExceedsMax { initial, max });
        }
        Ok(Self { initial, max })
    }

    pub fn initial(&self) -> usize {
        self.initial
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaterializerSettings {
    input_buffer: InputBuffer,
    dispatcher: String,
    supervision_decider: SupervisionDecider,
    subscription_timeout: SubscriptionTimeoutSettings,
    debug_logging: bool,
    fuzzing_mode: bool,
    auto_fusing: bool,
    output_burst_limit: usize,
    max_fixed_buffer_size: usize,
}

impl Default for MaterializerSettings {
    fn default() -> Self {
        Self {
            input_buffer: InputBuffer { initial: 4, max: 16 },
            dispatcher: "default".to_owned(),
            supervision_decider: SupervisionDecider::stopping(),
            subscription_timeout: SubscriptionTimeoutSettings::default(),
            debug_logging: false,
            fuzzing_mode: false,
            auto_fusing: true,
            output_burst_limit: 1000,
            max_fixed_buffer_size: 1_000_000_000,
        }
    }
}

impl MaterializerSettings {
    pub fn from_config(config: &MaterializerConfig) -> Result<Self, SettingsError> {
        Ok(Self {
            input_buffer: InputBuffer::new(
                config.initial_input_buffer_size,
                config.max_input_buffer_size,
            )?,
            dispatcher: config.dispatcher.clone(),
            supervision_decider: SupervisionDecider::stopping(),
            subscription_timeout: SubscriptionTimeoutSettings::new(
                config.subscription_timeout.mode,
                config.subscription_timeout.timeout,
            ),
            debug_logging: config.debug_logging,
            fuzzing_mode: config.debug.fuzzing_mode,
            auto_fusing: config.auto_fusing,
            output_burst_limit: ensure_positive("output_burst_limit", config.output_burst_limit)?,
            max_fixed_buffer_size: ensure_positive(
                "max_fixed_buffer_size",
                config.max_fixed_buffer_size,
            )?,
        })
    }

    pub fn input_buffer(&self) -> InputBuffer {
        self.input_buffer
    }

    /// Starting reservation of growable stage buffers.
    pub fn initial_input_buffer_size(&self) -> usize {
        self.input_buffer.initial
    }

    pub fn max_input_buffer_size(&self) -> usize {
        self.input_buffer.max
    }

    pub fn dispatcher(&self) -> &str {
        &self.dispatcher
    }

    pub fn supervision_decider(&self) -> &SupervisionDecider {
        &self.supervision_decider
    }

    pub fn subscription_timeout_settings(&self) -> SubscriptionTimeoutSettings {
        self.subscription_timeout
    }

    pub fn is_debug_logging(&self) -> bool {
        self.debug_logging
    }

    pub fn is_fuzzing_mode(&self) -> bool {
        self.fuzzing_mode
    }

    pub fn is_auto_fusing(&self) -> bool {
        self.auto_fusing
    }

    pub fn output_burst_limit(&self) -> usize {
        self.output_burst_limit
    }

    pub fn max_fixed_buffer_size(&self) -> usize {
        self.max_fixed_buffer_size
    }

    pub fn with_input_buffer(&self, initial: usize, max: usize) -> Result<Self, SettingsError> {
        Ok(self.with_input_buffer_bounds(InputBuffer::new(initial, max)?))
    }

    pub fn with_input_buffer_bounds(&self, input_buffer: InputBuffer) -> Self {
        Self {
            input_buffer,
            ..self.clone()
        }
    }

    pub fn with_dispatcher(&self, dispatcher: impl Into<String>) -> Self {
        Self {
            dispatcher: dispatcher.into(),
            ..self.clone()
        }
    }

    pub fn with_supervision_decider(&self, supervision_decider: SupervisionDecider) -> Self {
        Self {
            supervision_decider,
            ..self.clone()
        }
    }

    pub fn with_subscription_timeout_settings(
        &self,
        subscription_timeout: SubscriptionTimeoutSettings,
    ) -> Self {
        Self {
            subscription_timeout,
            ..self.clone()
        }
    }

    pub fn with_debug_logging(&self, debug_logging: bool) -> Self {
        Self {
            debug_logging,
            ..self.clone()
        }
    }

    pub fn with_fuzzing_mode(&self, fuzzing_mode: bool) -> Self {
        Self {
            fuzzing_mode,
            ..self.clone()
        }
    }

    pub fn with_auto_fusing(&self, auto_fusing: bool) -> Self {
        Self {
            auto_fusing,
            ..self.clone()
        }
    }

    pub fn with_output_burst_limit(&self, limit: usize) -> Result<Self, SettingsError> {
        Ok(Self {
            output_burst_limit: ensure_positive("output_burst_limit", limit)?,
            ..self.clone()
        })
    }

    pub fn with_max_fixed_buffer_size(&self, size: usize) -> Result<Self, SettingsError> {
        Ok(Self {
            max_fixed_buffer_size: ensure_positive("max_fixed_buffer_size", size)?,
            ..self.clone()
        })
    }

    /// Layers stage-local overrides on top of `self`: input buffer, then supervision decider,
    /// then dispatcher. Fields without an override fall through unchanged.
    pub fn resolve(&self, attributes: &Attributes) -> Self {
        let mut settings = self.clone();
        if let Some(input_buffer) = attributes.get_input_buffer() {
            settings.input_buffer = input_buffer;
        }
        if let Some(decider) = attributes.get_supervision_decider() {
            settings.supervision_decider = decider.clone();
        }
        if let Some(dispatcher) = attributes.get_dispatcher() {
            settings.dispatcher = dispatcher.to_owned();
        }
        settings
    }
}
