//! Global tracing subscriber setup.

mod formatter;
pub use formatter::{LogFormat, UnknownLogFormat};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Configuration of the process-wide tracer.
///
/// `RUST_LOG` directives take precedence over the default level.
#[derive(Debug, Clone)]
pub struct Tracer {
    format: LogFormat,
    use_color: bool,
    default_level: LevelFilter,
}

impl Tracer {
    pub const fn new(format: LogFormat, use_color: bool) -> Self {
        Self {
            format,
            use_color,
            default_level: LevelFilter::INFO,
        }
    }

    pub fn with_default_level(mut self, level: LevelFilter) -> Self {
        self.default_level = level;
        self
    }
}

impl Default for Tracer {
    /// Colored terminal output at `INFO`.
    fn default() -> Self {
        Self::new(LogFormat::Terminal, true)
    }
}

impl Tracer {
    /// Installs the tracer as the global default. Returns `false` if another subscriber was
    /// already installed, which is left in place.
    pub fn init(self) -> bool {
        let filter = EnvFilter::builder()
            .with_default_directive(self.default_level.into())
            .from_env_lossy();
        let layer = self.format.apply(filter, self.use_color);
        tracing_subscriber::registry().with(layer).try_init().is_ok()
    }
}
