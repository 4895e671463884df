use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Output format of the global subscriber.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event, with target, file and line.
    Json,

    /// `key=value` pairs, one event per line.
    LogFmt,

    /// Human-readable output for local runs.
    #[default]
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log format `{0}`, expected one of: json, logfmt, terminal")]
pub struct UnknownLogFormat(String);

impl LogFormat {
    /// Builds the formatting layer for this format, filtered by `filter`.
    pub fn apply(
        &self,
        filter: EnvFilter,
        use_color: bool,
    ) -> Box<dyn Layer<Registry> + Send + Sync + 'static> {
        match self {
            Self::Json => tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(use_color)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter)
                .boxed(),
            Self::LogFmt => tracing_logfmt::layer().with_filter(filter).boxed(),
            Self::Terminal => tracing_subscriber::fmt::layer()
                .with_ansi(use_color)
                .with_target(true)
                .with_thread_names(true)
                .with_filter(filter)
                .boxed(),
        }
    }
}

impl FromStr for LogFormat {
    type Err = UnknownLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "logfmt" => Ok(Self::LogFmt),
            "terminal" => Ok(Self::Terminal),
            _ => Err(UnknownLogFormat(s.to_owned())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::LogFmt => f.write_str("logfmt"),
            Self::Terminal => f.write_str("terminal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_display_output() {
        for format in [LogFormat::Json, LogFormat::LogFmt, LogFormat::Terminal] {
            assert_eq!(format.to_string().parse::<LogFormat>(), Ok(format));
        }
        assert_eq!(" JSON ".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert!("pretty".parse::<LogFormat>().is_err());
    }
}
