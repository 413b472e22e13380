//! tracing-subscriber setup. Everything goes to stderr so command output on
//! stdout stays machine-readable.

use anyhow::{anyhow, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// `LEVEL target: message` lines
    #[default]
    Compact,
    /// JSON Lines
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" | "jsonl" => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Base level plus quiet defaults for dependencies.
pub fn build_env_filter(level: &str) -> Result<EnvFilter> {
    let directives = [level, "rusqlite=warn", "tokio=warn"].join(",");
    EnvFilter::try_new(&directives)
        .map_err(|e| anyhow!("Invalid log filter '{}': {}", directives, e))
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(level: &str, format: LogFormat) -> Result<()> {
    let layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_span_list(true)
            .with_filter(build_env_filter(level)?)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .without_time()
            .with_filter(build_env_filter(level)?)
            .boxed(),
    };

    // Tests and embedders may have installed one already.
    let _ = tracing_subscriber::registry().with(layer).try_init();
    Ok(())
}
