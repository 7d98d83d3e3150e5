//! Tracing/logging initialization.
//!
//! Filtering comes from `RUST_LOG` (default `info`); the output format from
//! `SITEDESK_LOG_FORMAT`.

use std::str::FromStr;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

pub const ENV_LOG_FORMAT: &str = "SITEDESK_LOG_FORMAT";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable lines for local runs.
    Plain,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "plain" | "text" => Ok(LogFormat::Plain),
            other => anyhow::bail!("unknown log format '{other}' (expected json or plain)"),
        }
    }
}

impl LogFormat {
    /// Read the format from the environment; unset means JSON.
    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var(ENV_LOG_FORMAT) {
            Ok(raw) => raw.parse().with_context(|| format!("invalid {ENV_LOG_FORMAT}")),
            Err(_) => Ok(LogFormat::default()),
        }
    }
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Plain => builder.try_init(),
    };
}
