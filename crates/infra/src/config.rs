//! Workflow configuration, read from the process environment.

use anyhow::Context;

pub const ENV_MAX_LINE_ITEMS: &str = "SITEDESK_MAX_LINE_ITEMS";
pub const ENV_ENFORCE_VERSIONS: &str = "SITEDESK_ENFORCE_VERSIONS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Upper bound on line items per declaration.
    pub max_line_items: usize,
    /// When false, caller-supplied versions are ignored (last write wins).
    pub enforce_versions: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_line_items: 100,
            enforce_versions: true,
        }
    }
}

impl WorkflowConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_MAX_LINE_ITEMS) {
            config.max_line_items = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MAX_LINE_ITEMS} must be a positive integer, got '{raw}'"))?;
            anyhow::ensure!(config.max_line_items > 0, "{ENV_MAX_LINE_ITEMS} must be at least 1");
        }

        if let Some(raw) = lookup(ENV_ENFORCE_VERSIONS) {
            config.enforce_versions = parse_flag(&raw)
                .with_context(|| format!("{ENV_ENFORCE_VERSIONS} must be true/false, got '{raw}'"))?;
        }

        Ok(config)
    }
}

fn parse_flag(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("unrecognized flag value '{other}'"),
    }
}
