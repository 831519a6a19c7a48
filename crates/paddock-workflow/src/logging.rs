//! Tracing subscriber setup for worker processes.

use crate::config::LoggingSettings;
use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_FILTER: &str = "paddock_workflow=debug,paddock_core=info,info";

/// Filter used when `RUST_LOG` is unset: the configured directives, else
/// [`DEFAULT_FILTER`].
pub fn filter(settings: &LoggingSettings) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directives = settings.filter.as_deref().unwrap_or(DEFAULT_FILTER);
    EnvFilter::try_new(directives).with_context(|| format!("invalid log filter `{directives}`"))
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(settings: &LoggingSettings) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(filter(settings)?);
    let installed = if settings.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    installed.context("failed to install tracing subscriber")
}
