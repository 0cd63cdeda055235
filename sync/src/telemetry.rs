//! Tracing subscriber setup for hosts embedding the sync layer.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError};

use crate::config::SyncConfig;

/// Install a global subscriber with an env filter and a fmt layer.
///
/// `RUST_LOG` takes precedence over [`SyncConfig::log_filter`]. Returns an
/// error if a global subscriber is already installed.
pub fn init(config: &SyncConfig) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}
