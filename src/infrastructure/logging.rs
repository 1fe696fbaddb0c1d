//! Logging setup.
//!
//! Console subscriber with an `EnvFilter`. The application level comes from
//! LOG_LEVEL; a `RUST_LOG` environment variable overrides everything.
//! Chatty dependency targets are capped below the application level so a
//! debug run shows crawl activity, not protocol traffic.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

pub fn init(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!(
            "{level},sqlx=warn,hyper=warn,hyper_util=warn,reqwest=warn,chromiumoxide=warn,h2=warn"
        ))
    })
    .with_context(|| format!("invalid log level {level:?}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    tracing::info!("using log level {level}");
    Ok(())
}
