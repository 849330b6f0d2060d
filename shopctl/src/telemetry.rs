//! Tracing initialization.
//!
//! Logs go to stdout through a `tracing-subscriber` fmt layer, filtered by `RUST_LOG` (default
//! `info`). Set `log_format: json` in config.yaml (or `SHOPCTL_LOG_FORMAT=json`) for
//! line-delimited JSON suitable for log shippers.
//!
//! Counters are emitted through the `metrics` facade. No recorder is installed here; they are
//! no-ops unless the host process installs one.

use crate::config::LogFormat;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize the global tracing subscriber.
pub fn init_telemetry(format: LogFormat) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?;
        }
    }

    info!(?format, "Telemetry initialized");
    Ok(())
}
