//! Logging setup for the load generator.
//!
//! Filtering follows `RUST_LOG` and defaults to `info`. Output is either the
//! human-readable format (thread IDs, file and line, local RFC 3339
//! timestamps) or one JSON object per event, picked by
//! [`LogFormat`](crate::config::LogFormat).

use crate::config::LogFormat;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails if a global subscriber was already installed.
pub fn init_telemetry(format: LogFormat) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()));

    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_timer(ChronoLocal::rfc_3339())
                    .with_file(true),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_thread_names(true)
                    .with_current_span(false)
                    .with_timer(ChronoLocal::rfc_3339()),
            )
            .try_init()?,
    }
    Ok(())
}
