//! Telemetry logic.
//! Logs go through `tracing`; the metrics recorder is left to the host.
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_FILTER: &str = "info";

/// Describe every metric emitted by this crate.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "accounts_created_total",
        metrics::Unit::Count,
        "Total accounts created, by staff and superuser flags."
    );
}

/// Install the global subscriber.
///
/// The filter is read from `RUST_LOG`, defaulting to `info`.
pub fn init() -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()?;

    describe_metrics();
    Ok(())
}
