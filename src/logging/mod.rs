//! Tracing and logging setup.
//!
//! Call [`setup_tracing`] (or [`try_setup_tracing`]) once at startup:
//!
//! ```rust,ignore
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     kit::logging::setup_tracing();
//!     // ...
//! }
//! ```
//!
//! The console output is filtered by `RUST_LOG` (default `info`). Without the
//! `pretty_logs` feature it is plain text suitable for log aggregation:
//!
//! ```text
//! INFO  kit::web::middleware::inspect: request: finished status=200 [http_request{request_id="web-1/xJ3k0Qm2aB-000000001"}]
//! ```
//!
//! With `open_telemetry` enabled and `OTEL_EXPORTER_OTLP_ENDPOINT` set, spans
//! are exported via OTLP as well, filtered by `RUST_TRACE` (default `debug`).

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

#[cfg(feature = "pretty_logs")]
use tracing_subscriber::fmt::format::FmtSpan;

mod production;

#[cfg(feature = "pretty_logs")]
mod pretty;

#[cfg(feature = "open_telemetry")]
mod otel;

pub use production::ProductionLogFormat;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Installs the global subscriber.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed.
pub fn setup_tracing() {
    let (layers, otel) = build_layers();
    Registry::default().with(layers).init();
    report_setup(otel);
}

/// Installs the global subscriber unless one is already present.
pub fn try_setup_tracing() -> anyhow::Result<()> {
    let (layers, otel) = build_layers();
    Registry::default()
        .with(layers)
        .try_init()
        .context("Failed to install the tracing subscriber")?;
    report_setup(otel);

    Ok(())
}

/// The outcome of the OpenTelemetry setup, `None` if the feature is disabled.
type OtelOutcome = Option<anyhow::Result<()>>;

#[cfg(feature = "open_telemetry")]
fn build_layers() -> (Vec<BoxedLayer>, OtelOutcome) {
    let mut layers = vec![console_layer()];

    match otel::open_telemetry_layer() {
        Ok(layer) => {
            layers.push(layer);
            (layers, Some(Ok(())))
        }
        Err(err) => (layers, Some(Err(err))),
    }
}

#[cfg(not(feature = "open_telemetry"))]
fn build_layers() -> (Vec<BoxedLayer>, OtelOutcome) {
    (vec![console_layer()], None)
}

fn report_setup(otel: OtelOutcome) {
    match otel {
        Some(Ok(())) => tracing::info!(
            "Tracing initialized successfully [reporting to console as well as OpenTelemetry]"
        ),
        Some(Err(err)) => {
            tracing::info!("Tracing initialized successfully [reporting to console only]");
            tracing::info!("Skipping OpenTelemetry setup: {:#}", err);
        }
        None => tracing::info!("Tracing initialized successfully [reporting to console only]"),
    }

    tracing::info!(
        app = crate::APP_NAME.as_str(),
        version = crate::APP_VERSION.as_str(),
        cluster = crate::CLUSTER_ID.as_str(),
        "Starting up"
    );
}

fn console_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(feature = "pretty_logs")]
fn console_layer() -> BoxedLayer {
    tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW)
        .event_format(pretty::PrettyConsoleLogFormat)
        .with_filter(console_filter())
        .boxed()
}

#[cfg(not(feature = "pretty_logs"))]
fn console_layer() -> BoxedLayer {
    tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .event_format(ProductionLogFormat)
        .with_filter(console_filter())
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_setup_reports_an_error() {
        let _ = try_setup_tracing();

        assert!(try_setup_tracing().is_err());
    }
}
