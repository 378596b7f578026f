use crate::APP_NAME;
use crate::logging::BoxedLayer;
use anyhow::Context;
use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use std::env;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{EnvFilter, Layer};

/// Builds a layer exporting spans to `OTEL_EXPORTER_OTLP_ENDPOINT`.
///
/// Also installs the W3C trace context propagator, which the request tracing
/// middleware uses to continue incoming traces.
pub fn open_telemetry_layer() -> anyhow::Result<BoxedLayer> {
    let endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .context("No OpenTelemetry endpoint present in OTEL_EXPORTER_OTLP_ENDPOINT")?;

    let provider = tracer_provider(&endpoint)?;
    let tracer = provider.tracer(APP_NAME.clone());
    let filter = EnvFilter::try_from_env("RUST_TRACE").unwrap_or_else(|_| EnvFilter::new("debug"));

    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    Ok(OpenTelemetryLayer::new(tracer).with_filter(filter).boxed())
}

fn tracer_provider(endpoint: &str) -> anyhow::Result<SdkTracerProvider> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .with_context(|| format!("Failed to build OpenTelemetry exporter for: {}", endpoint))?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_max_events_per_span(64)
        .with_max_attributes_per_span(16)
        .with_resource(
            Resource::builder_empty()
                .with_attributes([
                    KeyValue::new("service.name", APP_NAME.clone()),
                    KeyValue::new("service.version", crate::APP_VERSION.clone()),
                    KeyValue::new("service.namespace", crate::CLUSTER_ID.clone()),
                ])
                .build(),
        )
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());

    Ok(provider)
}
