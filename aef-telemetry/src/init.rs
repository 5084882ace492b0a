//! Telemetry initialization and configuration

use std::error::Error;
use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

type InitResult = Result<(), Box<dyn Error>>;

/// Level filter from `RUST_LOG`, falling back to `info`.
fn env_filter() -> Result<EnvFilter, Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    Ok(filter)
}

/// Run `install` the first time any init function is called. Later calls
/// are no-ops that report success.
fn init_once(install: impl FnOnce() -> InitResult) -> InitResult {
    let mut outcome = Ok(());
    INIT.call_once(|| outcome = install());
    outcome
}

/// Initialize console logging
///
/// # Arguments
/// * `service_name` - Name reported in the first log line
///
/// # Example
/// ```
/// use aef_telemetry::init_telemetry;
/// init_telemetry("agent-eval").expect("Failed to initialize telemetry");
/// ```
pub fn init_telemetry(service_name: &str) -> InitResult {
    init_once(|| {
        tracing_subscriber::registry()
            .with(env_filter()?)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .try_init()?;

        tracing::info!(service.name = service_name, "Telemetry initialized");
        Ok(())
    })
}

/// Initialize JSON logging
///
/// Every line is a JSON object that includes the fields of the enclosing
/// spans, so log aggregators can filter by `eval.run_id`.
pub fn init_json_telemetry(service_name: &str) -> InitResult {
    init_once(|| {
        tracing_subscriber::registry()
            .with(env_filter()?)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()?;

        tracing::info!(service.name = service_name, "JSON telemetry initialized");
        Ok(())
    })
}

/// Initialize telemetry with OpenTelemetry OTLP export
///
/// Spans are exported to an OTLP collector in addition to console logging.
/// Must be called from within a Tokio runtime.
///
/// # Arguments
/// * `service_name` - Name of the service for trace identification
/// * `endpoint` - OTLP collector endpoint (e.g., "http://localhost:4317")
///
/// # Example
/// ```no_run
/// use aef_telemetry::init_with_otlp;
/// # #[tokio::main] async fn main() {
/// init_with_otlp("agent-eval", "http://localhost:4317")
///     .expect("Failed to initialize telemetry");
/// # }
/// ```
pub fn init_with_otlp(service_name: &str, endpoint: &str) -> InitResult {
    use opentelemetry_otlp::WithExportConfig;
    use tracing_opentelemetry::OpenTelemetryLayer;

    init_once(|| {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
            .with_trace_config(opentelemetry_sdk::trace::config().with_resource(
                opentelemetry_sdk::Resource::new(vec![opentelemetry::KeyValue::new(
                    "service.name",
                    service_name.to_string(),
                )]),
            ))
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;

        tracing_subscriber::registry()
            .with(env_filter()?)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .with(OpenTelemetryLayer::new(tracer))
            .try_init()?;

        tracing::info!(
            service.name = service_name,
            otlp.endpoint = endpoint,
            "Telemetry initialized with OpenTelemetry"
        );
        Ok(())
    })
}

/// Shutdown telemetry and flush any pending spans
///
/// Should be called before exit so the OTLP exporter sends its last batch.
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}
