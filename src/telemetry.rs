//! Telemetry and structured logging for the export worker.

use opentelemetry::trace::{Span, Tracer};
use opentelemetry::{global, KeyValue};
use tracing::{info, warn};

use crate::job::{JobRecord, JobStatus};

const TRACER_NAME: &str = "export-worker";

/// Duration above which a finished export is flagged as slow.
const SLOW_EXPORT_MS: i64 = 10_000;

/// Records telemetry for a job that reached a terminal state.
///
/// Emits one structured log record and one OpenTelemetry span carrying
/// the job id, status, attempts, duration, and error details.
pub fn record_job_span(record: &JobRecord) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("export_job");

    span.set_attribute(KeyValue::new("job_id", record.job_id.clone()));
    span.set_attribute(KeyValue::new("status", record.status.to_string()));
    span.set_attribute(KeyValue::new("attempts_made", i64::from(record.attempts_made)));

    if let Some(duration_ms) = record.duration_ms {
        span.set_attribute(KeyValue::new("duration_ms", duration_ms));

        info!(
            job_id = %record.job_id,
            status = %record.status,
            duration_ms = duration_ms,
            attempts_made = record.attempts_made,
            "export job finished"
        );

        if duration_ms > SLOW_EXPORT_MS {
            warn!(
                job_id = %record.job_id,
                duration_ms = duration_ms,
                "export exceeded performance threshold ({SLOW_EXPORT_MS}ms)"
            );
        }
    }

    if record.status == JobStatus::Failed {
        if let Some(ref error) = record.error {
            span.set_attribute(KeyValue::new("error", error.clone()));
        }
        if let Some(ref code) = record.error_code {
            span.set_attribute(KeyValue::new("error_code", code.clone()));
        }
        warn!(
            job_id = %record.job_id,
            error = record.error.as_deref().unwrap_or(""),
            error_code = record.error_code.as_deref().unwrap_or(""),
            attempts_made = record.attempts_made,
            "export job failed"
        );
    }

    span.end();
}

/// Initializes OpenTelemetry with the OTLP exporter.
///
/// Called once at worker startup. Reads configuration from environment
/// variables:
/// - `OTEL_EXPORTER_OTLP_ENDPOINT` - Collector endpoint (default: http://localhost:4317)
/// - `OTEL_SERVICE_NAME` - Service name (default: export-worker)
pub fn init_telemetry() -> Result<(), Box<dyn std::error::Error>> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::Config;

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "export-worker".to_string());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(&endpoint),
        )
        .with_trace_config(Config::default().with_resource(
            opentelemetry_sdk::Resource::new(vec![
                KeyValue::new("service.name", service_name),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ]),
        ))
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    global::set_tracer_provider(tracer.provider().ok_or("missing tracer provider")?);

    info!("Telemetry initialized: endpoint={}", endpoint);
    Ok(())
}
