use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::util::telemetry::Telemetry;

/// Builds the filter directive for the configured verbosity. Our own spans follow `level`;
/// `sqlx` and `reqwest` stay at `warn` unless we are tracing everything.
pub fn filter_directive(level: &str) -> String {
    let level = match level.trim().to_ascii_lowercase().as_str() {
        "" => "info".to_string(),
        "warning" => "warn".to_string(),
        other => other.to_string(),
    };

    let deps = if level == "trace" { "debug" } else { "warn" };
    format!("classroom_sync={level},sqlx={deps},reqwest={deps},hyper={deps},warn")
}

pub fn init_subscriber(level: &str, json: bool, telemetry: Option<&Telemetry>) {
    let filter = EnvFilter::try_new(filter_directive(level))
        .unwrap_or_else(|_| EnvFilter::new(filter_directive("info")));

    tracing_subscriber::registry()
        .with(filter)
        .with(telemetry.map(|t| tracing_opentelemetry::layer().with_tracer(t.tracer())))
        .with(telemetry.map(|t| OpenTelemetryTracingBridge::new(t.logger_provider())))
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
        }))
        .with((!json).then(|| {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
        }))
        .init();
}
