use std::{path::PathBuf, time::Instant};

use anyhow::{Context, Result};
use opentelemetry::global;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, Protocol, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{Resource, logs::SdkLoggerProvider, trace::SdkTracerProvider};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

const SERVICE_NAME: &str = "flowtrace";
/// Target of the one-line JSON reports written per command.
pub const REPORT_TARGET: &str = "report";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    /// An `EnvFilter` directive, e.g. `info` or `flowtrace=debug`.
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
            otel_endpoint: None,
        }
    }
}

/// Keeps the installed sinks alive; call [`Telemetry::shutdown`] before
/// exiting so batched OTLP records are flushed.
pub enum Telemetry {
    Otlp {
        logger_provider: SdkLoggerProvider,
        tracer_provider: SdkTracerProvider,
    },
    Files {
        log_dir: PathBuf,
    },
    Stderr,
}

impl Telemetry {
    pub fn shutdown(self) {
        if let Telemetry::Otlp {
            logger_provider,
            tracer_provider,
        } = self
        {
            if let Err(err) = tracer_provider.shutdown() {
                eprintln!("failed to flush spans: {err}");
            }
            if let Err(err) = logger_provider.shutdown() {
                eprintln!("failed to flush logs: {err}");
            }
        }
    }
}

fn resource() -> Resource {
    Resource::builder().with_service_name(SERVICE_NAME).build()
}

/// Our own noise filter: the exporters' HTTP stack must not log into
/// itself.
fn export_filter(log_level: &str) -> Result<EnvFilter> {
    Ok(EnvFilter::try_new(log_level)?
        .add_directive("hyper=off".parse()?)
        .add_directive("tonic=off".parse()?)
        .add_directive("h2=off".parse()?)
        .add_directive("reqwest=off".parse()?))
}

/// Installs the global subscriber.
///
/// With an OTLP endpoint, logs and spans are exported over OTLP/HTTP and
/// mirrored to stderr. With a log directory, text logs and JSON reports go
/// to daily rolling files. Otherwise everything goes to stderr.
pub fn init_tracing(config: &LogConfig) -> Result<Telemetry> {
    if let Some(endpoint) = &config.otel_endpoint {
        return init_otlp(&config.log_level, endpoint);
    }
    if let Some(log_dir) = &config.log_dir {
        return init_files(&config.log_level, log_dir.clone());
    }

    Registry::default()
        .with(fmt::layer().with_writer(std::io::stderr).with_filter(EnvFilter::try_new(&config.log_level)?))
        .try_init()
        .context("tracing subscriber already installed")?;
    Ok(Telemetry::Stderr)
}

fn init_otlp(log_level: &str, endpoint: &str) -> Result<Telemetry> {
    let log_exporter = LogExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(format!("{}/v1/logs", endpoint.trim_end_matches('/')))
        .build()
        .context("building OTLP log exporter")?;
    let logger_provider = SdkLoggerProvider::builder()
        .with_batch_exporter(log_exporter)
        .with_resource(resource())
        .build();

    let span_exporter = SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(format!("{}/v1/traces", endpoint.trim_end_matches('/')))
        .build()
        .context("building OTLP span exporter")?;
    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(span_exporter)
        .with_resource(resource())
        .build();
    global::set_tracer_provider(tracer_provider.clone());

    let otel_layer = OpenTelemetryTracingBridge::new(&logger_provider).with_filter(export_filter(log_level)?);
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .with_filter(EnvFilter::try_new(log_level)?);

    Registry::default()
        .with(otel_layer)
        .with(fmt_layer)
        .try_init()
        .context("tracing subscriber already installed")?;

    Ok(Telemetry::Otlp {
        logger_provider,
        tracer_provider,
    })
}

fn init_files(log_level: &str, log_dir: PathBuf) -> Result<Telemetry> {
    std::fs::create_dir_all(&log_dir).with_context(|| format!("creating {}", log_dir.display()))?;

    let text_layer = fmt::layer()
        .with_writer(RollingFileAppender::new(Rotation::DAILY, &log_dir, "flowtrace.log"))
        .with_ansi(false)
        .with_filter(EnvFilter::try_new(log_level)?);

    // newline-delimited JSON, one line per finished command
    let report_layer = fmt::layer()
        .json()
        .with_writer(RollingFileAppender::new(Rotation::DAILY, &log_dir, "flowtrace-report.json"))
        .with_target(true)
        .with_filter(EnvFilter::try_new(format!("{REPORT_TARGET}=info"))?);

    Registry::default()
        .with(text_layer)
        .with(report_layer)
        .try_init()
        .context("tracing subscriber already installed")?;

    Ok(Telemetry::Files { log_dir })
}

/// Runs `handler` and records its outcome and latency, both as a regular
/// log line and as a JSON report event.
pub async fn instrument_command<F, Fut, T>(name: &str, handler: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start = Instant::now();
    let result = handler().await;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1_000.0;

    match &result {
        Ok(_) => info!("command `{}` finished in {:.1} ms", name, elapsed_ms),
        Err(err) => error!(error = %err, "command `{}` failed after {:.1} ms", name, elapsed_ms),
    }
    tracing::event!(
        target: REPORT_TARGET,
        tracing::Level::INFO,
        command = name,
        latency_ms = elapsed_ms,
        status = if result.is_ok() { "ok" } else { "error" },
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_filter_rejects_garbage() {
        assert!(export_filter("info").is_ok());
        assert!(export_filter("flowtrace=loud").is_err());
    }

    #[tokio::test]
    async fn test_instrument_command_passes_result_through() {
        let ok: Result<u8> = instrument_command("ok", || async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
        let failed: Result<u8> = instrument_command("fail", || async { anyhow::bail!("boom") }).await;
        assert_eq!(failed.unwrap_err().to_string(), "boom");
    }
}
