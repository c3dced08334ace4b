mod config;
mod emitter;
mod error;
mod graphite;
mod ingest;
mod mqtt;
mod registry;
mod telemetry;

use crate::config::Config;
use crate::emitter::{spawn_emitter, BridgeStats, EmitCommand, EmitterHandle};
use crate::graphite::GraphiteSink;
use crate::ingest::ReadingIngestor;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sensor_bridge=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    if let Some(endpoint) = &config.otlp_endpoint {
        let endpoint = normalize_otlp_http_endpoint(endpoint);
        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(endpoint);
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "sensor-bridge"),
            ])))
            .install_batch(Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.contains("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config)?;

    let stats = Arc::new(BridgeStats::new());
    let (tx, rx) = mpsc::channel::<EmitCommand>(config.max_queue);
    let emitter = EmitterHandle::new(tx, stats.clone());
    let sink = GraphiteSink::new(
        &config.graphite_host,
        config.graphite_port,
        config.send_timeout(),
    );
    let _emitter_worker = spawn_emitter(sink, rx, stats);

    let ingestor = ReadingIngestor::new(
        emitter.clone(),
        config.mqtt_topic_prefix.clone(),
        config.inactivity_threshold(),
        config.repeat_alarms,
    );

    let sweep_handle = {
        let ingestor = ingestor.clone();
        let interval = config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = ingestor.check_inactive().await {
                    tracing::warn!(error = %err, "failed to run inactivity sweep");
                }
            }
        })
    };

    let mqtt_handle = tokio::spawn(mqtt::run_listener(config, ingestor));

    let result = tokio::select! {
        res = mqtt_handle => {
            match res {
                Ok(Ok(())) => Ok(()),
                // unreachable broker at startup is the one fatal error
                Ok(Err(err)) => Err(err),
                Err(err) => {
                    tracing::error!(error = %err, "MQTT task failed");
                    Ok(())
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    };

    sweep_handle.abort();
    drop(emitter);

    result
}
