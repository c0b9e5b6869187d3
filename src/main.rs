use anyhow::{Context, Result};
use forecastio_sidecar::config::Config;
use forecastio_sidecar::fetch::ReqwestFetcher;
use forecastio_sidecar::mqtt::{self, MqttSink};
use forecastio_sidecar::notify::TracingNotifier;
use forecastio_sidecar::scheduler::{ForecastModule, ModuleOptions, REFRESH_DEBOUNCE};
use forecastio_sidecar::sink::{MemorySink, PublishSink, SinkId};
use futures::future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,forecastio_sidecar=info".into());
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
                KeyValue::new("service.name", "forecastio-sidecar"),
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

    let fetcher = Arc::new(
        ReqwestFetcher::new(config.http_timeout()).context("failed to build HTTP client")?,
    );
    let options = ModuleOptions {
        api_base_url: config.api_base_url.clone(),
        icon_base: config.icon_base.clone(),
        debounce: REFRESH_DEBOUNCE,
    };

    let (sink, mqtt_parts) = match &config.mqtt {
        Some(mqtt_config) => {
            let (sink, mut eventloop) = MqttSink::new(mqtt_config);
            let current_device = SinkId::Current.device_id(&config.module.instance_id);
            sink.load_retained(
                &mut eventloop,
                &current_device,
                "timestamp",
                mqtt::RETAINED_LOAD_TIMEOUT,
            )
            .await;
            let client = sink.client();
            let sink: Arc<dyn PublishSink> = Arc::new(sink);
            (sink, Some((eventloop, client, mqtt_config.topic_prefix.clone())))
        }
        None => {
            tracing::info!("no MQTT broker configured; metrics stay in memory");
            let sink: Arc<dyn PublishSink> = Arc::new(MemorySink::new());
            (sink, None)
        }
    };

    let mut module = ForecastModule::new(
        config.module.clone(),
        options,
        fetcher,
        sink,
        Arc::new(TracingNotifier),
    )
    .context("invalid weather module configuration")?;
    module.start();

    let cancel = CancellationToken::new();
    let mut mqtt_handle = match (mqtt_parts, module.refresh_handle()) {
        (Some((eventloop, client, prefix)), Some(refresh)) => {
            let topic = mqtt::refresh_topic(&prefix, &config.module.instance_id);
            Some(tokio::spawn(mqtt::run_event_loop(
                eventloop,
                client,
                topic,
                refresh,
                cancel.clone(),
            )))
        }
        _ => None,
    };

    let mqtt_exited = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            false
        }
        res = async {
            match mqtt_handle.as_mut() {
                Some(handle) => handle.await,
                None => future::pending().await,
            }
        } => {
            if let Err(err) = res {
                tracing::warn!(error = %err, "MQTT task failed");
            }
            true
        }
    };

    module.stop().await;
    cancel.cancel();
    if let Some(handle) = mqtt_handle.filter(|_| !mqtt_exited) {
        if let Err(err) = handle.await {
            tracing::warn!(error = %err, "MQTT task failed during shutdown");
        }
    }

    Ok(())
}
