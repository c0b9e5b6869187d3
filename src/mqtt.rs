use crate::config::MqttConfig;
use crate::scheduler::RefreshHandle;
use crate::sink::{MemorySink, PublishSink};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use serde_json::Value as JsonValue;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

const REQUEST_CAPACITY: usize = 256;
/// Upper bound on waiting for the broker to replay a retained metric.
pub const RETAINED_LOAD_TIMEOUT: Duration = Duration::from_secs(3);

pub fn metric_topic(prefix: &str, device_id: &str, key: &str) -> String {
    format!("{prefix}/{device_id}/{key}")
}

pub fn refresh_topic(prefix: &str, instance_id: &str) -> String {
    format!("{prefix}/{instance_id}/refresh")
}

fn encode_value(value: &JsonValue) -> Vec<u8> {
    match value {
        JsonValue::String(s) => s.clone().into_bytes(),
        other => other.to_string().into_bytes(),
    }
}

fn decode_value(payload: &[u8]) -> Option<JsonValue> {
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_slice(payload) {
        Ok(value) => Some(value),
        Err(_) => std::str::from_utf8(payload)
            .ok()
            .map(|text| JsonValue::String(text.to_string())),
    }
}

/// Publishes every metric as a retained message and keeps a local copy so
/// the module can read its last values back.
pub struct MqttSink {
    client: AsyncClient,
    prefix: String,
    cache: MemorySink,
}

impl MqttSink {
    pub fn new(config: &MqttConfig) -> (Self, EventLoop) {
        let mut options = MqttOptions::new(
            config.client_id.clone(),
            config.host.clone(),
            config.port,
        );
        options.set_keep_alive(config.keepalive());
        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
        }
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let sink = Self {
            client,
            prefix: config.topic_prefix.clone(),
            cache: MemorySink::new(),
        };
        (sink, eventloop)
    }

    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    /// Stores a retained message from the broker in the local cache.
    /// Returns false for foreign topics and cleared (empty) payloads.
    pub fn absorb_retained(&self, topic: &str, payload: &[u8]) -> bool {
        let Some(rest) = topic
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            return false;
        };
        let Some((device_id, key)) = rest.rsplit_once('/') else {
            return false;
        };
        let Some(value) = decode_value(payload) else {
            return false;
        };
        self.cache.upsert_metric(device_id, key, value);
        true
    }

    /// Subscribes to one retained metric and waits up to `wait` for the
    /// broker to replay it, so values from a previous run are readable
    /// through [`PublishSink::metric`]. Must run before the event loop is
    /// handed to [`run_event_loop`].
    pub async fn load_retained(
        &self,
        eventloop: &mut EventLoop,
        device_id: &str,
        key: &str,
        wait: Duration,
    ) -> bool {
        let topic = metric_topic(&self.prefix, device_id, key);
        if let Err(err) = self.client.subscribe(topic.clone(), QoS::AtLeastOnce).await {
            tracing::warn!(topic = %topic, error = %err, "failed to subscribe to retained metric");
            return false;
        }

        let replay = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::Publish(publish))) if publish.topic == topic => {
                        return self.absorb_retained(&publish.topic, publish.payload.as_ref());
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "MQTT unavailable while loading retained metric");
                        return false;
                    }
                }
            }
        };
        let loaded = match tokio::time::timeout(wait, replay).await {
            Ok(loaded) => loaded,
            Err(_) => {
                tracing::debug!(topic = %topic, "no retained value replayed");
                false
            }
        };

        if let Err(err) = self.client.try_unsubscribe(topic.clone()) {
            tracing::debug!(topic = %topic, error = %err, "failed to unsubscribe from retained metric");
        }
        tracing::info!(topic = %topic, loaded, "checked broker for previous value");
        loaded
    }

    fn publish(&self, topic: String, payload: Vec<u8>) {
        if let Err(err) = self.client.try_publish(topic.clone(), QoS::AtLeastOnce, true, payload) {
            tracing::warn!(topic = %topic, error = %err, "failed to queue MQTT publish");
        }
    }
}

impl PublishSink for MqttSink {
    fn upsert_metric(&self, sink_id: &str, key: &str, value: JsonValue) {
        let topic = metric_topic(&self.prefix, sink_id, key);
        self.publish(topic, encode_value(&value));
        self.cache.upsert_metric(sink_id, key, value);
    }

    fn remove_sink(&self, sink_id: &str) {
        if let Some(metrics) = self.cache.device(sink_id) {
            // an empty retained payload clears the broker's copy
            for key in metrics.keys() {
                self.publish(metric_topic(&self.prefix, sink_id, key), Vec::new());
            }
        }
        self.cache.remove_sink(sink_id);
    }

    fn metric(&self, sink_id: &str, key: &str) -> Option<JsonValue> {
        self.cache.metric(sink_id, key)
    }
}

/// Drives the MQTT connection and turns messages on the refresh topic into
/// refresh requests. Resubscribes after every reconnect until cancelled.
pub async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    refresh_topic: String,
    refresh: RefreshHandle,
    cancel: CancellationToken,
) {
    // The first ConnAck may already have been consumed by `load_retained`.
    if let Err(err) = client.try_subscribe(refresh_topic.clone(), QoS::AtLeastOnce) {
        tracing::warn!(error = %err, "failed to subscribe to refresh requests");
    }
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };
        match event {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                match client.try_subscribe(refresh_topic.clone(), QoS::AtLeastOnce) {
                    Ok(()) => tracing::info!(topic = %refresh_topic, "subscribed to refresh requests"),
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to subscribe to refresh requests")
                    }
                }
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                if publish.topic == refresh_topic {
                    tracing::debug!(topic = %publish.topic, "refresh requested over MQTT");
                    refresh.request();
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "MQTT connection dropped; reconnecting");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(Duration::from_secs(1)) => {}
                }
            }
        }
    }

    // Flush queued removals before leaving.
    if let Err(err) = client.try_disconnect() {
        tracing::debug!(error = %err, "MQTT disconnect request failed");
    }
    let drain = async {
        while let Ok(event) = eventloop.poll().await {
            if matches!(event, Event::Outgoing(rumqttc::Outgoing::Disconnect)) {
                break;
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(2), drain).await.is_err() {
        tracing::debug!("timed out flushing MQTT queue on shutdown");
    }
}
