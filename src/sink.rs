use crate::units::UnitContext;
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Mutex;

const DEVICE_PREFIX: &str = "ForecastIO";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SinkId {
    Current,
    Forecast,
    Humidity,
    Wind,
    Barometer,
    CloudCover,
    ForecastLow,
    ForecastHigh,
}

impl SinkId {
    /// Pipeline order; every run publishes in this sequence.
    pub const ALL: [SinkId; 8] = [
        SinkId::Current,
        SinkId::Forecast,
        SinkId::Humidity,
        SinkId::Wind,
        SinkId::Barometer,
        SinkId::CloudCover,
        SinkId::ForecastLow,
        SinkId::ForecastHigh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Forecast => "forecast",
            Self::Humidity => "humidity",
            Self::Wind => "wind",
            Self::Barometer => "barometer",
            Self::CloudCover => "cloudcover",
            Self::ForecastLow => "forecastLow",
            Self::ForecastHigh => "forecastHigh",
        }
    }

    pub fn enabled_by_default(&self) -> bool {
        !matches!(
            self,
            Self::Barometer | Self::CloudCover | Self::ForecastLow | Self::ForecastHigh
        )
    }

    /// Registry id of this sink for one module instance.
    pub fn device_id(&self, instance: &str) -> String {
        format!("{DEVICE_PREFIX}_{}_{instance}", self.as_str())
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static presentation data written once when a sink is created.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkDisplay {
    pub probe_title: &'static str,
    pub title: &'static str,
    pub scale_title: &'static str,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    enabled: BTreeMap<SinkId, bool>,
    icon_base: String,
}

impl SinkConfig {
    pub fn new(overrides: &BTreeMap<SinkId, bool>, icon_base: impl Into<String>) -> Self {
        let enabled = SinkId::ALL
            .iter()
            .map(|id| {
                let flag = overrides
                    .get(id)
                    .copied()
                    .unwrap_or_else(|| id.enabled_by_default());
                (*id, flag)
            })
            .collect();
        Self {
            enabled,
            icon_base: icon_base.into(),
        }
    }

    pub fn is_enabled(&self, id: SinkId) -> bool {
        self.enabled.get(&id).copied().unwrap_or(false)
    }

    pub fn enabled(&self) -> impl Iterator<Item = SinkId> + '_ {
        SinkId::ALL.into_iter().filter(|id| self.is_enabled(*id))
    }

    pub fn icon_path(&self, name: &str) -> String {
        format!("{}{name}.png", self.icon_base)
    }

    pub fn display(&self, id: SinkId, units: &UnitContext) -> SinkDisplay {
        let (probe_title, title, scale_title, icon) = match id {
            SinkId::Current => (
                "weather_current",
                "Current weather",
                units.temperature_label(),
                None,
            ),
            SinkId::Forecast => (
                "weather_forecast",
                "Weather forecast",
                units.temperature_label(),
                None,
            ),
            SinkId::Humidity => ("humidity", "Humidity", "%", Some("humidity")),
            SinkId::Wind => ("wind", "Wind", units.speed_label(), None),
            SinkId::Barometer => (
                "barometer",
                "Barometer",
                units.pressure_label(),
                Some("barometer"),
            ),
            SinkId::CloudCover => ("cloudcover", "Cloud cover", "%", None),
            SinkId::ForecastLow => (
                "temperature",
                "Forecast low",
                units.temperature_label(),
                Some("temperature"),
            ),
            SinkId::ForecastHigh => (
                "temperature",
                "Forecast high",
                units.temperature_label(),
                Some("temperature"),
            ),
        };
        SinkDisplay {
            probe_title,
            title,
            scale_title,
            icon: icon.map(|name| self.icon_path(name)),
        }
    }
}

/// Key/value updates produced for one sink during one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    pub sink: SinkId,
    pub metrics: Vec<(&'static str, JsonValue)>,
}

impl MetricSnapshot {
    pub fn new(sink: SinkId) -> Self {
        Self {
            sink,
            metrics: Vec::new(),
        }
    }

    pub fn set(&mut self, key: &'static str, value: impl Into<JsonValue>) {
        let value = value.into();
        if let Some(slot) = self.metrics.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.metrics.push((key, value));
        }
    }

    pub fn set_opt<T: Into<JsonValue>>(&mut self, key: &'static str, value: Option<T>) {
        if let Some(value) = value {
            self.set(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.metrics
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, value)| value)
    }

    pub fn level(&self) -> Option<&JsonValue> {
        self.get("level")
    }
}

/// Destination for published metrics; the registry owns persistence.
pub trait PublishSink: Send + Sync {
    fn upsert_metric(&self, sink_id: &str, key: &str, value: JsonValue);

    fn remove_sink(&self, sink_id: &str);

    /// Reads back a previously stored metric, if the sink keeps any.
    fn metric(&self, sink_id: &str, key: &str) -> Option<JsonValue>;
}

pub fn publish_display(sink: &dyn PublishSink, device_id: &str, display: &SinkDisplay) {
    sink.upsert_metric(device_id, "probeTitle", json!(display.probe_title));
    sink.upsert_metric(device_id, "title", json!(display.title));
    sink.upsert_metric(device_id, "scaleTitle", json!(display.scale_title));
    if let Some(icon) = &display.icon {
        sink.upsert_metric(device_id, "icon", json!(icon));
    }
}

pub fn publish_snapshot(sink: &dyn PublishSink, device_id: &str, snapshot: &MetricSnapshot) {
    for (key, value) in &snapshot.metrics {
        sink.upsert_metric(device_id, key, value.clone());
    }
}

/// In-process metric store.
#[derive(Debug, Default)]
pub struct MemorySink {
    devices: Mutex<HashMap<String, BTreeMap<String, JsonValue>>>,
    upserts: Mutex<Vec<(String, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(&self, sink_id: &str) -> Option<BTreeMap<String, JsonValue>> {
        self.devices
            .lock()
            .ok()
            .and_then(|guard| guard.get(sink_id).cloned())
    }

    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .devices
            .lock()
            .map(|guard| guard.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Every `(sink_id, key)` upserted so far, in call order.
    pub fn upserts(&self) -> Vec<(String, String)> {
        self.upserts
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl PublishSink for MemorySink {
    fn upsert_metric(&self, sink_id: &str, key: &str, value: JsonValue) {
        if let Ok(mut guard) = self.devices.lock() {
            guard
                .entry(sink_id.to_string())
                .or_default()
                .insert(key.to_string(), value);
        }
        if let Ok(mut guard) = self.upserts.lock() {
            guard.push((sink_id.to_string(), key.to_string()));
        }
    }

    fn remove_sink(&self, sink_id: &str) {
        if let Ok(mut guard) = self.devices.lock() {
            guard.remove(sink_id);
        }
    }

    fn metric(&self, sink_id: &str, key: &str) -> Option<JsonValue> {
        self.devices
            .lock()
            .ok()
            .and_then(|guard| guard.get(sink_id).and_then(|m| m.get(key).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{TemperatureUnit, UnitSystem};

    #[test]
    fn default_flags_enable_the_first_four_sinks() {
        let config = SinkConfig::new(&BTreeMap::new(), "/icons/");
        let enabled: Vec<SinkId> = config.enabled().collect();
        assert_eq!(
            enabled,
            vec![
                SinkId::Current,
                SinkId::Forecast,
                SinkId::Humidity,
                SinkId::Wind
            ]
        );
        assert!(!config.is_enabled(SinkId::Barometer));
    }

    #[test]
    fn overrides_replace_defaults() {
        let overrides = BTreeMap::from([(SinkId::Wind, false), (SinkId::CloudCover, true)]);
        let config = SinkConfig::new(&overrides, "/icons/");
        assert!(!config.is_enabled(SinkId::Wind));
        assert!(config.is_enabled(SinkId::CloudCover));
        assert!(!config.is_enabled(SinkId::ForecastHigh));
    }

    #[test]
    fn display_labels_follow_unit_context() {
        let config = SinkConfig::new(&BTreeMap::new(), "/icons/");
        let imperial = UnitContext::new(UnitSystem::Imperial, TemperatureUnit::Fahrenheit);
        let metric = UnitContext::new(UnitSystem::Metric, TemperatureUnit::Celsius);

        assert_eq!(config.display(SinkId::Current, &imperial).scale_title, "°F");
        assert_eq!(config.display(SinkId::Wind, &metric).scale_title, "km/h");
        let barometer = config.display(SinkId::Barometer, &imperial);
        assert_eq!(barometer.scale_title, "inHg");
        assert_eq!(barometer.icon.as_deref(), Some("/icons/barometer.png"));
    }

    #[test]
    fn device_ids_are_scoped_by_instance() {
        assert_eq!(SinkId::Wind.device_id("7"), "ForecastIO_wind_7");
        assert_eq!(SinkId::ForecastLow.device_id("a"), "ForecastIO_forecastLow_a");
    }

    #[test]
    fn snapshot_set_overwrites_existing_keys() {
        let mut snapshot = MetricSnapshot::new(SinkId::Humidity);
        snapshot.set("level", 10.0);
        snapshot.set("level", 80.0);
        snapshot.set_opt::<f64>("missing", None);
        assert_eq!(snapshot.metrics.len(), 1);
        assert_eq!(snapshot.level(), Some(&json!(80.0)));
    }

    #[test]
    fn memory_sink_stores_and_removes() {
        let sink = MemorySink::new();
        sink.upsert_metric("dev", "level", json!(3));
        assert_eq!(sink.metric("dev", "level"), Some(json!(3)));
        sink.remove_sink("dev");
        assert_eq!(sink.metric("dev", "level"), None);
        assert!(sink.device_ids().is_empty());
        assert_eq!(sink.upserts().len(), 1);
    }
}
