use crate::error::ConfigError;
use crate::sink::SinkId;
use crate::units::{TemperatureUnit, UnitContext, UnitSystem};
use anyhow::{Context, Result};
use dotenvy::dotenv;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_SETUP_CONFIG_PATH: &str = "/etc/forecastio/config.json";
const DEFAULT_API_BASE_URL: &str = "https://api.forecast.io";
const DEFAULT_ICON_BASE: &str = "/ZAutomation/api/v1/load/modulemedia/ForecastIO/";
/// One week; longer intervals make the stale check meaningless.
pub const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

/// Env var names paired with the setup-file keys that may stand in for them.
const KEY_API_KEY: (&str, &str) = ("FORECASTIO_API_KEY", "apiKey");
const KEY_LATITUDE: (&str, &str) = ("FORECASTIO_LATITUDE", "latitude");
const KEY_LONGITUDE: (&str, &str) = ("FORECASTIO_LONGITUDE", "longitude");
const KEY_UNIT_SYSTEM: (&str, &str) = ("FORECASTIO_UNIT_SYSTEM", "unitSystem");
const KEY_UNIT_TEMPERATURE: (&str, &str) = ("FORECASTIO_UNIT_TEMPERATURE", "unitTemperature");
const KEY_INTERVAL: (&str, &str) = ("FORECASTIO_INTERVAL_MINUTES", "interval");
const KEY_LANGUAGE: (&str, &str) = ("FORECASTIO_LANGUAGE", "language");
const KEY_INSTANCE: (&str, &str) = ("FORECASTIO_INSTANCE_ID", "instanceId");

fn setup_config_path() -> PathBuf {
    if let Ok(path) = env::var("FORECASTIO_SETUP_CONFIG_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    PathBuf::from(DEFAULT_SETUP_CONFIG_PATH)
}

fn load_setup_config_overrides() -> Option<HashMap<String, JsonValue>> {
    let path = setup_config_path();
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "forecastio-sidecar failed to read setup config; using env only"
            );
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "forecastio-sidecar failed to parse setup config; using env only"
            );
            None
        }
    }
}

/// Layered lookup: a non-empty env var wins, then the setup file.
pub struct Settings<'a> {
    env: &'a dyn Fn(&str) -> Option<String>,
    file: Option<&'a HashMap<String, JsonValue>>,
}

impl<'a> Settings<'a> {
    pub fn new(
        env: &'a dyn Fn(&str) -> Option<String>,
        file: Option<&'a HashMap<String, JsonValue>>,
    ) -> Self {
        Self { env, file }
    }

    fn env(&self, key: &str) -> Option<String> {
        (self.env)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn get(&self, (env_key, file_key): (&str, &str)) -> Option<String> {
        self.env(env_key).or_else(|| {
            let value = self.file?.get(file_key)?;
            match value {
                JsonValue::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
                JsonValue::Number(n) => Some(n.to_string()),
                JsonValue::Bool(b) => Some(b.to_string()),
                _ => None,
            }
        })
    }
}

/// Inbound configuration of one weather module instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleConfig {
    pub instance_id: String,
    pub api_key: String,
    pub latitude: f64,
    pub longitude: f64,
    pub units: UnitContext,
    pub interval_minutes: u64,
    pub language: String,
    pub sinks: BTreeMap<SinkId, bool>,
}

impl ModuleConfig {
    pub fn from_settings(settings: &Settings<'_>) -> Result<Self, ConfigError> {
        let api_key = settings
            .get(KEY_API_KEY)
            .ok_or(ConfigError::Missing(KEY_API_KEY.0))?;
        let latitude: f64 = required_parse(settings, KEY_LATITUDE)?;
        let longitude: f64 = required_parse(settings, KEY_LONGITUDE)?;
        let unit_system = optional_parse(settings, KEY_UNIT_SYSTEM)?.unwrap_or(UnitSystem::Metric);
        let temperature_unit =
            optional_parse(settings, KEY_UNIT_TEMPERATURE)?.unwrap_or(TemperatureUnit::Celsius);
        let interval_minutes: u64 = optional_parse(settings, KEY_INTERVAL)?.unwrap_or(15);
        let language = settings
            .get(KEY_LANGUAGE)
            .unwrap_or_else(|| "en".to_string());
        let instance_id = settings
            .get(KEY_INSTANCE)
            .unwrap_or_else(|| "1".to_string());

        let mut sinks = BTreeMap::new();
        for sink in SinkId::ALL {
            if matches!(sink, SinkId::Current | SinkId::Forecast) {
                continue;
            }
            if let Some(flag) = parse_sink_flag(settings, sink)? {
                sinks.insert(sink, flag);
            }
        }

        let config = Self {
            instance_id,
            api_key,
            latitude,
            longitude,
            units: UnitContext::new(unit_system, temperature_unit),
            interval_minutes,
            language,
            sinks,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Missing(KEY_API_KEY.0));
        }
        if self.instance_id.trim().is_empty() {
            return Err(ConfigError::Missing(KEY_INSTANCE.0));
        }
        if self.language.trim().is_empty() {
            return Err(ConfigError::Missing(KEY_LANGUAGE.0));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(invalid(KEY_LATITUDE.0, "must be within -90..=90"));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(invalid(KEY_LONGITUDE.0, "must be within -180..=180"));
        }
        if self.interval_minutes == 0 {
            return Err(invalid(KEY_INTERVAL.0, "must be at least one minute"));
        }
        if self.interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(invalid(
                KEY_INTERVAL.0,
                format!("must be at most {MAX_INTERVAL_MINUTES} minutes"),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.min(MAX_INTERVAL_MINUTES) * 60)
    }
}

fn parse_sink_flag(settings: &Settings<'_>, sink: SinkId) -> Result<Option<bool>, ConfigError> {
    let env_key = format!("FORECASTIO_{}_DEVICE", sink.as_str().to_ascii_uppercase());
    let file_key = format!("{}_device", sink.as_str());
    let Some(raw) = settings.get((env_key.as_str(), file_key.as_str())) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::Invalid {
            key: "FORECASTIO_<SINK>_DEVICE",
            reason: format!("{env_key}={raw} is not a boolean"),
        }),
    }
}

fn required_parse<T>(settings: &Settings<'_>, key: (&'static str, &str)) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_parse(settings, key)?.ok_or(ConfigError::Missing(key.0))
}

fn optional_parse<T>(
    settings: &Settings<'_>,
    key: (&'static str, &str),
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    settings
        .get(key)
        .map(|raw| raw.parse::<T>().map_err(|err| invalid(key.0, err)))
        .transpose()
}

fn invalid(key: &'static str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}

#[derive(Clone, Debug)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub client_id: String,
    pub keepalive_secs: u64,
}

impl MqttConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub module: ModuleConfig,
    pub api_base_url: String,
    pub http_timeout_secs: u64,
    pub icon_base: String,
    pub mqtt: Option<MqttConfig>,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let setup_overrides = load_setup_config_overrides();
        let lookup = |key: &str| env::var(key).ok();
        let settings = Settings::new(&lookup, setup_overrides.as_ref());
        Self::from_settings(&settings).context("invalid forecastio-sidecar configuration")
    }

    pub fn from_settings(settings: &Settings<'_>) -> Result<Self, ConfigError> {
        let module = ModuleConfig::from_settings(settings)?;

        let api_base_url = settings
            .env("FORECASTIO_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let http_timeout_secs = env_parse(settings, "FORECASTIO_HTTP_TIMEOUT_SECS")?.unwrap_or(12);
        let icon_base = settings
            .env("FORECASTIO_ICON_BASE")
            .unwrap_or_else(|| DEFAULT_ICON_BASE.to_string());

        let mqtt = match settings.env("FORECASTIO_MQTT_HOST") {
            Some(host) => Some(MqttConfig {
                host,
                port: env_parse(settings, "FORECASTIO_MQTT_PORT")?.unwrap_or(1883),
                username: settings.env("FORECASTIO_MQTT_USERNAME"),
                password: settings.env("FORECASTIO_MQTT_PASSWORD"),
                topic_prefix: settings
                    .env("FORECASTIO_MQTT_TOPIC_PREFIX")
                    .unwrap_or_else(|| "forecastio".to_string()),
                client_id: settings
                    .env("FORECASTIO_MQTT_CLIENT_ID")
                    .unwrap_or_else(|| format!("forecastio-sidecar-{}", std::process::id())),
                keepalive_secs: env_parse(settings, "FORECASTIO_MQTT_KEEPALIVE_SECS")?
                    .unwrap_or(30),
            }),
            None => None,
        };
        let otlp_endpoint = settings.env("OTEL_EXPORTER_OTLP_ENDPOINT");

        Ok(Self {
            module,
            api_base_url,
            http_timeout_secs,
            icon_base,
            mqtt,
            otlp_endpoint,
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn env_parse<T>(settings: &Settings<'_>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    settings
        .env(key)
        .map(|raw| raw.parse::<T>().map_err(|err| invalid(key, err)))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn module_from(
        env: &HashMap<String, String>,
        file: Option<&HashMap<String, JsonValue>>,
    ) -> Result<ModuleConfig, ConfigError> {
        let lookup = |key: &str| env.get(key).cloned();
        ModuleConfig::from_settings(&Settings::new(&lookup, file))
    }

    #[test]
    fn minimal_env_uses_defaults() {
        let env = env_of(&[
            ("FORECASTIO_API_KEY", "secret"),
            ("FORECASTIO_LATITUDE", "48.2"),
            ("FORECASTIO_LONGITUDE", "16.37"),
        ]);
        let config = module_from(&env, None).expect("config");
        assert_eq!(config.api_key, "secret");
        assert_eq!(config.units.unit_system, UnitSystem::Metric);
        assert_eq!(config.units.temperature_unit, TemperatureUnit::Celsius);
        assert_eq!(config.interval(), Duration::from_secs(15 * 60));
        assert_eq!(config.language, "en");
        assert_eq!(config.instance_id, "1");
        assert!(config.sinks.is_empty());
    }

    #[test]
    fn missing_or_blank_api_key_is_rejected() {
        let env = env_of(&[
            ("FORECASTIO_API_KEY", "   "),
            ("FORECASTIO_LATITUDE", "1"),
            ("FORECASTIO_LONGITUDE", "2"),
        ]);
        assert_eq!(
            module_from(&env, None).unwrap_err(),
            ConfigError::Missing("FORECASTIO_API_KEY")
        );
    }

    #[test]
    fn malformed_values_fail_construction() {
        let base = [
            ("FORECASTIO_API_KEY", "k"),
            ("FORECASTIO_LATITUDE", "1"),
            ("FORECASTIO_LONGITUDE", "2"),
        ];
        for (key, value) in [
            ("FORECASTIO_LATITUDE", "north"),
            ("FORECASTIO_LATITUDE", "91"),
            ("FORECASTIO_UNIT_SYSTEM", "nautical"),
            ("FORECASTIO_INTERVAL_MINUTES", "0"),
            ("FORECASTIO_INTERVAL_MINUTES", "10081"),
            ("FORECASTIO_INTERVAL_MINUTES", "18446744073709551615"),
            ("FORECASTIO_WIND_DEVICE", "maybe"),
        ] {
            let mut env = env_of(&base);
            env.insert(key.to_string(), value.to_string());
            assert!(
                matches!(module_from(&env, None), Err(ConfigError::Invalid { .. })),
                "{key}={value} should be invalid"
            );
        }
    }

    #[test]
    fn longest_allowed_interval_is_accepted() {
        let env = env_of(&[
            ("FORECASTIO_API_KEY", "k"),
            ("FORECASTIO_LATITUDE", "1"),
            ("FORECASTIO_LONGITUDE", "2"),
            ("FORECASTIO_INTERVAL_MINUTES", "10080"),
        ]);
        let config = module_from(&env, None).expect("config");
        assert_eq!(config.interval(), Duration::from_secs(7 * 24 * 3600));
    }

    #[test]
    fn setup_file_fills_gaps_and_env_wins() {
        let file: HashMap<String, JsonValue> = serde_json::from_value(json!({
            "apiKey": "from-file",
            "latitude": 40.7,
            "longitude": -74.0,
            "unitSystem": "imperial",
            "unitTemperature": "fahrenheit",
            "interval": 30,
            "cloudcover_device": true,
            "humidity_device": false
        }))
        .unwrap();
        let env = env_of(&[("FORECASTIO_API_KEY", "from-env")]);

        let config = module_from(&env, Some(&file)).expect("config");
        assert_eq!(config.api_key, "from-env");
        assert_eq!(config.latitude, 40.7);
        assert_eq!(config.longitude, -74.0);
        assert_eq!(config.units.unit_system, UnitSystem::Imperial);
        assert_eq!(config.interval_minutes, 30);
        assert_eq!(config.sinks.get(&SinkId::CloudCover), Some(&true));
        assert_eq!(config.sinks.get(&SinkId::Humidity), Some(&false));
    }

    #[test]
    fn setup_file_can_be_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"apiKey":"k","latitude":"1.5","longitude":"2.5","forecastHigh_device":"on"}"#,
        )
        .unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let file: HashMap<String, JsonValue> = serde_json::from_str(&contents).unwrap();

        let config = module_from(&HashMap::new(), Some(&file)).expect("config");
        assert_eq!(config.latitude, 1.5);
        assert_eq!(config.sinks.get(&SinkId::ForecastHigh), Some(&true));
    }

    #[test]
    fn sidecar_settings_read_mqtt_block() {
        let env = env_of(&[
            ("FORECASTIO_API_KEY", "k"),
            ("FORECASTIO_LATITUDE", "1"),
            ("FORECASTIO_LONGITUDE", "2"),
            ("FORECASTIO_MQTT_HOST", "broker.local"),
            ("FORECASTIO_MQTT_PORT", "1884"),
        ]);
        let lookup = |key: &str| env.get(key).cloned();
        let config = Config::from_settings(&Settings::new(&lookup, None)).expect("config");
        let mqtt = config.mqtt.as_ref().expect("mqtt");
        assert_eq!(mqtt.host, "broker.local");
        assert_eq!(mqtt.port, 1884);
        assert_eq!(mqtt.topic_prefix, "forecastio");
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.http_timeout(), Duration::from_secs(12));
    }
}
