//! Typed views over the upstream forecast payload.
//!
//! Only the fields the pipeline consumes are extracted. Every field is
//! optional here; deciding which absences are fatal for which sink is left to
//! the normalization step, so one malformed field never poisons the whole run.

use crate::error::{DataShapeError, TransportError};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawObservation {
    pub temperature: Option<f64>,
    pub apparent_temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub dew_point: Option<f64>,
    pub ozone: Option<f64>,
    pub cloud_cover: Option<f64>,
    pub precip_probability: Option<f64>,
    pub precip_intensity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_bearing: Option<f64>,
    pub pressure: Option<f64>,
    pub icon: Option<String>,
    pub summary: Option<String>,
}

impl RawObservation {
    pub fn from_json(value: &JsonValue) -> Self {
        Self {
            temperature: number(value, "temperature"),
            apparent_temperature: number(value, "apparentTemperature"),
            humidity: number(value, "humidity"),
            dew_point: number(value, "dewPoint"),
            ozone: number(value, "ozone"),
            cloud_cover: number(value, "cloudCover"),
            precip_probability: number(value, "precipProbability"),
            precip_intensity: number(value, "precipIntensity"),
            wind_speed: number(value, "windSpeed"),
            wind_bearing: number(value, "windBearing"),
            pressure: number(value, "pressure"),
            icon: text(value, "icon"),
            summary: text(value, "summary"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDailyForecast {
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    pub icon: Option<String>,
    pub summary: Option<String>,
    pub precip_probability: Option<f64>,
    pub precip_intensity: Option<f64>,
}

impl RawDailyForecast {
    pub fn from_json(value: &JsonValue) -> Self {
        Self {
            temperature_min: number(value, "temperatureMin"),
            temperature_max: number(value, "temperatureMax"),
            icon: text(value, "icon"),
            summary: text(value, "summary"),
            precip_probability: number(value, "precipProbability"),
            precip_intensity: number(value, "precipIntensity"),
        }
    }
}

/// One decoded fetch result. Raw sections are kept for passthrough metrics.
#[derive(Debug, Clone)]
pub struct ForecastResponse {
    pub currently: RawObservation,
    pub daily: Vec<RawDailyForecast>,
    pub raw_currently: JsonValue,
    pub raw_daily: JsonValue,
    pub raw_hourly: JsonValue,
}

impl ForecastResponse {
    pub fn parse(body: &str) -> Result<Self, TransportError> {
        let value: JsonValue = serde_json::from_str(body)?;
        Self::from_json(value)
    }

    pub fn from_json(mut value: JsonValue) -> Result<Self, TransportError> {
        let Some(root) = value.as_object_mut() else {
            return Err(TransportError::NotAnObject);
        };
        let raw_currently = root.remove("currently").unwrap_or(JsonValue::Null);
        let raw_daily = root.remove("daily").unwrap_or(JsonValue::Null);
        let raw_hourly = root.remove("hourly").unwrap_or(JsonValue::Null);

        let currently = RawObservation::from_json(&raw_currently);
        let daily = raw_daily
            .get("data")
            .and_then(JsonValue::as_array)
            .map(|days| days.iter().map(RawDailyForecast::from_json).collect())
            .unwrap_or_default();

        Ok(Self {
            currently,
            daily,
            raw_currently,
            raw_daily,
            raw_hourly,
        })
    }

    pub fn day(&self, index: usize) -> Result<&RawDailyForecast, DataShapeError> {
        self.daily
            .get(index)
            .ok_or(DataShapeError::MissingDay { day: index })
    }
}

pub fn require(value: Option<f64>, field: &'static str) -> Result<f64, DataShapeError> {
    value.ok_or(DataShapeError::MissingField { field })
}

pub fn require_text<'a>(
    value: Option<&'a String>,
    field: &'static str,
) -> Result<&'a str, DataShapeError> {
    value
        .map(String::as_str)
        .ok_or(DataShapeError::MissingText { field })
}

fn number(value: &JsonValue, key: &str) -> Option<f64> {
    value
        .get(key)
        .and_then(JsonValue::as_f64)
        .filter(|v| v.is_finite())
}

fn text(value: &JsonValue, key: &str) -> Option<String> {
    value.get(key).and_then(JsonValue::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_extracts_current_and_daily_sections() {
        let body = json!({
            "currently": {
                "temperature": 50.0,
                "humidity": 0.8,
                "windSpeed": 5,
                "icon": "rain",
                "pressure": "1013"
            },
            "daily": { "data": [
                { "temperatureMin": 40.1, "temperatureMax": 55.3, "icon": "clear-day" },
                { "temperatureMin": 38.0, "temperatureMax": 51.0 }
            ]},
            "hourly": { "summary": "Rain later" }
        })
        .to_string();

        let parsed = ForecastResponse::parse(&body).expect("parsed");
        assert_eq!(parsed.currently.temperature, Some(50.0));
        assert_eq!(parsed.currently.wind_speed, Some(5.0));
        assert_eq!(parsed.currently.icon.as_deref(), Some("rain"));
        // strings are not coerced into numbers
        assert_eq!(parsed.currently.pressure, None);
        assert_eq!(parsed.daily.len(), 2);
        assert_eq!(parsed.day(0).unwrap().temperature_max, Some(55.3));
        assert_eq!(parsed.raw_hourly["summary"], "Rain later");
        assert_eq!(
            parsed.day(2).unwrap_err(),
            DataShapeError::MissingDay { day: 2 }
        );
    }

    #[test]
    fn missing_sections_decode_to_empty_views() {
        let parsed = ForecastResponse::parse("{}").expect("parsed");
        assert_eq!(parsed.currently, RawObservation::default());
        assert!(parsed.daily.is_empty());
        assert!(parsed.raw_currently.is_null());
    }

    #[test]
    fn non_object_bodies_are_rejected() {
        assert!(matches!(
            ForecastResponse::parse("[1,2,3]"),
            Err(TransportError::NotAnObject)
        ));
        assert!(matches!(
            ForecastResponse::parse("<html>"),
            Err(TransportError::Decode(_))
        ));
    }

    #[test]
    fn require_names_the_missing_field() {
        assert_eq!(require(Some(1.5), "currently.pressure").unwrap(), 1.5);
        assert_eq!(
            require(None, "currently.pressure").unwrap_err(),
            DataShapeError::MissingField {
                field: "currently.pressure"
            }
        );
    }
}
