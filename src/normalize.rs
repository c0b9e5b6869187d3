use crate::condition::classify_condition;
use crate::error::DataShapeError;
use crate::observation::{require, require_text, ForecastResponse, RawDailyForecast};
use crate::rolling::RollingWindows;
use crate::sink::{MetricSnapshot, SinkConfig, SinkId};
use crate::units::{percent, round_half_up, UnitContext};
use crate::wind::classify_wind;
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

const CLOUD_COVER_ICON_SPLIT: f64 = 0.5;
const TODAY: usize = 0;
const TOMORROW: usize = 1;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{sink} sink skipped: {error}")]
pub struct SinkFailure {
    pub sink: SinkId,
    pub error: DataShapeError,
}

pub type SinkOutcome = Result<MetricSnapshot, SinkFailure>;

/// Converted and individually rounded low/high for tomorrow.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ForecastRange {
    low: f64,
    high: f64,
}

/// Turns one decoded response into one outcome per enabled sink, in publish
/// order. A sink whose inputs are missing fails alone; the rest still run.
/// Rolling windows only advance for sinks that produced a snapshot.
pub fn normalize(
    response: &ForecastResponse,
    sinks: &SinkConfig,
    units: &UnitContext,
    windows: &mut RollingWindows,
    now: DateTime<Utc>,
) -> Vec<SinkOutcome> {
    let range = response
        .day(TOMORROW)
        .and_then(|day| forecast_range(day, units));

    sinks
        .enabled()
        .map(|sink| {
            let result = match sink {
                SinkId::Current => current(response, sinks, units, windows, now),
                SinkId::Forecast => forecast(response, sinks, units, range.clone()),
                SinkId::Humidity => humidity(response),
                SinkId::Wind => wind(response, sinks, units, windows),
                SinkId::Barometer => barometer(response, units),
                SinkId::CloudCover => cloud_cover(response, sinks),
                SinkId::ForecastLow => range.clone().map(|r| level_only(sink, r.low)),
                SinkId::ForecastHigh => range.clone().map(|r| level_only(sink, r.high)),
            };
            result.map_err(|error| SinkFailure { sink, error })
        })
        .collect()
}

fn forecast_range(
    day: &RawDailyForecast,
    units: &UnitContext,
) -> Result<ForecastRange, DataShapeError> {
    let low = require(day.temperature_min, "daily.data[1].temperatureMin")?;
    let high = require(day.temperature_max, "daily.data[1].temperatureMax")?;
    Ok(ForecastRange {
        low: round_half_up(units.convert_temperature(low)),
        high: round_half_up(units.convert_temperature(high)),
    })
}

fn current(
    response: &ForecastResponse,
    sinks: &SinkConfig,
    units: &UnitContext,
    windows: &mut RollingWindows,
    now: DateTime<Utc>,
) -> Result<MetricSnapshot, DataShapeError> {
    let observed = &response.currently;
    let temperature =
        units.convert_temperature(require(observed.temperature, "currently.temperature")?);

    let mut snapshot = MetricSnapshot::new(SinkId::Current);
    snapshot.set("level", temperature);
    snapshot.set("temperature", temperature);
    if let Some(icon) = observed.icon.as_deref() {
        snapshot.set("icon", sinks.icon_path(icon));
        snapshot.set("condition", icon);
        snapshot.set("conditiongroup", classify_condition(icon).as_str());
    }
    snapshot.set_opt("pop", observed.precip_probability.map(percent));
    snapshot.set_opt(
        "feelslike",
        observed
            .apparent_temperature
            .map(|t| units.convert_temperature(t)),
    );
    snapshot.set_opt("ozone", observed.ozone);
    snapshot.set_opt("dewpoint", observed.dew_point);
    snapshot.set_opt(
        "intensity",
        observed
            .precip_intensity
            .map(|v| units.convert_precipitation(v)),
    );
    snapshot.set_opt("cloudcover", observed.cloud_cover.map(percent));
    snapshot.set_opt("weather", observed.summary.clone());
    if let Ok(today) = response.day(TODAY) {
        snapshot.set_opt(
            "low",
            today.temperature_min.map(|t| units.convert_temperature(t)),
        );
        snapshot.set_opt(
            "high",
            today.temperature_max.map(|t| units.convert_temperature(t)),
        );
    }
    snapshot.set("raw", response.raw_currently.clone());
    snapshot.set("timestamp", now.timestamp_millis());

    let history = windows.temperature.push(temperature);
    if let Some(trend) = windows.temperature.trend() {
        snapshot.set("trend", trend.as_str());
    }
    snapshot.set("temperature_list", history);
    Ok(snapshot)
}

fn forecast(
    response: &ForecastResponse,
    sinks: &SinkConfig,
    units: &UnitContext,
    range: Result<ForecastRange, DataShapeError>,
) -> Result<MetricSnapshot, DataShapeError> {
    let tomorrow = response.day(TOMORROW)?;
    let range = range?;
    let icon = require_text(tomorrow.icon.as_ref(), "daily.data[1].icon")?;

    let mut snapshot = MetricSnapshot::new(SinkId::Forecast);
    snapshot.set("conditiongroup", classify_condition(icon).as_str());
    snapshot.set("condition", icon);
    snapshot.set("level", format!("{} - {}", range.low, range.high));
    snapshot.set("icon", sinks.icon_path(icon));
    snapshot.set_opt("pop", tomorrow.precip_probability.map(percent));
    snapshot.set_opt(
        "intensity",
        tomorrow
            .precip_intensity
            .map(|v| units.convert_precipitation(v)),
    );
    snapshot.set_opt("weather", tomorrow.summary.clone());
    snapshot.set("low", range.low);
    snapshot.set("high", range.high);
    snapshot.set(
        "raw",
        json!({
            "daily": response.raw_daily,
            "hourly": response.raw_hourly,
        }),
    );
    Ok(snapshot)
}

fn humidity(response: &ForecastResponse) -> Result<MetricSnapshot, DataShapeError> {
    let fraction = require(response.currently.humidity, "currently.humidity")?;
    Ok(level_only(SinkId::Humidity, percent(fraction)))
}

fn wind(
    response: &ForecastResponse,
    sinks: &SinkConfig,
    units: &UnitContext,
    windows: &mut RollingWindows,
) -> Result<MetricSnapshot, DataShapeError> {
    let observed = &response.currently;
    let speed = require(observed.wind_speed, "currently.windSpeed")?;
    let scale = classify_wind(speed)?;
    let converted = units.convert_speed(speed);

    let history = windows.wind.push(converted);
    let average = windows.wind.average().unwrap_or(converted);

    let mut snapshot = MetricSnapshot::new(SinkId::Wind);
    snapshot.set("icon", sinks.icon_path(&format!("wind{}", scale.icon_bucket)));
    snapshot.set("level", average);
    snapshot.set("wind", converted);
    snapshot.set_opt("winddegrees", observed.wind_bearing);
    snapshot.set("windlevel", scale.beaufort);
    snapshot.set("wind_list", history);
    snapshot.set("wind_avg", average);
    Ok(snapshot)
}

fn barometer(
    response: &ForecastResponse,
    units: &UnitContext,
) -> Result<MetricSnapshot, DataShapeError> {
    let pressure = require(response.currently.pressure, "currently.pressure")?;
    Ok(level_only(SinkId::Barometer, units.convert_pressure(pressure)))
}

fn cloud_cover(
    response: &ForecastResponse,
    sinks: &SinkConfig,
) -> Result<MetricSnapshot, DataShapeError> {
    let fraction = require(response.currently.cloud_cover, "currently.cloudCover")?;
    let icon = if fraction < CLOUD_COVER_ICON_SPLIT {
        "clear-day"
    } else {
        "partly-cloudy-day"
    };

    let mut snapshot = level_only(SinkId::CloudCover, percent(fraction));
    snapshot.set("icon", sinks.icon_path(icon));
    Ok(snapshot)
}

fn level_only(sink: SinkId, level: f64) -> MetricSnapshot {
    let mut snapshot = MetricSnapshot::new(sink);
    snapshot.set("level", level);
    snapshot
}
