use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

const HPA_PER_INHG: f64 = 33.8638866667;
const METERS_PER_MILE: f64 = 1609.34;
const MM_PER_INCH: f64 = 25.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    Metric,
    Imperial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl FromStr for UnitSystem {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "metric" => Ok(Self::Metric),
            "imperial" => Ok(Self::Imperial),
            other => Err(format!("unknown unit system '{other}'")),
        }
    }
}

impl FromStr for TemperatureUnit {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "celsius" => Ok(Self::Celsius),
            "fahrenheit" => Ok(Self::Fahrenheit),
            other => Err(format!("unknown temperature unit '{other}'")),
        }
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metric => f.write_str("metric"),
            Self::Imperial => f.write_str("imperial"),
        }
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Celsius => f.write_str("celsius"),
            Self::Fahrenheit => f.write_str("fahrenheit"),
        }
    }
}

/// Display unit context every conversion is parameterized by.
///
/// Raw values arrive in the upstream canonical units: °F, m/s, hPa and
/// inches per hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitContext {
    pub unit_system: UnitSystem,
    pub temperature_unit: TemperatureUnit,
}

impl UnitContext {
    pub fn new(unit_system: UnitSystem, temperature_unit: TemperatureUnit) -> Self {
        Self {
            unit_system,
            temperature_unit,
        }
    }

    pub fn convert_temperature(&self, temp_f: f64) -> f64 {
        match self.temperature_unit {
            TemperatureUnit::Celsius => round_tenth((temp_f - 32.0) * 5.0 / 9.0),
            TemperatureUnit::Fahrenheit => temp_f,
        }
    }

    pub fn convert_pressure(&self, pressure_hpa: f64) -> f64 {
        match self.unit_system {
            UnitSystem::Metric => round_half_up(pressure_hpa),
            UnitSystem::Imperial => round_half_up(pressure_hpa / HPA_PER_INHG),
        }
    }

    pub fn convert_speed(&self, speed_ms: f64) -> f64 {
        match self.unit_system {
            UnitSystem::Metric => round_half_up(speed_ms * 3600.0 / 1000.0),
            UnitSystem::Imperial => round_half_up(speed_ms * 3600.0 / METERS_PER_MILE),
        }
    }

    pub fn convert_precipitation(&self, inch_per_hour: f64) -> f64 {
        match self.unit_system {
            UnitSystem::Metric => inch_per_hour * MM_PER_INCH,
            UnitSystem::Imperial => inch_per_hour,
        }
    }

    pub fn temperature_label(&self) -> &'static str {
        match self.temperature_unit {
            TemperatureUnit::Celsius => "°C",
            TemperatureUnit::Fahrenheit => "°F",
        }
    }

    pub fn speed_label(&self) -> &'static str {
        match self.unit_system {
            UnitSystem::Metric => "km/h",
            UnitSystem::Imperial => "mph",
        }
    }

    pub fn pressure_label(&self) -> &'static str {
        match self.unit_system {
            UnitSystem::Metric => "hPa",
            UnitSystem::Imperial => "inHg",
        }
    }
}

/// Rounds to the nearest integer with ties going toward positive infinity.
pub fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

pub fn round_tenth(value: f64) -> f64 {
    round_half_up(value * 10.0) / 10.0
}

/// Fraction in `0..=1` to a whole percentage.
pub fn percent(fraction: f64) -> f64 {
    round_half_up(fraction * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(system: UnitSystem, temp: TemperatureUnit) -> UnitContext {
        UnitContext::new(system, temp)
    }

    #[test]
    fn fahrenheit_passes_through() {
        let units = ctx(UnitSystem::Imperial, TemperatureUnit::Fahrenheit);
        for t in [-40.0, 0.0, 32.0, 50.5, 98.6, 120.25] {
            assert_eq!(units.convert_temperature(t), t);
        }
    }

    #[test]
    fn celsius_rounds_to_one_decimal() {
        let units = ctx(UnitSystem::Metric, TemperatureUnit::Celsius);
        assert_eq!(units.convert_temperature(32.0), 0.0);
        assert_eq!(units.convert_temperature(50.0), 10.0);
        assert_eq!(units.convert_temperature(212.0), 100.0);
        assert_eq!(units.convert_temperature(70.0), 21.1);
        assert_eq!(units.convert_temperature(-40.0), -40.0);
    }

    #[test]
    fn pressure_converts_to_inches_of_mercury() {
        assert_eq!(
            ctx(UnitSystem::Metric, TemperatureUnit::Celsius).convert_pressure(1013.4),
            1013.0
        );
        assert_eq!(
            ctx(UnitSystem::Imperial, TemperatureUnit::Celsius).convert_pressure(1013.0),
            30.0
        );
    }

    #[test]
    fn speed_converts_from_meters_per_second() {
        let metric = ctx(UnitSystem::Metric, TemperatureUnit::Celsius);
        let imperial = ctx(UnitSystem::Imperial, TemperatureUnit::Fahrenheit);
        assert_eq!(metric.convert_speed(5.0), 18.0);
        assert_eq!(metric.convert_speed(0.0), 0.0);
        assert_eq!(imperial.convert_speed(5.0), 11.0);
        assert_eq!(imperial.convert_speed(10.0), 22.0);
    }

    #[test]
    fn precipitation_converts_to_millimeters_for_metric_only() {
        let metric = ctx(UnitSystem::Metric, TemperatureUnit::Celsius);
        let imperial = ctx(UnitSystem::Imperial, TemperatureUnit::Celsius);
        assert!((metric.convert_precipitation(0.1) - 2.54).abs() < 1e-9);
        assert_eq!(imperial.convert_precipitation(0.1), 0.1);
    }

    #[test]
    fn ties_round_toward_positive_infinity() {
        assert_eq!(round_half_up(2.5), 3.0);
        assert_eq!(round_half_up(-2.5), -2.0);
        assert_eq!(percent(0.8), 80.0);
        assert_eq!(percent(0.3), 30.0);
    }

    #[test]
    fn parses_unit_names() {
        assert_eq!("Metric".parse::<UnitSystem>().unwrap(), UnitSystem::Metric);
        assert_eq!(
            " fahrenheit ".parse::<TemperatureUnit>().unwrap(),
            TemperatureUnit::Fahrenheit
        );
        assert!("kelvin".parse::<TemperatureUnit>().is_err());
    }
}
