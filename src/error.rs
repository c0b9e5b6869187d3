use thiserror::Error;

/// The fetch failed before a usable response body was available.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("weather request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("weather API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("weather response is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("weather response root is not an object")]
    NotAnObject,
}

/// An otherwise successful response is missing something a sink needs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataShapeError {
    #[error("missing or non-numeric field `{field}`")]
    MissingField { field: &'static str },
    #[error("missing or non-text field `{field}`")]
    MissingText { field: &'static str },
    #[error("daily forecast has no entry for day {day}")]
    MissingDay { day: usize },
    #[error("value {value} falls outside every threshold")]
    OutOfScale { value: f64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
