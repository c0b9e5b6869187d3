use crate::error::DataShapeError;

/// Upper bounds (m/s, exclusive) of each Beaufort force.
const BEAUFORT_THRESHOLDS: [f64; 13] = [
    0.3,
    1.5,
    3.3,
    5.5,
    8.0,
    10.8,
    13.9,
    17.2,
    20.7,
    24.5,
    28.4,
    32.6,
    f64::INFINITY,
];

/// Upper bounds (exclusive) of the Beaufort forces drawn with each wind icon.
const ICON_THRESHOLDS: [f64; 4] = [1.0, 3.0, 6.0, f64::INFINITY];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindScale {
    pub beaufort: usize,
    pub icon_bucket: usize,
}

fn first_exceeding(thresholds: &[f64], value: f64) -> Option<usize> {
    thresholds.iter().position(|threshold| value < *threshold)
}

pub fn beaufort_index(speed_ms: f64) -> Result<usize, DataShapeError> {
    first_exceeding(&BEAUFORT_THRESHOLDS, speed_ms)
        .ok_or(DataShapeError::OutOfScale { value: speed_ms })
}

pub fn icon_bucket(beaufort: usize) -> Result<usize, DataShapeError> {
    let value = beaufort as f64;
    first_exceeding(&ICON_THRESHOLDS, value).ok_or(DataShapeError::OutOfScale { value })
}

pub fn classify_wind(speed_ms: f64) -> Result<WindScale, DataShapeError> {
    let beaufort = beaufort_index(speed_ms)?;
    let icon_bucket = icon_bucket(beaufort)?;
    Ok(WindScale {
        beaufort,
        icon_bucket,
    })
}
