use std::fmt;

const NIGHT_SUFFIX: &str = "-night";

const SNOW_ICONS: &[&str] = &["snow", "sleet"];
// The empty code lands in the poor bucket. Kept as received from upstream
// icon handling; see `empty_icon_classifies_as_poor`.
const POOR_ICONS: &[&str] = &["rain", ""];
const NEUTRAL_ICONS: &[&str] = &["wind", "fog", "cloudy"];
const FAIR_ICONS: &[&str] = &["clear", "partly-cloudy"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionGroup {
    Snow,
    Poor,
    Neutral,
    Fair,
    Unknown,
}

impl ConditionGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snow => "snow",
            Self::Poor => "poor",
            Self::Neutral => "neutral",
            Self::Fair => "fair",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ConditionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a raw icon code to its coarse condition group. First match wins.
pub fn classify_condition(icon: &str) -> ConditionGroup {
    let code = icon.strip_suffix(NIGHT_SUFFIX).unwrap_or(icon);
    if SNOW_ICONS.contains(&code) {
        ConditionGroup::Snow
    } else if POOR_ICONS.contains(&code) {
        ConditionGroup::Poor
    } else if NEUTRAL_ICONS.contains(&code) {
        ConditionGroup::Neutral
    } else if FAIR_ICONS.contains(&code) {
        ConditionGroup::Fair
    } else {
        ConditionGroup::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn night_suffix_is_ignored() {
        assert_eq!(classify_condition("snow-night"), ConditionGroup::Snow);
        assert_eq!(classify_condition("snow"), ConditionGroup::Snow);
        assert_eq!(classify_condition("partly-cloudy-night"), ConditionGroup::Fair);
        assert_eq!(classify_condition("clear-night"), ConditionGroup::Fair);
    }

    #[test]
    fn groups_follow_priority_order() {
        assert_eq!(classify_condition("sleet"), ConditionGroup::Snow);
        assert_eq!(classify_condition("rain"), ConditionGroup::Poor);
        assert_eq!(classify_condition("fog"), ConditionGroup::Neutral);
        assert_eq!(classify_condition("wind"), ConditionGroup::Neutral);
        assert_eq!(classify_condition("cloudy"), ConditionGroup::Neutral);
        assert_eq!(classify_condition("clear"), ConditionGroup::Fair);
    }

    #[test]
    fn day_suffixed_codes_are_unknown() {
        // Only "-night" is stripped, so the "-day" variants fall through.
        assert_eq!(classify_condition("clear-day"), ConditionGroup::Unknown);
        assert_eq!(classify_condition("partly-cloudy-day"), ConditionGroup::Unknown);
    }

    #[test]
    fn matching_is_exact_and_case_sensitive() {
        assert_eq!(classify_condition("Snow"), ConditionGroup::Unknown);
        assert_eq!(classify_condition("snow-Night"), ConditionGroup::Unknown);
        assert_eq!(classify_condition("heavy-rain"), ConditionGroup::Unknown);
        assert_eq!(classify_condition("tornado"), ConditionGroup::Unknown);
    }

    #[test]
    fn empty_icon_classifies_as_poor() {
        assert_eq!(classify_condition(""), ConditionGroup::Poor);
        assert_eq!(classify_condition("-night"), ConditionGroup::Poor);
    }
}
