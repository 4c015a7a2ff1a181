//! Duration parser for config values and CLI arguments.
//!
//! Accepts `humantime` expressions (`500ms`, `10s`, `5m`, `1h30m`, `1d`) and
//! a bare integer, read as seconds.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Error type for duration parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationParseError {
    pub input: String,
    pub message: String,
}

impl std::fmt::Display for DurationParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse duration '{}': {}", self.input, self.message)
    }
}

impl std::error::Error for DurationParseError {}

/// Parses a duration like `10s`, `500ms`, `5m`, `1h30m`, `1d` or bare seconds.
///
/// ```
/// use std::time::Duration;
/// use sqlbeat::util::parse_duration;
///
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
/// ```
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let input = input.trim();
    let error = |message: String| DurationParseError {
        input: input.to_string(),
        message,
    };

    if input.is_empty() {
        return Err(error("empty duration string".to_string()));
    }

    if input.chars().all(|c| c.is_ascii_digit()) {
        return input
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| error(e.to_string()));
    }

    humantime::parse_duration(input).map_err(|e| error(e.to_string()))
}

/// Formats a duration the way [`parse_duration`] reads it back.
pub fn format_duration(d: Duration) -> String {
    humantime::format_duration(d).to_string()
}

/// Serde helper: accepts either a duration string or a number of seconds.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("2d").unwrap(), Duration::from_secs(172_800));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
    }

    #[test]
    fn test_bare_number_is_seconds() {
        assert_eq!(parse_duration("15").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_duration(" 15 ").unwrap(), Duration::from_secs(15));
    }

    #[test]
    fn test_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("99999999999999999999d").is_err());
    }

    #[test]
    fn test_error_message_names_input() {
        let err = parse_duration("soon").unwrap_err();
        assert_eq!(err.input, "soon");
        assert!(err.to_string().contains("'soon'"));
    }

    #[test]
    fn test_format_reads_back() {
        for d in [
            Duration::from_millis(250),
            Duration::from_secs(10),
            Duration::from_secs(120),
            Duration::from_secs(7200),
        ] {
            assert_eq!(parse_duration(&format_duration(d)).unwrap(), d);
        }
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
    }

    #[test]
    fn test_deserialize_string_or_seconds() {
        #[derive(Deserialize)]
        struct Holder {
            #[serde(deserialize_with = "deserialize_duration")]
            every: Duration,
        }

        let h: Holder = serde_yaml::from_str("every: 30s").unwrap();
        assert_eq!(h.every, Duration::from_secs(30));
        let h: Holder = serde_yaml::from_str("every: 45").unwrap();
        assert_eq!(h.every, Duration::from_secs(45));
        assert!(serde_yaml::from_str::<Holder>("every: later").is_err());
    }
}
