//! Duration parsing for configuration files.
//!
//! Supports two formats:
//! - `humantime`: `30s`, `5m`, `1h 30m`
//! - ISO 8601: `PT30S`, `PT5M`

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// Parse a duration string.
///
/// Tries humantime first, then ISO 8601.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }

    if let Some(d) = iso8601_duration::Duration::parse(s)
        .ok()
        .and_then(|d| d.to_std())
    {
        return Ok(d);
    }

    Err(format!(
        "invalid duration '{s}': expected humantime (30s) or ISO 8601 (PT30S)"
    ))
}

/// Deserialize a duration from a string.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Serialize a duration to a humantime string.
pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    humantime::format_duration(*duration)
        .to_string()
        .serialize(serializer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_humantime() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h 30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn test_parse_iso8601() {
        assert_eq!(parse_duration("PT30S").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("PT1H30M").unwrap(), Duration::from_secs(5400));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_duration("invalid").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        #[derive(Debug, Deserialize, Serialize, PartialEq)]
        struct Wrapper {
            #[serde(with = "super")]
            wait: Duration,
        }

        let parsed: Wrapper = serde_json::from_str(r#"{"wait":"45s"}"#).unwrap();
        assert_eq!(parsed.wait, Duration::from_secs(45));
        let encoded = serde_json::to_string(&parsed).unwrap();
        let reparsed: Wrapper = serde_json::from_str(&encoded).unwrap();
        assert_eq!(parsed, reparsed);
    }
}
