//! Timestamp decoding and display formatting.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use waterchat_config::DisplayConfig;

use crate::types::{ChatError, ChatResult};

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Timestamp as the backend sends it: epoch milliseconds or an ISO string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    Millis(i64),
    Fractional(f64),
    Text(String),
}

impl WireTimestamp {
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            WireTimestamp::Millis(millis) => from_millis(*millis),
            WireTimestamp::Fractional(millis) if millis.is_finite() => from_millis(millis.trunc() as i64),
            WireTimestamp::Fractional(_) => None,
            WireTimestamp::Text(text) => parse_text(text.trim()),
        }
    }
}

/// Field deserializer for optional timestamps. Values of any other JSON type
/// decode to `None` instead of failing the surrounding frame.
pub(crate) fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<WireTimestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_i64()
            .map(WireTimestamp::Millis)
            .or_else(|| number.as_f64().map(WireTimestamp::Fractional)),
        Value::String(text) => Some(WireTimestamp::Text(text)),
        _ => None,
    })
}

fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

fn parse_text(text: &str) -> Option<DateTime<Utc>> {
    if text.is_empty() {
        return None;
    }

    if let Ok(millis) = text.parse::<i64>() {
        return from_millis(millis);
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }

    // Date-times without an offset are local; bare dates are UTC midnight.
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|local| local.with_timezone(&Utc));
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Renders instants as the short localized time shown next to messages.
#[derive(Debug, Clone)]
pub struct TimeFormatter {
    pattern: String,
    offset: Option<FixedOffset>,
}

impl TimeFormatter {
    pub fn new(pattern: impl Into<String>, offset: Option<FixedOffset>) -> ChatResult<Self> {
        let pattern = pattern.into();
        if StrftimeItems::new(&pattern).any(|item| matches!(item, Item::Error)) {
            return Err(ChatError::configuration(format!(
                "invalid time format pattern {pattern:?}"
            )));
        }
        Ok(Self { pattern, offset })
    }

    pub fn from_config(config: &DisplayConfig) -> ChatResult<Self> {
        let offset = match config.utc_offset_minutes {
            Some(minutes) => Some(
                minutes
                    .checked_mul(60)
                    .and_then(FixedOffset::east_opt)
                    .ok_or_else(|| {
                        ChatError::configuration(format!("utc offset {minutes} minutes is out of range"))
                    })?,
            ),
            None => None,
        };
        Self::new(config.time_format.clone(), offset)
    }

    pub fn format(&self, instant: &DateTime<Utc>) -> String {
        match self.offset {
            Some(offset) => instant.with_timezone(&offset).format(&self.pattern).to_string(),
            None => instant.with_timezone(&Local).format(&self.pattern).to_string(),
        }
    }
}

impl Default for TimeFormatter {
    fn default() -> Self {
        Self {
            pattern: DisplayConfig::default().time_format,
            offset: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc_formatter() -> TimeFormatter {
        TimeFormatter::new("%-I:%M:%S %p", FixedOffset::east_opt(0)).unwrap()
    }

    #[test]
    fn parses_rfc3339_and_epoch_millis_to_same_instant() {
        let iso = WireTimestamp::Text("2024-01-01T00:00:00Z".to_string()).to_utc().unwrap();
        let millis = WireTimestamp::Millis(1_704_067_200_000).to_utc().unwrap();
        let numeric_text = WireTimestamp::Text("1704067200000".to_string()).to_utc().unwrap();

        assert_eq!(iso, millis);
        assert_eq!(iso, numeric_text);
    }

    #[test]
    fn naive_date_time_is_read_as_local() {
        let local = WireTimestamp::Text("2024-03-05T14:30:15.250".to_string()).to_utc().unwrap();
        assert_eq!(local.with_timezone(&Local).format("%H:%M:%S").to_string(), "14:30:15");

        let spaced = WireTimestamp::Text("2024-03-05 09:01:02".to_string()).to_utc().unwrap();
        assert_eq!(spaced.with_timezone(&Local).format("%H:%M:%S").to_string(), "09:01:02");
    }

    #[test]
    fn bare_date_is_utc_midnight() {
        let date = WireTimestamp::Text("2024-03-05".to_string()).to_utc().unwrap();
        assert_eq!(date, Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap());
    }

    #[derive(Deserialize)]
    struct Stamped {
        #[serde(default, deserialize_with = "lenient_timestamp")]
        timestamp: Option<WireTimestamp>,
    }

    fn stamped(raw: &str) -> Option<WireTimestamp> {
        serde_json::from_str::<Stamped>(raw).unwrap().timestamp
    }

    #[test]
    fn lenient_timestamp_ignores_other_json_types() {
        assert_eq!(stamped(r#"{"timestamp": 1704067200000}"#), Some(WireTimestamp::Millis(1_704_067_200_000)));
        assert_eq!(stamped(r#"{"timestamp": 1.5e3}"#), Some(WireTimestamp::Fractional(1500.0)));
        assert_eq!(stamped(r#"{"timestamp": "soon"}"#), Some(WireTimestamp::Text("soon".to_string())));
        assert_eq!(stamped(r#"{"timestamp": true}"#), None);
        assert_eq!(stamped(r#"{"timestamp": {"$date": 1}}"#), None);
        assert_eq!(stamped(r#"{"timestamp": [1, 2]}"#), None);
        assert_eq!(stamped(r#"{"timestamp": null}"#), None);
        assert_eq!(stamped("{}"), None);
    }

    #[test]
    fn offsets_are_honoured() {
        let instant = WireTimestamp::Text("2024-01-01T10:00:00+02:00".to_string()).to_utc().unwrap();
        assert_eq!(utc_formatter().format(&instant), "8:00:00 AM");

        let plus_one = TimeFormatter::new("%H:%M", FixedOffset::east_opt(3600)).unwrap();
        assert_eq!(plus_one.format(&instant), "09:00");
    }

    #[test]
    fn unparseable_text_yields_none() {
        assert!(WireTimestamp::Text("yesterday".to_string()).to_utc().is_none());
        assert!(WireTimestamp::Text(String::new()).to_utc().is_none());
        assert!(WireTimestamp::Fractional(f64::NAN).to_utc().is_none());
    }

    #[test]
    fn rejects_invalid_pattern() {
        assert!(TimeFormatter::new("%H:%M %", None).is_err());
    }

    #[test]
    fn rejects_out_of_range_offset() {
        let config = DisplayConfig {
            time_format: "%H:%M".to_string(),
            utc_offset_minutes: Some(24 * 60),
        };
        assert!(TimeFormatter::from_config(&config).is_err());
    }
}
