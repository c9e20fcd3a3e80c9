use std::time::Duration;

use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DurationParseError {
    #[error("duration is empty")]
    Empty,
    #[error("invalid number in duration `{0}`")]
    InvalidNumber(String),
    #[error("missing unit in duration `{0}`, use one of ms, s, m, h")]
    MissingUnit(String),
    #[error("unknown duration unit `{unit}` in `{input}`, use one of ms, s, m, h")]
    UnknownUnit { unit: String, input: String },
    #[error("duration `{0}` is too long")]
    OutOfRange(String),
}

/// Parse a human written duration such as `500ms`, `20s`, `1m30s` or `2h`.
///
/// Components may be fractional (`1.5s`). A bare `0` is accepted as zero.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::Empty);
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';

    let mut total = Duration::ZERO;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let number_len = rest.find(|c: char| !is_number(c)).unwrap_or(rest.len());
        if number_len == 0 {
            return Err(DurationParseError::InvalidNumber(trimmed.to_string()));
        }
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail.find(is_number).unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let value: f64 = number
            .parse()
            .map_err(|_| DurationParseError::InvalidNumber(trimmed.to_string()))?;
        let seconds = match unit.trim() {
            "ms" => value / 1000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            "" => return Err(DurationParseError::MissingUnit(trimmed.to_string())),
            other => {
                return Err(DurationParseError::UnknownUnit {
                    unit: other.to_string(),
                    input: trimmed.to_string(),
                })
            }
        };
        total = Duration::try_from_secs_f64(seconds)
            .ok()
            .and_then(|component| total.checked_add(component))
            .ok_or_else(|| DurationParseError::OutOfRange(trimmed.to_string()))?;
        rest = tail;
    }

    Ok(total)
}

/// Inverse of [parse_duration] for whole milliseconds, used when printing configuration back.
pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    if total_ms == 0 {
        return "0s".to_string();
    }
    if total_ms % 1000 != 0 {
        return format!("{}ms", total_ms);
    }

    let total_s = total_ms / 1000;
    let (hours, minutes, seconds) = (total_s / 3600, (total_s % 3600) / 60, total_s % 60);
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    if seconds > 0 {
        out.push_str(&format!("{}s", seconds));
    }
    out
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Text(String),
    Seconds(u64),
}

/// Serde adapter accepting either a duration string or a whole number of seconds.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
        RawDuration::Seconds(seconds) => Ok(Duration::from_secs(seconds)),
    }
}

/// Like [deserialize_duration], for fields declared with `#[serde(default)]`.
pub fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_duration(deserializer).map(Some)
}
