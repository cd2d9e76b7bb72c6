//! Defensive number and date parsing shared by the extractors.
//!
//! Number helpers never fail: text that does not parse yields `None`.
//! Date helpers interpret naive timestamps in the pool's timezone and
//! return UTC.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, SubsecRound as _, TimeZone as _, Utc};
use chrono_tz::Tz;
use regex::Regex;

use crate::SourceError;

static LEADING_INT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([+-]?\d+)").expect("valid regex"));

/// Naive formats tried by [`parse_datetime`] after RFC 3339.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// Current UTC time truncated to whole seconds.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Parses an integer, ignoring surrounding whitespace and leading zeros.
#[must_use]
pub fn int_or_none(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return trimmed.ends_with('0').then_some(0);
    }
    format!("{sign}{digits}").parse().ok()
}

/// Parses a float, ignoring surrounding whitespace.
#[must_use]
pub fn float_or_none(text: &str) -> Option<f64> {
    text.trim().parse().ok().filter(|v: &f64| v.is_finite())
}

/// Parses the integer at the start of `text` (e.g. `"12 frei"` -> 12).
#[must_use]
pub fn leading_int(text: &str) -> Option<i64> {
    LEADING_INT_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| int_or_none(m.as_str()))
}

/// Integer from a JSON number or numeric string.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn json_int(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        serde_json::Value::String(s) => int_or_none(s),
        _ => None,
    }
}

/// Resolves an IANA timezone name.
///
/// # Errors
///
/// Returns [`SourceError::Extraction`] for unknown timezone names.
pub fn timezone(name: &str) -> Result<Tz, SourceError> {
    name.parse::<Tz>()
        .map_err(|e| SourceError::extraction(format!("unknown timezone '{name}': {e}")))
}

/// Interprets a naive local time in `tz` and converts it to UTC.
///
/// Ambiguous local times (DST fall-back) resolve to the earlier instant.
///
/// # Errors
///
/// Returns [`SourceError::Extraction`] for local times that do not exist.
pub fn local_to_utc(naive: NaiveDateTime, tz: Tz) -> Result<DateTime<Utc>, SourceError> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| SourceError::extraction(format!("local time {naive} does not exist in {tz}")))
}

/// Parses `text` with a `chrono` format string as local time in `tz`.
///
/// # Errors
///
/// Returns [`SourceError::Extraction`] if the text does not match the
/// format or the local time does not exist.
pub fn to_utc_datetime(text: &str, format: &str, tz: Tz) -> Result<DateTime<Utc>, SourceError> {
    let naive = NaiveDateTime::parse_from_str(text.trim(), format).map_err(|e| {
        SourceError::extraction(format!("could not parse date '{text}' as '{format}': {e}"))
    })?;
    local_to_utc(naive, tz)
}

/// Parses an ISO-8601-like timestamp. Offsets are honored; naive times are
/// interpreted in `tz`.
///
/// # Errors
///
/// Returns [`SourceError::Extraction`] if no supported format matches.
pub fn parse_datetime(text: &str, tz: Tz) -> Result<DateTime<Utc>, SourceError> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return local_to_utc(naive, tz);
        }
    }
    Err(SourceError::extraction(format!("could not parse date '{text}'")))
}

#[cfg(test)]
mod tests {
    use chrono::SubsecRound as _;

    use super::*;

    #[test]
    fn parses_ints_defensively() {
        assert_eq!(int_or_none("007"), Some(7));
        assert_eq!(int_or_none(" 120 "), Some(120));
        assert_eq!(int_or_none("0"), Some(0));
        assert_eq!(int_or_none("-05"), Some(-5));
        assert_eq!(int_or_none("frei"), None);
        assert_eq!(int_or_none(""), None);
        assert_eq!(int_or_none("1.5"), None);
    }

    #[test]
    fn parses_leading_ints() {
        assert_eq!(leading_int("12 frei"), Some(12));
        assert_eq!(leading_int("  045 Plätze"), Some(45));
        assert_eq!(leading_int("keine Daten"), None);
    }

    #[test]
    fn parses_floats() {
        assert_eq!(float_or_none(" 50.7753"), Some(50.7753));
        assert_eq!(float_or_none("NaN"), None);
        assert_eq!(float_or_none("n/a"), None);
    }

    #[test]
    fn parses_json_ints() {
        assert_eq!(json_int(&serde_json::json!(42)), Some(42));
        assert_eq!(json_int(&serde_json::json!("0042")), Some(42));
        assert_eq!(json_int(&serde_json::json!(null)), None);
    }

    #[test]
    fn converts_local_time_to_utc() {
        let tz = timezone("Europe/Berlin").unwrap();
        let winter = to_utc_datetime("01.03.2024 13:00:00", "%d.%m.%Y %H:%M:%S", tz).unwrap();
        assert_eq!(winter.to_rfc3339(), "2024-03-01T12:00:00+00:00");
        let summer = to_utc_datetime("01.07.2024, 13:00", "%d.%m.%Y, %H:%M", tz).unwrap();
        assert_eq!(summer.to_rfc3339(), "2024-07-01T11:00:00+00:00");
    }

    #[test]
    fn parses_iso_timestamps() {
        let tz = timezone("Europe/Berlin").unwrap();
        let offset = parse_datetime("2024-03-01T13:00:00.123+01:00", tz).unwrap();
        assert_eq!(offset.trunc_subsecs(0).to_rfc3339(), "2024-03-01T12:00:00+00:00");
        let naive = parse_datetime("2024-03-01 13:00:00", tz).unwrap();
        assert_eq!(naive.to_rfc3339(), "2024-03-01T12:00:00+00:00");
        assert!(parse_datetime("gestern", tz).is_err());
    }

    #[test]
    fn rejects_unknown_timezone() {
        assert!(timezone("Mars/Olympus").is_err());
    }
}
