//! Loosely-typed row values as handed over by a record source.
//!
//! RULE: `Scalar` and `RawRow` never travel past the Normalizer.
//! Everything downstream of it works on typed records.

use crate::types::MinorUnits;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// One cell of a row-record. No other shape is accepted at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Null,
}

/// A row-record: field name → scalar. Ordered so rows print and compare stably.
pub type RawRow = BTreeMap<String, Scalar>;

impl Scalar {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Date(_) => "date",
            Self::Null => "null",
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Str(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<NaiveDate> for Scalar {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Date(d) => write!(f, "{d}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A value that could not be coerced into the declared kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoercionError {
    pub expected: &'static str,
    pub found: String,
}

impl CoercionError {
    fn new(expected: &'static str, found: &Scalar) -> Self {
        Self {
            expected,
            found: found.to_string(),
        }
    }
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Identifier-like value: non-empty trimmed string, or an integer.
pub fn coerce_key(value: &Scalar) -> Option<String> {
    match value {
        Scalar::Str(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Scalar::Int(v) => Some(v.to_string()),
        _ => None,
    }
}

/// Free-text value. Null and blank become `None`.
pub fn coerce_text(value: &Scalar) -> Option<String> {
    if value.is_null() {
        return None;
    }
    match value {
        Scalar::Str(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

/// Calendar date in the canonical `NaiveDate` representation.
/// Datetime strings are accepted and truncated to their date.
pub fn coerce_date(value: &Scalar) -> Result<Option<NaiveDate>, CoercionError> {
    if value.is_null() {
        return Ok(None);
    }
    match value {
        Scalar::Date(d) => Ok(Some(*d)),
        Scalar::Str(s) => {
            let s = s.trim();
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .or_else(|| parse_datetime_str(s).map(|dt| dt.date()))
                .map(Some)
                .ok_or_else(|| CoercionError::new("date", value))
        }
        _ => Err(CoercionError::new("date", value)),
    }
}

/// Point in time. Integers are epoch seconds; bare dates mean midnight.
pub fn coerce_timestamp(value: &Scalar) -> Result<Option<NaiveDateTime>, CoercionError> {
    if value.is_null() {
        return Ok(None);
    }
    match value {
        Scalar::Date(d) => Ok(Some(d.and_time(NaiveTime::MIN))),
        Scalar::Int(secs) => DateTime::from_timestamp(*secs, 0)
            .map(|dt| Some(dt.naive_utc()))
            .ok_or_else(|| CoercionError::new("timestamp", value)),
        Scalar::Str(s) => {
            let s = s.trim();
            if let Ok(secs) = s.parse::<i64>() {
                return coerce_timestamp(&Scalar::Int(secs));
            }
            parse_datetime_str(s)
                .or_else(|| {
                    DATE_FORMATS
                        .iter()
                        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                        .map(|d| d.and_time(NaiveTime::MIN))
                })
                .map(Some)
                .ok_or_else(|| CoercionError::new("timestamp", value))
        }
        _ => Err(CoercionError::new("timestamp", value)),
    }
}

fn parse_datetime_str(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Whole seconds. Fractional input rounds to the nearest second.
/// Non-numeric input is an error, never a default.
pub fn coerce_seconds(value: &Scalar) -> Result<Option<i64>, CoercionError> {
    if value.is_null() {
        return Ok(None);
    }
    let as_float = |v: f64| -> Result<Option<i64>, CoercionError> {
        if v.is_finite() {
            Ok(Some(v.round() as i64))
        } else {
            Err(CoercionError::new("number", value))
        }
    };
    match value {
        Scalar::Int(v) => Ok(Some(*v)),
        Scalar::Float(v) => as_float(*v),
        Scalar::Str(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(v) => Ok(Some(v)),
                Err(_) => s
                    .parse::<f64>()
                    .map_err(|_| CoercionError::new("number", value))
                    .and_then(as_float),
            }
        }
        _ => Err(CoercionError::new("number", value)),
    }
}

/// Money in minor units. Decimal strings are parsed exactly; floats are
/// rounded to the nearest minor unit once, at this boundary only.
pub fn coerce_money(value: &Scalar) -> Result<Option<MinorUnits>, CoercionError> {
    if value.is_null() {
        return Ok(None);
    }
    match value {
        Scalar::Int(v) => v
            .checked_mul(100)
            .map(Some)
            .ok_or_else(|| CoercionError::new("money", value)),
        Scalar::Float(v) if v.is_finite() => Ok(Some((v * 100.0).round() as i64)),
        Scalar::Str(s) => parse_decimal_minor_units(s.trim())
            .map(Some)
            .ok_or_else(|| CoercionError::new("money", value)),
        _ => Err(CoercionError::new("money", value)),
    }
}

/// `"-12.345"` → `-1235`. Accepts an optional sign and `$`, digits, and
/// an optional fractional part; the third fractional digit rounds half up.
fn parse_decimal_minor_units(s: &str) -> Option<MinorUnits> {
    let (negative, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let rest = rest.strip_prefix('$').unwrap_or(rest);
    let (int_part, frac_part) = match rest.split_once('.') {
        Some((i, f)) => (i, f),
        None => (rest, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let major: i64 = if int_part.is_empty() { 0 } else { int_part.parse().ok()? };
    let digit = |i: usize| -> i64 {
        frac_part
            .as_bytes()
            .get(i)
            .map(|b| (b - b'0') as i64)
            .unwrap_or(0)
    };
    let mut minor = digit(0) * 10 + digit(1);
    if digit(2) >= 5 {
        minor += 1;
    }
    let total = major.checked_mul(100)?.checked_add(minor)?;
    Some(if negative { -total } else { total })
}
