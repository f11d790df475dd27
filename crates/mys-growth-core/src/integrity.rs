//! Shallow structural validation of stored series.
//!
//! The check looks at the first entry only: a series is sound when it is an
//! array that is either empty or whose first entry starts with
//! `(string, number)`. Later entries are never inspected.
//!
//! "Starts with" means a JSON array prefix. An object with `"0"` and `"1"`
//! keys is not positional and fails the check.

use serde_json::Value;

use crate::series::{DecodeError, TimeSeries};

/// Value submitted for validation.
#[derive(Debug, Clone, Copy)]
pub enum Candidate<'a> {
    /// Encoded form as read from the backend.
    Encoded(&'a str),
    /// Already-decoded JSON.
    Decoded(&'a Value),
    /// Series built in memory.
    Series(&'a TimeSeries),
}

impl<'a> From<&'a str> for Candidate<'a> {
    fn from(raw: &'a str) -> Self {
        Self::Encoded(raw)
    }
}

impl<'a> From<&'a String> for Candidate<'a> {
    fn from(raw: &'a String) -> Self {
        Self::Encoded(raw)
    }
}

impl<'a> From<&'a Value> for Candidate<'a> {
    fn from(value: &'a Value) -> Self {
        Self::Decoded(value)
    }
}

impl<'a> From<&'a TimeSeries> for Candidate<'a> {
    fn from(series: &'a TimeSeries) -> Self {
        Self::Series(series)
    }
}

/// Validate a candidate series.
///
/// # Errors
/// Returns [`DecodeError`] when an encoded candidate is not JSON. A decode
/// failure is never folded into `Ok(false)`; callers decide what it means.
pub fn validate<'a>(candidate: impl Into<Candidate<'a>>) -> Result<bool, DecodeError> {
    match candidate.into() {
        Candidate::Encoded(raw) => {
            let value: Value = serde_json::from_str(raw)?;
            Ok(is_valid_value(&value))
        }
        Candidate::Decoded(value) => Ok(is_valid_value(value)),
        Candidate::Series(series) => Ok(is_valid_entries(series.entries())),
    }
}

/// Structural check on decoded JSON.
#[must_use]
pub fn is_valid_value(value: &Value) -> bool {
    value.as_array().is_some_and(|entries| is_valid_entries(entries))
}

/// Structural check on a decoded array.
///
/// The first entry must itself be an array; index-like object keys do not count.
#[must_use]
pub fn is_valid_entries(entries: &[Value]) -> bool {
    entries.first().is_none_or(|first| {
        first.get(0).is_some_and(Value::is_string) && first.get(1).is_some_and(Value::is_number)
    })
}

/// Classification of a raw slot read.
#[derive(Debug)]
pub enum Inspection {
    /// Structurally sound series.
    Valid(TimeSeries),
    /// Decoded, but fails the structural check.
    Invalid,
    /// Slot has never been written.
    Missing,
    /// Stored bytes are not JSON.
    Corrupt(DecodeError),
}

impl Inspection {
    /// Classify the raw contents of a slot.
    #[must_use]
    pub fn inspect(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::Missing;
        };
        match TimeSeries::decode(raw) {
            Ok(Some(series)) if is_valid_entries(series.entries()) => Self::Valid(series),
            Ok(_) => Self::Invalid,
            Err(err) => Self::Corrupt(err),
        }
    }

    /// The series, when valid.
    #[must_use]
    pub fn into_valid(self) -> Option<TimeSeries> {
        match self {
            Self::Valid(series) => Some(series),
            Self::Invalid | Self::Missing | Self::Corrupt(_) => None,
        }
    }

    /// Short label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Valid(_) => "valid",
            Self::Invalid => "invalid",
            Self::Missing => "missing",
            Self::Corrupt(_) => "corrupt",
        }
    }
}
