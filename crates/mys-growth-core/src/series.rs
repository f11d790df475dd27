use serde_json::Value;
use time::Date;

use crate::point::{DataPoint, date_key};

/// A stored value could not be decoded as JSON.
#[derive(Debug, thiserror::Error)]
#[error("stored series is not valid JSON: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Ordered daily series, kept in insertion order.
///
/// Entries are held as raw JSON so that points the validator never looks at
/// (anything past the first) survive a merge unchanged, even when malformed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeSeries {
    entries: Vec<Value>,
}

impl TimeSeries {
    /// Empty series.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Build a series from well-formed points.
    pub fn from_points(points: impl IntoIterator<Item = DataPoint>) -> Self {
        Self {
            entries: points.into_iter().map(|point| point.to_value()).collect(),
        }
    }

    /// Wrap raw entries without inspecting them.
    #[must_use]
    pub const fn from_entries(entries: Vec<Value>) -> Self {
        Self { entries }
    }

    /// Decode a stored value.
    ///
    /// Returns `Ok(None)` when the JSON is well-formed but not an array.
    ///
    /// # Errors
    /// Returns [`DecodeError`] when `raw` is not JSON at all.
    pub fn decode(raw: &str) -> Result<Option<Self>, DecodeError> {
        match serde_json::from_str::<Value>(raw)? {
            Value::Array(entries) => Ok(Some(Self { entries })),
            _ => Ok(None),
        }
    }

    /// Compact JSON encoding used for every slot in the backend.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::from("[");
        for (idx, entry) in self.entries.iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            out.push_str(&entry.to_string());
        }
        out.push(']');
        out
    }

    /// Raw entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[Value] {
        &self.entries
    }

    /// Number of entries, well-formed or not.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the series holds no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the entries that decode as [`DataPoint`]s, skipping the rest.
    pub fn points(&self) -> impl Iterator<Item = DataPoint> + '_ {
        self.entries.iter().filter_map(DataPoint::from_value)
    }

    /// Whether any entry's first position is the given date's key.
    ///
    /// Only the date is compared; counts are ignored. Entries that are not
    /// arrays never match, even when they carry a `"0"` key.
    #[must_use]
    pub fn contains_date(&self, date: Date) -> bool {
        let key = date_key(date);
        self.entries
            .iter()
            .any(|entry| entry.get(0).and_then(Value::as_str) == Some(key.as_str()))
    }

    /// Append a point at the end, regardless of date order.
    pub fn push(&mut self, point: &DataPoint) {
        self.entries.push(point.to_value());
    }
}

/// Result of merging one sample into a series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merge {
    /// Series after the merge.
    pub series: TimeSeries,
    /// False when a point for the same date already existed.
    pub appended: bool,
}

/// Merge `point` into `source`.
///
/// With no trusted source the result is a fresh single-point series. With a
/// source that already has an entry for the point's date, the source is
/// returned untouched.
#[must_use]
pub fn merge_point(source: Option<TimeSeries>, point: &DataPoint) -> Merge {
    let Some(mut series) = source else {
        return Merge {
            series: TimeSeries::from_points([*point]),
            appended: true,
        };
    };
    if series.contains_date(point.date) {
        return Merge {
            series,
            appended: false,
        };
    }
    series.push(point);
    Merge {
        series,
        appended: true,
    }
}
