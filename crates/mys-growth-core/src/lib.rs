//! Domain types for the daily member-count series: points, the series itself,
//! the shallow integrity check and the merge rule.

/// Structural validation of stored series.
pub mod integrity;
/// Daily data points and their wire form.
pub mod point;
/// The series container and merge rule.
pub mod series;

pub use integrity::{Candidate, Inspection, is_valid_entries, is_valid_value, validate};
pub use point::{DATE_FORMAT, DataPoint, date_key, parse_date_key, utc_date};
pub use series::{DecodeError, Merge, TimeSeries, merge_point};
