use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};

/// Wire format of a point's date (`YYYY-MM-DD`).
pub const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// One daily sample: `[date, count, flag?]` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataPoint {
    /// Calendar date the sample belongs to.
    pub date: Date,
    /// Sampled member count.
    pub count: u64,
    /// Optional marker carried as the third tuple position.
    pub flag: Option<bool>,
}

impl DataPoint {
    /// Create an unflagged point.
    #[must_use]
    pub const fn new(date: Date, count: u64) -> Self {
        Self {
            date,
            count,
            flag: None,
        }
    }

    /// Attach a flag to the point.
    #[must_use]
    pub const fn with_flag(mut self, flag: bool) -> Self {
        self.flag = Some(flag);
        self
    }

    /// Point for the UTC calendar date of `at`.
    #[must_use]
    pub fn at(at: OffsetDateTime, count: u64) -> Self {
        Self::new(utc_date(at), count)
    }

    /// `YYYY-MM-DD` key of the point's date.
    #[must_use]
    pub fn date_key(&self) -> String {
        date_key(self.date)
    }

    /// Encode as a JSON tuple.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut tuple = vec![Value::from(self.date_key()), Value::from(self.count)];
        if let Some(flag) = self.flag {
            tuple.push(Value::Bool(flag));
        }
        Value::Array(tuple)
    }

    /// Decode a stored JSON tuple. Returns `None` for anything that is not a
    /// well-formed `[date, non-negative integer, bool?]`.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let tuple = value.as_array()?;
        let (date, count) = match tuple.as_slice() {
            [date, count] | [date, count, _] => (date, count),
            _ => return None,
        };
        let date = parse_date_key(date.as_str()?)?;
        let count = count.as_u64()?;
        let flag = match tuple.get(2) {
            None => None,
            Some(Value::Bool(flag)) => Some(*flag),
            Some(_) => return None,
        };
        Some(Self { date, count, flag })
    }
}

/// UTC calendar date of an instant.
#[must_use]
pub fn utc_date(at: OffsetDateTime) -> Date {
    at.to_offset(UtcOffset::UTC).date()
}

/// Render a date in the stored `YYYY-MM-DD` form.
#[must_use]
pub fn date_key(date: Date) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day())
}

/// Parse a stored `YYYY-MM-DD` date.
#[must_use]
pub fn parse_date_key(raw: &str) -> Option<Date> {
    Date::parse(raw, DATE_FORMAT).ok()
}

impl Serialize for DataPoint {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let len = if self.flag.is_some() { 3 } else { 2 };
        let mut seq = s.serialize_seq(Some(len))?;
        seq.serialize_element(&self.date_key())?;
        seq.serialize_element(&self.count)?;
        if let Some(flag) = self.flag {
            seq.serialize_element(&flag)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for DataPoint {
    fn deserialize<D>(d: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        d.deserialize_seq(DataPointVisitor)
    }
}

struct DataPointVisitor;

impl<'de> Visitor<'de> for DataPointVisitor {
    type Value = DataPoint;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a [date, count, flag?] tuple")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let raw_date: String = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let date = parse_date_key(&raw_date)
            .ok_or_else(|| de::Error::custom(format!("invalid date '{raw_date}'")))?;
        let count: u64 = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
        let flag: Option<bool> = seq.next_element()?;
        if seq.next_element::<de::IgnoredAny>()?.is_some() {
            return Err(de::Error::invalid_length(4, &self));
        }
        Ok(DataPoint { date, count, flag })
    }
}
