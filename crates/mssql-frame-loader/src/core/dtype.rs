//! Column dtype classification.
//!
//! A [`Dtype`] is the coarse semantic category of a column, computed once and
//! then handed to both the type inference engine and the value normalizer.

use std::fmt;
use std::str::FromStr;

use super::value::Value;

/// Semantic category of a column.
///
/// The tag names follow the dataframe convention (`"mixed-integer-float"`,
/// `"unknown-array"`, ...) so classifications can round-trip through text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dtype {
    Object,
    String,
    Bytes,
    Integer,
    MixedInteger,
    Floating,
    Decimal,
    MixedIntegerFloat,
    Complex,
    Boolean,
    DateTime,
    DateTime64,
    DateTimeTz,
    Date,
    Time,
    Timedelta,
    Timedelta64,
    Period,
    Interval,
    Categorical,
    Mixed,
    UnknownArray,
    Empty,
    /// A tag this crate does not recognize.
    Other(String),
}

impl Dtype {
    /// Classify a column from its values, ignoring missing ones.
    pub fn infer(values: &[Value]) -> Dtype {
        let mut seen = Seen::default();
        for value in values.iter().filter(|v| !v.is_missing()) {
            match value {
                Value::Null => {}
                Value::Bool(_) => seen.bool = true,
                Value::Int(_) => seen.int = true,
                Value::Float(_) => seen.float = true,
                Value::Decimal(_) => seen.decimal = true,
                Value::Complex { .. } => seen.complex = true,
                Value::Str(_) => seen.string = true,
                Value::Bytes(_) => seen.bytes = true,
                Value::Date(_) => seen.date = true,
                Value::Time(_) => seen.time = true,
                Value::DateTime(_) => seen.datetime = true,
                Value::DateTimeTz(_) => seen.datetime_tz = true,
                Value::Duration(_) => seen.duration = true,
                Value::List(_) | Value::Map(_) => seen.nested = true,
            }
        }
        seen.classify()
    }

    /// Tag name of this classification.
    pub fn as_str(&self) -> &str {
        match self {
            Dtype::Object => "object",
            Dtype::String => "string",
            Dtype::Bytes => "bytes",
            Dtype::Integer => "integer",
            Dtype::MixedInteger => "mixed-integer",
            Dtype::Floating => "floating",
            Dtype::Decimal => "decimal",
            Dtype::MixedIntegerFloat => "mixed-integer-float",
            Dtype::Complex => "complex",
            Dtype::Boolean => "boolean",
            Dtype::DateTime => "datetime",
            Dtype::DateTime64 => "datetime64",
            Dtype::DateTimeTz => "datetimetz",
            Dtype::Date => "date",
            Dtype::Time => "time",
            Dtype::Timedelta => "timedelta",
            Dtype::Timedelta64 => "timedelta64",
            Dtype::Period => "period",
            Dtype::Interval => "interval",
            Dtype::Categorical => "categorical",
            Dtype::Mixed => "mixed",
            Dtype::UnknownArray => "unknown-array",
            Dtype::Empty => "empty",
            Dtype::Other(tag) => tag,
        }
    }

    /// Whether every value is coerced to text before serialization.
    pub fn coerces_to_text(&self) -> bool {
        matches!(self, Dtype::Mixed | Dtype::UnknownArray | Dtype::Complex)
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dtype {
    type Err = std::convert::Infallible;

    /// Parse a tag; unrecognized tags become [`Dtype::Other`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "object" => Dtype::Object,
            "string" => Dtype::String,
            "bytes" => Dtype::Bytes,
            "integer" => Dtype::Integer,
            "mixed-integer" => Dtype::MixedInteger,
            "floating" => Dtype::Floating,
            "decimal" => Dtype::Decimal,
            "mixed-integer-float" => Dtype::MixedIntegerFloat,
            "complex" => Dtype::Complex,
            "boolean" => Dtype::Boolean,
            "datetime" => Dtype::DateTime,
            "datetime64" => Dtype::DateTime64,
            "datetimetz" => Dtype::DateTimeTz,
            "date" => Dtype::Date,
            "time" => Dtype::Time,
            "timedelta" => Dtype::Timedelta,
            "timedelta64" => Dtype::Timedelta64,
            "period" => Dtype::Period,
            "interval" => Dtype::Interval,
            "categorical" => Dtype::Categorical,
            "mixed" => Dtype::Mixed,
            "unknown-array" => Dtype::UnknownArray,
            "empty" => Dtype::Empty,
            _ => Dtype::Other(s.trim().to_string()),
        })
    }
}

/// Which value kinds a column contains.
#[derive(Default)]
struct Seen {
    bool: bool,
    int: bool,
    float: bool,
    decimal: bool,
    complex: bool,
    string: bool,
    bytes: bool,
    date: bool,
    time: bool,
    datetime: bool,
    datetime_tz: bool,
    duration: bool,
    nested: bool,
}

impl Seen {
    fn kinds(&self) -> usize {
        [
            self.bool,
            self.int,
            self.float,
            self.decimal,
            self.complex,
            self.string,
            self.bytes,
            self.date,
            self.time,
            self.datetime,
            self.datetime_tz,
            self.duration,
            self.nested,
        ]
        .iter()
        .filter(|seen| **seen)
        .count()
    }

    fn classify(&self) -> Dtype {
        match self.kinds() {
            0 => Dtype::Empty,
            1 => {
                if self.bool {
                    Dtype::Boolean
                } else if self.int {
                    Dtype::Integer
                } else if self.float {
                    Dtype::Floating
                } else if self.decimal {
                    Dtype::Decimal
                } else if self.complex {
                    Dtype::Complex
                } else if self.string {
                    Dtype::String
                } else if self.bytes {
                    Dtype::Bytes
                } else if self.date {
                    Dtype::Date
                } else if self.time {
                    Dtype::Time
                } else if self.datetime {
                    Dtype::DateTime
                } else if self.datetime_tz {
                    Dtype::DateTimeTz
                } else if self.duration {
                    Dtype::Timedelta
                } else {
                    Dtype::Object
                }
            }
            2 if self.int && self.float => Dtype::MixedIntegerFloat,
            2 if self.datetime && self.datetime_tz => Dtype::DateTimeTz,
            _ if self.int && !self.float && !self.nested => Dtype::MixedInteger,
            _ => Dtype::Mixed,
        }
    }
}
