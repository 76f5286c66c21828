//! Cell value types.
//!
//! Two representations live here:
//!
//! - [`Value`]: a dynamically-typed dataset cell as the caller hands it over,
//!   including nested mappings and sequences.
//! - [`SqlValue`]: a scalar that can be bound as a query parameter. The value
//!   normalizer turns the former into the latter.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;

/// A dataset cell.
///
/// `Float(f64::NAN)` is the missing-value sentinel and is treated like
/// `Null` everywhere a value is checked for absence.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value.
    Null,

    /// Boolean.
    Bool(bool),

    /// Signed integer.
    Int(i64),

    /// Floating point, possibly NaN or infinite.
    Float(f64),

    /// Exact decimal.
    Decimal(Decimal),

    /// Complex number.
    Complex { re: f64, im: f64 },

    /// Text.
    Str(String),

    /// Raw bytes.
    Bytes(Vec<u8>),

    /// Calendar date.
    Date(NaiveDate),

    /// Time of day.
    Time(NaiveTime),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),

    /// Timestamp with a fixed UTC offset.
    DateTimeTz(DateTime<FixedOffset>),

    /// Elapsed time.
    Duration(Duration),

    /// Sequence; multidimensional arrays are nested lists.
    List(Vec<Value>),

    /// Mapping with insertion-ordered keys.
    Map(Vec<(String, Value)>),
}

impl Value {
    /// Check if this value is absent (NULL or the NaN sentinel).
    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Check if this value is a mapping or sequence.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_))
    }

    /// Build a mapping from key/value pairs.
    pub fn map<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::DateTimeTz(v)
    }
}

impl From<Duration> for Value {
    fn from(v: Duration) -> Self {
        Value::Duration(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => Value::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// A scalar ready to be bound as a query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL.
    Null,

    /// 64-bit signed integer (bigint).
    I64(i64),

    /// 64-bit floating point.
    F64(f64),

    /// Decimal value with arbitrary precision.
    Decimal(Decimal),

    /// Text.
    Text(String),

    /// Binary data.
    Bytes(Vec<u8>),

    /// Date without time component.
    Date(NaiveDate),

    /// Time without date component.
    Time(NaiveTime),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),

    /// Timestamp with timezone offset.
    DateTimeOffset(DateTime<FixedOffset>),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Text form used when a driver binds everything as character data.
    ///
    /// Returns `None` for NULL and for binary values.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            SqlValue::Null | SqlValue::Bytes(_) => None,
            SqlValue::I64(v) => Some(v.to_string()),
            SqlValue::F64(v) => Some(v.to_string()),
            SqlValue::Decimal(v) => Some(v.to_string()),
            SqlValue::Text(v) => Some(v.clone()),
            SqlValue::Date(v) => Some(v.format("%Y-%m-%d").to_string()),
            SqlValue::Time(v) => Some(v.format("%H:%M:%S%.f").to_string()),
            SqlValue::DateTime(v) => Some(v.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            SqlValue::DateTimeOffset(v) => Some(v.format("%Y-%m-%d %H:%M:%S%.f %:z").to_string()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_values() {
        assert!(Value::Null.is_missing());
        assert!(Value::Float(f64::NAN).is_missing());
        assert!(!Value::Float(f64::INFINITY).is_missing());
        assert!(!Value::Int(0).is_missing());
        assert!(!Value::Str(String::new()).is_missing());
    }

    #[test]
    fn test_from_json() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"id": 1, "score": 2.5, "tags": ["a"], "ok": true, "x": null}"#)
                .unwrap();
        let value = Value::from(json);
        let Value::Map(fields) = value else {
            panic!("expected a map");
        };
        let get = |name: &str| fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());
        assert_eq!(get("id"), Some(Value::Int(1)));
        assert_eq!(get("score"), Some(Value::Float(2.5)));
        assert_eq!(get("tags"), Some(Value::List(vec![Value::Str("a".into())])));
        assert_eq!(get("ok"), Some(Value::Bool(true)));
        assert_eq!(get("x"), Some(Value::Null));
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(Value::from(Some(3i64)), Value::Int(3));
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn test_sql_value_text() {
        assert_eq!(SqlValue::I64(42).to_text().as_deref(), Some("42"));
        assert_eq!(SqlValue::Null.to_text(), None);
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(SqlValue::Date(date).to_text().as_deref(), Some("2024-02-29"));
        let ts = date.and_hms_micro_opt(8, 30, 0, 250_000).unwrap();
        assert_eq!(
            SqlValue::DateTime(ts).to_text().as_deref(),
            Some("2024-02-29 08:30:00.250")
        );
    }
}
