//! Value normalization before parameter binding.
//!
//! Every cell is mapped 1:1 to a [`SqlValue`]:
//!
//! - Missing values (NULL, NaN) become `SqlValue::Null`
//! - Mappings and sequences become canonical JSON text
//! - Columns classified `mixed`, `unknown-array` or `complex` become text
//! - Booleans are spelled `True` / `False`
//! - Durations become integer nanoseconds
//!
//! Text results have surrounding `"` characters trimmed. That cleanup undoes
//! string-coercion artifacts and is not SQL escaping; binding parameters is
//! the only injection defense.

mod json;

pub use json::to_json_string;

use tracing::warn;

use crate::core::{Dataset, Dtype, SqlValue, Value};

/// Literal stored for `true`.
pub const TRUE_LITERAL: &str = "True";
/// Literal stored for `false`.
pub const FALSE_LITERAL: &str = "False";

/// Normalize one value of a column classified as `dtype`.
pub fn normalize_value(value: &Value, dtype: &Dtype) -> SqlValue {
    if value.is_missing() {
        return SqlValue::Null;
    }
    if dtype.coerces_to_text() {
        return text(display_text(value));
    }

    match value {
        Value::Null => SqlValue::Null,
        Value::List(_) | Value::Map(_) => text(display_text(value)),
        Value::Bool(b) => SqlValue::Text(bool_literal(*b).to_string()),
        Value::Int(i) => SqlValue::I64(*i),
        Value::Float(f) => SqlValue::F64(*f),
        Value::Decimal(d) => SqlValue::Decimal(*d),
        Value::Complex { re, im } => text(json::format_complex(*re, *im)),
        Value::Str(s) => text(s.clone()),
        Value::Bytes(b) => SqlValue::Bytes(b.clone()),
        Value::Date(d) => SqlValue::Date(*d),
        Value::Time(t) => SqlValue::Time(*t),
        Value::DateTime(dt) => SqlValue::DateTime(*dt),
        Value::DateTimeTz(dt) => SqlValue::DateTimeOffset(*dt),
        Value::Duration(d) => match d.num_nanoseconds() {
            Some(ns) => SqlValue::I64(ns),
            None => {
                warn!("duration {} overflows 64-bit nanoseconds, storing NULL", d);
                SqlValue::Null
            }
        },
    }
}

/// Normalize a whole dataset into positional rows.
///
/// Row count and column order are preserved; the dataset is not modified.
pub fn normalize_dataset(dataset: &Dataset) -> Vec<Vec<SqlValue>> {
    let normalized: Vec<Vec<SqlValue>> = dataset
        .columns()
        .iter()
        .map(|column| {
            column
                .values
                .iter()
                .map(|v| normalize_value(v, &column.dtype))
                .collect()
        })
        .collect();

    (0..dataset.num_rows())
        .map(|row| normalized.iter().map(|column| column[row].clone()).collect())
        .collect()
}

/// Trim surrounding double quotes. Idempotent.
pub fn strip_quotes(s: &str) -> &str {
    s.trim_matches('"')
}

pub fn bool_literal(b: bool) -> &'static str {
    if b {
        TRUE_LITERAL
    } else {
        FALSE_LITERAL
    }
}

fn text(s: String) -> SqlValue {
    let trimmed = strip_quotes(&s);
    if trimmed.len() == s.len() {
        SqlValue::Text(s)
    } else {
        SqlValue::Text(trimmed.to_string())
    }
}

/// Text form of any value.
fn display_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => bool_literal(*b).to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format_float(*f),
        Value::Decimal(d) => d.to_string(),
        Value::Complex { re, im } => json::format_complex(*re, *im),
        Value::Str(s) => s.clone(),
        Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::Time(t) => t.format("%H:%M:%S%.f").to_string(),
        Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        Value::DateTimeTz(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string(),
        Value::Duration(d) => d.to_string(),
        Value::List(_) | Value::Map(_) => match to_json_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("failed to encode nested value as JSON: {}", e);
                format!("{:?}", value)
            }
        },
    }
}

/// Floats keep a trailing `.0` when integral, so `2.0` does not read as an integer.
fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else if f.is_infinite() {
        let inf = if f.is_sign_positive() { "inf" } else { "-inf" };
        inf.to_string()
    } else {
        f.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Column;
    use chrono::{Duration, FixedOffset, NaiveDate, TimeZone};

    #[test]
    fn test_missing_values_become_null() {
        assert_eq!(normalize_value(&Value::Null, &Dtype::Integer), SqlValue::Null);
        assert_eq!(normalize_value(&Value::Float(f64::NAN), &Dtype::Floating), SqlValue::Null);
        assert_eq!(normalize_value(&Value::Float(f64::NAN), &Dtype::Mixed), SqlValue::Null);
    }

    #[test]
    fn test_nested_value_normalization() {
        let value = Value::map([("a", Value::Int(1))]);
        assert_eq!(
            normalize_value(&value, &Dtype::Object),
            SqlValue::Text(r#"{"a": 1}"#.to_string())
        );

        let with_nan = Value::map([("a", Value::Float(f64::NAN))]);
        assert_eq!(
            normalize_value(&with_nan, &Dtype::Object),
            SqlValue::Text(r#"{"a": null}"#.to_string())
        );
    }

    #[test]
    fn test_nested_string_strips_quote_artifacts() {
        let value = Value::List(vec![]);
        assert_eq!(normalize_value(&value, &Dtype::Object), SqlValue::Text("[]".into()));
        assert_eq!(
            normalize_value(&Value::Str("\"quoted\"".into()), &Dtype::String),
            SqlValue::Text("quoted".into())
        );
    }

    #[test]
    fn test_strip_quotes_idempotent() {
        for s in ["\"x\"", "\"\"x\"\"", "x", "", "\""] {
            let once = strip_quotes(s);
            assert_eq!(strip_quotes(once), once);
        }
    }

    #[test]
    fn test_booleans_fixed_spelling() {
        assert_eq!(normalize_value(&Value::Bool(true), &Dtype::Boolean), SqlValue::Text("True".into()));
        assert_eq!(normalize_value(&Value::Bool(false), &Dtype::Boolean), SqlValue::Text("False".into()));
        assert_eq!(normalize_value(&Value::Bool(true), &Dtype::Mixed), SqlValue::Text("True".into()));
    }

    #[test]
    fn test_mixed_columns_coerce_to_text() {
        assert_eq!(normalize_value(&Value::Int(3), &Dtype::Mixed), SqlValue::Text("3".into()));
        assert_eq!(normalize_value(&Value::Float(2.0), &Dtype::UnknownArray), SqlValue::Text("2.0".into()));
        assert_eq!(
            normalize_value(&Value::Complex { re: 1.0, im: 2.0 }, &Dtype::Complex),
            SqlValue::Text("(1+2j)".into())
        );
        assert_eq!(
            normalize_value(&Value::map([("k", Value::Bool(true))]), &Dtype::Mixed),
            SqlValue::Text(r#"{"k": true}"#.into())
        );
    }

    #[test]
    fn test_scalars_pass_through() {
        assert_eq!(normalize_value(&Value::Int(7), &Dtype::Integer), SqlValue::I64(7));
        assert_eq!(normalize_value(&Value::Float(1.25), &Dtype::Floating), SqlValue::F64(1.25));
        let d = NaiveDate::from_ymd_opt(2020, 5, 17).unwrap();
        assert_eq!(normalize_value(&Value::Date(d), &Dtype::Date), SqlValue::Date(d));

        let tz = FixedOffset::west_opt(6 * 3600).unwrap();
        let ts = tz.with_ymd_and_hms(2017, 3, 16, 10, 35, 18).unwrap();
        assert_eq!(
            normalize_value(&Value::DateTimeTz(ts), &Dtype::DateTimeTz),
            SqlValue::DateTimeOffset(ts)
        );
    }

    #[test]
    fn test_durations_as_nanoseconds() {
        assert_eq!(
            normalize_value(&Value::Duration(Duration::seconds(2)), &Dtype::Timedelta),
            SqlValue::I64(2_000_000_000)
        );
        assert_eq!(
            normalize_value(&Value::Duration(Duration::days(200_000)), &Dtype::Timedelta),
            SqlValue::Null
        );
    }

    #[test]
    fn test_normalize_dataset_preserves_shape() {
        let dataset = Dataset::new(vec![
            Column::new("id", vec![1.into(), 2.into(), Value::Null]),
            Column::new("score", vec![0.5.into(), f64::NAN.into(), 1.5.into()]),
        ])
        .unwrap();
        let rows = normalize_dataset(&dataset);

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec![SqlValue::I64(1), SqlValue::F64(0.5)]);
        assert_eq!(rows[1], vec![SqlValue::I64(2), SqlValue::Null]);
        assert_eq!(rows[2], vec![SqlValue::Null, SqlValue::F64(1.5)]);
        assert!(dataset.column("score").unwrap().values[1].is_missing());
    }
}
