//! Destination type inference for SQL Server.

use tracing::{debug, warn};

use crate::core::{Dtype, Value};

/// Type used when a dtype has no better mapping.
pub const FALLBACK_TYPE: &str = "char(255)";

/// Map a column's dtype to a SQL Server column type.
///
/// Total and deterministic: unrecognized dtypes fall back to `char(255)`
/// with a warning instead of failing. Integer columns always map to
/// `bigint`; their range is inspected and logged but never narrows the type.
pub fn infer_type(dtype: &Dtype, column: &[Value]) -> String {
    match dtype {
        // Nested and heterogeneous data is serialized to text.
        Dtype::Object | Dtype::Mixed | Dtype::UnknownArray | Dtype::Complex => "text".to_string(),

        // Date/time types
        Dtype::DateTime | Dtype::DateTime64 | Dtype::DateTimeTz => "datetime2".to_string(),
        Dtype::Time => "time".to_string(),
        Dtype::Date => "date".to_string(),

        // Strings
        Dtype::String => "char(255)".to_string(),
        Dtype::Categorical => "text".to_string(),
        Dtype::Bytes => "varbinary(255)".to_string(),

        // Numbers
        Dtype::Floating | Dtype::Decimal | Dtype::MixedIntegerFloat => "decimal".to_string(),
        Dtype::Integer => {
            if let Some((min, max)) = integer_range(column) {
                debug!("integer column range [{}, {}] stored as bigint", min, max);
            }
            "bigint".to_string()
        }

        Dtype::Boolean => "char(52)".to_string(),

        // Elapsed time is stored as integer nanoseconds.
        Dtype::Timedelta | Dtype::Timedelta64 | Dtype::Period => "bigint".to_string(),

        Dtype::Empty => FALLBACK_TYPE.to_string(),

        Dtype::MixedInteger | Dtype::Interval | Dtype::Other(_) => {
            warn!(
                "Unknown dtype '{}' has no SQL Server mapping, defaulting to {}",
                dtype, FALLBACK_TYPE
            );
            FALLBACK_TYPE.to_string()
        }
    }
}

fn integer_range(column: &[Value]) -> Option<(i64, i64)> {
    column
        .iter()
        .filter_map(|v| match v {
            Value::Int(i) => Some(*i),
            _ => None,
        })
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_types() {
        for dtype in [Dtype::Object, Dtype::Mixed, Dtype::UnknownArray, Dtype::Complex] {
            assert_eq!(infer_type(&dtype, &[]), "text");
        }
        assert_eq!(infer_type(&Dtype::Categorical, &[]), "text");
        assert_eq!(infer_type(&Dtype::String, &[]), "char(255)");
        assert_eq!(infer_type(&Dtype::Bytes, &[]), "varbinary(255)");
    }

    #[test]
    fn test_temporal_types() {
        assert_eq!(infer_type(&Dtype::DateTime, &[]), "datetime2");
        assert_eq!(infer_type(&Dtype::DateTime64, &[]), "datetime2");
        assert_eq!(infer_type(&Dtype::DateTimeTz, &[]), "datetime2");
        assert_eq!(infer_type(&Dtype::Date, &[]), "date");
        assert_eq!(infer_type(&Dtype::Time, &[]), "time");
        assert_eq!(infer_type(&Dtype::Timedelta, &[]), "bigint");
        assert_eq!(infer_type(&Dtype::Timedelta64, &[]), "bigint");
        assert_eq!(infer_type(&Dtype::Period, &[]), "bigint");
    }

    #[test]
    fn test_numeric_types() {
        assert_eq!(infer_type(&Dtype::Floating, &[]), "decimal");
        assert_eq!(infer_type(&Dtype::Decimal, &[]), "decimal");
        assert_eq!(infer_type(&Dtype::MixedIntegerFloat, &[]), "decimal");
        assert_eq!(infer_type(&Dtype::Boolean, &[]), "char(52)");
    }

    #[test]
    fn test_integer_never_narrows() {
        let small = [Value::Int(0), Value::Int(1)];
        assert_eq!(infer_type(&Dtype::Integer, &small), "bigint");
        let wide = [Value::Int(i64::MIN), Value::Int(i64::MAX)];
        assert_eq!(infer_type(&Dtype::Integer, &wide), "bigint");
        assert_eq!(infer_type(&Dtype::Integer, &[]), "bigint");
    }

    #[test]
    fn test_unknown_dtypes_fall_back() {
        assert_eq!(infer_type(&Dtype::Empty, &[]), "char(255)");
        assert_eq!(infer_type(&Dtype::MixedInteger, &[]), "char(255)");
        assert_eq!(infer_type(&Dtype::Interval, &[]), "char(255)");
        assert_eq!(infer_type(&Dtype::Other("geometry".into()), &[]), "char(255)");
    }

    #[test]
    fn test_integer_range() {
        let column = [Value::Int(5), Value::Null, Value::Int(-3), Value::Int(9)];
        assert_eq!(integer_range(&column), Some((-3, 9)));
        assert_eq!(integer_range(&[Value::Null]), None);
    }
}
