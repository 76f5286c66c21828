//! Canonical JSON encoding for nested cell values.
//!
//! Output uses `", "` and `": "` separators (`{"a": 1, "b": [1, 2]}`), keeps
//! mapping keys in insertion order, and encodes NaN and infinities as `null`
//! instead of rejecting them.

use std::io;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::ser::Formatter;

use crate::core::Value;
use crate::error::Result;

/// Encode a value as canonical JSON text.
pub fn to_json_string(value: &Value) -> Result<String> {
    let mut buf = Vec::with_capacity(64);
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    JsonCell(value).serialize(&mut ser)?;
    // serde_json only ever writes valid UTF-8.
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Compact output with a space after every separator.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

struct JsonCell<'a>(&'a Value);

impl Serialize for JsonCell<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.0 {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Value::Float(_) => serializer.serialize_unit(),
            Value::Decimal(d) => serializer.collect_str(d),
            Value::Complex { re, im } => serializer.collect_str(&format_complex(*re, *im)),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_str(&String::from_utf8_lossy(b)),
            Value::Date(d) => serializer.collect_str(&d.format("%Y-%m-%d")),
            Value::Time(t) => serializer.collect_str(&t.format("%H:%M:%S%.f")),
            Value::DateTime(dt) => serializer.collect_str(&dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            Value::DateTimeTz(dt) => {
                serializer.collect_str(&dt.format("%Y-%m-%dT%H:%M:%S%.f%:z"))
            }
            Value::Duration(d) => match d.num_nanoseconds() {
                Some(ns) => serializer.serialize_i64(ns),
                None => serializer.serialize_unit(),
            },
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&JsonCell(item))?;
                }
                seq.end()
            }
            Value::Map(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(key, &JsonCell(value))?;
                }
                map.end()
            }
        }
    }
}

/// Render a complex number as `(re+imj)`, or `imj` when the real part is zero.
pub(crate) fn format_complex(re: f64, im: f64) -> String {
    if re == 0.0 && re.is_sign_positive() {
        format!("{}j", im)
    } else if im.is_sign_negative() || im.is_nan() {
        format!("({}{}j)", re, im)
    } else {
        format!("({}+{}j)", re, im)
    }
}
