//! Decoder for the ODBC `datetimeoffset` binary struct.
//!
//! SQL Server's ODBC driver reports `datetimeoffset` columns as SQL type
//! `-155` (`SQL_SS_TIMESTAMPOFFSET`) and returns them as a packed
//! little-endian `SQL_SS_TIMESTAMPOFFSET_STRUCT`:
//!
//! | offset | type | field |
//! |---|---|---|
//! | 0 | i16 | year |
//! | 2 | u16 | month |
//! | 4 | u16 | day |
//! | 6 | u16 | hour |
//! | 8 | u16 | minute |
//! | 10 | u16 | second |
//! | 12 | u32 | fraction (nanoseconds) |
//! | 16 | i16 | timezone hour offset |
//! | 18 | i16 | timezone minute offset |

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};

use crate::error::{LoaderError, Result};

/// SQL type code of `datetimeoffset` columns.
pub const SQL_SS_TIMESTAMPOFFSET: i16 = -155;

/// Size of the packed struct in bytes.
pub const DATETIMEOFFSET_STRUCT_LEN: usize = 20;

/// Decode a packed `datetimeoffset` value.
///
/// Nanoseconds are truncated to microseconds.
pub fn decode_datetimeoffset(raw: &[u8]) -> Result<DateTime<FixedOffset>> {
    if raw.len() < DATETIMEOFFSET_STRUCT_LEN {
        return Err(LoaderError::Decode(format!(
            "datetimeoffset needs {} bytes, got {}",
            DATETIMEOFFSET_STRUCT_LEN,
            raw.len()
        )));
    }

    let i16_at = |pos: usize| i16::from_le_bytes([raw[pos], raw[pos + 1]]);
    let year = i16_at(0);
    let month = i16_at(2);
    let day = i16_at(4);
    let hour = i16_at(6);
    let minute = i16_at(8);
    let second = i16_at(10);
    let fraction = u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]);
    let tz_hour = i16_at(16);
    let tz_minute = i16_at(18);

    let invalid = || {
        LoaderError::Decode(format!(
            "invalid datetimeoffset {}-{}-{} {}:{}:{}.{} {:+}:{}",
            year, month, day, hour, minute, second, fraction, tz_hour, tz_minute
        ))
    };

    let field = |v: i16| u32::try_from(v).map_err(|_| invalid());
    let local = NaiveDate::from_ymd_opt(i32::from(year), field(month)?, field(day)?)
        .and_then(|d| {
            d.and_hms_micro_opt(
                u32::try_from(hour).ok()?,
                u32::try_from(minute).ok()?,
                u32::try_from(second).ok()?,
                fraction / 1_000,
            )
        })
        .ok_or_else(invalid)?;

    // Both offset parts carry the sign of the offset.
    let offset_secs = i32::from(tz_hour) * 3600 + i32::from(tz_minute) * 60;
    let offset = FixedOffset::east_opt(offset_secs).ok_or_else(invalid)?;

    offset.from_local_datetime(&local).single().ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(fields: (i16, i16, i16, i16, i16, i16, u32, i16, i16)) -> Vec<u8> {
        let (y, mo, d, h, mi, s, ns, tzh, tzm) = fields;
        let mut out = Vec::with_capacity(DATETIMEOFFSET_STRUCT_LEN);
        for v in [y, mo, d, h, mi, s] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&ns.to_le_bytes());
        out.extend_from_slice(&tzh.to_le_bytes());
        out.extend_from_slice(&tzm.to_le_bytes());
        out
    }

    #[test]
    fn test_decode_known_value() {
        let raw = pack((2017, 3, 16, 10, 35, 18, 500_000_000, -6, 0));
        let decoded = decode_datetimeoffset(&raw).unwrap();

        let expected = FixedOffset::west_opt(6 * 3600)
            .unwrap()
            .with_ymd_and_hms(2017, 3, 16, 10, 35, 18)
            .unwrap()
            + chrono::Duration::microseconds(500_000);
        assert_eq!(decoded, expected);
        assert_eq!(decoded.to_rfc3339(), "2017-03-16T10:35:18.500-06:00");
    }

    #[test]
    fn test_decode_truncates_to_microseconds() {
        let raw = pack((2020, 1, 1, 0, 0, 0, 123_456_789, 0, 0));
        let decoded = decode_datetimeoffset(&raw).unwrap();
        assert_eq!(decoded.timestamp_subsec_nanos(), 123_456_000);
    }

    #[test]
    fn test_decode_negative_half_hour_offset() {
        let raw = pack((2021, 6, 1, 8, 0, 0, 0, -3, -30));
        let decoded = decode_datetimeoffset(&raw).unwrap();
        assert_eq!(decoded.offset().local_minus_utc(), -(3 * 3600 + 30 * 60));
    }

    #[test]
    fn test_decode_rejects_short_input() {
        let raw = pack((2017, 3, 16, 10, 35, 18, 0, 0, 0));
        assert!(decode_datetimeoffset(&raw[..13]).is_err());
    }

    #[test]
    fn test_decode_rejects_invalid_date() {
        let raw = pack((2017, 2, 30, 0, 0, 0, 0, 0, 0));
        assert!(matches!(decode_datetimeoffset(&raw), Err(LoaderError::Decode(_))));
    }
}
