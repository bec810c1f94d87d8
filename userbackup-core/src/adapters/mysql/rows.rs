//! Conversion of MySQL rows into backup rows.
//!
//! Temporal values become ISO-8601 style strings with fractional seconds
//! when present, binary values `base64:` strings. `DECIMAL` and `JSON` are
//! kept as their exact server text. A value that cannot be decoded is an
//! `Encoding` error, never `null`.

use crate::Result;
use crate::error::UserBackupError;
use crate::models::Row;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Number, Value as JsonValue};
use sqlx::mysql::MySqlRow;
use sqlx::mysql::types::MySqlTime;
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Converts a fetched row of `table`, keeping column order.
///
/// # Errors
/// Returns an `Encoding` error naming the first column whose value cannot
/// be represented in the backup document.
pub fn row_to_json(row: &MySqlRow, table: &str) -> Result<Row> {
    row.columns()
        .iter()
        .map(|column| {
            let value = extract_column_value(row, column.ordinal()).map_err(|reason| {
                UserBackupError::encoding(table, format!("column '{}': {}", column.name(), reason))
            })?;
            Ok((column.name().to_string(), value))
        })
        .collect()
}

fn extract_column_value(row: &MySqlRow, index: usize) -> std::result::Result<JsonValue, String> {
    let raw = row.try_get_raw(index).map_err(|e| e.to_string())?;
    if raw.is_null() {
        return Ok(JsonValue::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_uppercase();
    let decode_error = |e: sqlx::Error| format!("{} value could not be decoded: {}", type_name, e);

    match type_name.as_str() {
        "BOOLEAN" => row.try_get::<bool, _>(index).map(JsonValue::Bool).map_err(decode_error),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
            .try_get::<i64, _>(index)
            .map(JsonValue::from)
            .map_err(decode_error),
        name if name.ends_with("UNSIGNED") => row
            .try_get::<u64, _>(index)
            .map(JsonValue::from)
            .map_err(decode_error),
        "FLOAT" => {
            let value = row.try_get::<f32, _>(index).map_err(decode_error)?;
            finite_number(f64::from(value))
        }
        "DOUBLE" => finite_number(row.try_get::<f64, _>(index).map_err(decode_error)?),
        "DECIMAL" | "JSON" => row
            .try_get_unchecked::<String, _>(index)
            .map(JsonValue::String)
            .map_err(decode_error),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(index)
            .map(|v| JsonValue::String(format_datetime(&v)))
            .map_err(decode_error),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(index)
            .map(|v| JsonValue::String(v.to_string()))
            .map_err(decode_error),
        "TIME" => row
            .try_get::<MySqlTime, _>(index)
            .map(|v| JsonValue::String(v.to_string()))
            .map_err(decode_error),
        "YEAR" => row
            .try_get_unchecked::<u16, _>(index)
            .map(JsonValue::from)
            .map_err(decode_error),
        "BIT" => {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(index).map_err(decode_error)?;
            bit_value(&bytes)
        }
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "GEOMETRY" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map(|bytes| JsonValue::String(format!("base64:{}", STANDARD.encode(bytes))))
            .map_err(decode_error),
        _ => row
            .try_get_unchecked::<String, _>(index)
            .map(JsonValue::String)
            .map_err(decode_error),
    }
}

fn finite_number(value: f64) -> std::result::Result<JsonValue, String> {
    Number::from_f64(value)
        .map(JsonValue::Number)
        .ok_or_else(|| format!("non-finite floating point value {}", value))
}

fn format_datetime(value: &chrono::NaiveDateTime) -> String {
    value.format(DATETIME_FORMAT).to_string()
}

/// `BIT(n)` arrives big-endian in at most 8 bytes.
fn bit_value(bytes: &[u8]) -> std::result::Result<JsonValue, String> {
    if bytes.len() > 8 {
        return Err(format!("BIT value of {} bytes exceeds 64 bits", bytes.len()));
    }
    let value = bytes.iter().fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
    Ok(JsonValue::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn test_datetime_keeps_fractional_seconds() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();

        let whole = date.and_hms_opt(14, 5, 7).unwrap();
        assert_eq!(format_datetime(&whole), "2024-03-09 14:05:07");

        let fractional = date.and_hms_micro_opt(14, 5, 7, 123_456).unwrap();
        assert_eq!(format_datetime(&fractional), "2024-03-09 14:05:07.123456");
    }

    #[test]
    fn test_bit_values() {
        assert_eq!(bit_value(&[0x01]).unwrap(), json!(1));
        assert_eq!(bit_value(&[0x01, 0x00]).unwrap(), json!(256));
        assert_eq!(bit_value(&[0xFF; 8]).unwrap(), json!(u64::MAX));
        assert!(bit_value(&[0u8; 9]).is_err());
    }

    #[test]
    fn test_non_finite_float_rejected() {
        assert_eq!(finite_number(1.5).unwrap(), json!(1.5));
        assert!(finite_number(f64::INFINITY).is_err());
        assert!(finite_number(f64::NAN).is_err());
    }
}
