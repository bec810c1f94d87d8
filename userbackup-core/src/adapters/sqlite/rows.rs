//! Conversion of SQLite rows into backup rows.
//!
//! SQLite types values, not columns, so each cell is decoded by the storage
//! class it actually holds. BLOBs become `base64:`-prefixed strings.
//!
//! A cell that cannot be represented exactly (non-UTF-8 text, a non-finite
//! REAL) is an `Encoding` error; it is never replaced by `null`.

use crate::Result;
use crate::error::UserBackupError;
use crate::models::Row;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Number, Value as JsonValue};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

/// Converts a fetched row of `table`, keeping column order.
///
/// # Errors
/// Returns an `Encoding` error naming the first column whose value cannot
/// be represented in the backup document.
pub fn row_to_json(row: &SqliteRow, table: &str) -> Result<Row> {
    row.columns()
        .iter()
        .map(|column| {
            let value = cell(row, column.ordinal()).map_err(|reason| {
                UserBackupError::encoding(table, format!("column '{}': {}", column.name(), reason))
            })?;
            Ok((column.name().to_string(), value))
        })
        .collect()
}

fn cell(row: &SqliteRow, index: usize) -> std::result::Result<JsonValue, String> {
    let raw = row.try_get_raw(index).map_err(|e| e.to_string())?;
    if raw.is_null() {
        return Ok(JsonValue::Null);
    }
    let class = raw.type_info().name().to_string();

    match class.as_str() {
        "INTEGER" => row
            .try_get::<i64, _>(index)
            .map(JsonValue::from)
            .map_err(|e| e.to_string()),
        "REAL" => {
            let value = row.try_get::<f64, _>(index).map_err(|e| e.to_string())?;
            Number::from_f64(value)
                .map(JsonValue::Number)
                .ok_or_else(|| format!("non-finite REAL value {}", value))
        }
        "TEXT" => row
            .try_get::<String, _>(index)
            .map(JsonValue::String)
            .map_err(|e| format!("TEXT value is not valid UTF-8: {}", e)),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(index)
            .map(|bytes| JsonValue::String(format!("base64:{}", STANDARD.encode(bytes))))
            .map_err(|e| e.to_string()),
        other => Err(format!("unsupported storage class {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::SqlitePool;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_row_to_json_storage_classes() {
        let pool = pool().await;
        let row = sqlx::query(
            "SELECT 1 AS id, 'Alice' AS name, 2.5 AS score, NULL AS note, X'CAFE' AS raw",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        let decoded = row_to_json(&row, "t").unwrap();
        let keys: Vec<&str> = decoded.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["id", "name", "score", "note", "raw"]);
        assert_eq!(decoded["id"], json!(1));
        assert_eq!(decoded["name"], json!("Alice"));
        assert_eq!(decoded["score"], json!(2.5));
        assert_eq!(decoded["note"], JsonValue::Null);
        assert_eq!(decoded["raw"], json!("base64:yv4="));
    }

    #[tokio::test]
    async fn test_mixed_classes_in_one_column() {
        let pool = pool().await;
        sqlx::query("CREATE TABLE loose (v)").execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO loose (v) VALUES (7), ('seven'), (7.5)")
            .execute(&pool)
            .await
            .unwrap();

        let rows = sqlx::query("SELECT v FROM loose ORDER BY rowid")
            .fetch_all(&pool)
            .await
            .unwrap();
        let values: Vec<JsonValue> = rows
            .iter()
            .map(|r| row_to_json(r, "loose").unwrap()["v"].clone())
            .collect();

        assert_eq!(values, vec![json!(7), json!("seven"), json!(7.5)]);
    }

    #[tokio::test]
    async fn test_non_finite_real_is_an_encoding_error() {
        let pool = pool().await;
        let row = sqlx::query("SELECT 1 AS id, 9e999 AS amount")
            .fetch_one(&pool)
            .await
            .unwrap();

        match row_to_json(&row, "ledger") {
            Err(UserBackupError::Encoding { table, reason }) => {
                assert_eq!(table, "ledger");
                assert!(reason.contains("amount"), "{}", reason);
            }
            other => panic!("expected encoding error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_utf8_text_is_an_encoding_error() {
        let pool = pool().await;
        let row = sqlx::query("SELECT CAST(X'FFFE' AS TEXT) AS note")
            .fetch_one(&pool)
            .await
            .unwrap();

        let result = row_to_json(&row, "notes");
        assert!(matches!(result, Err(UserBackupError::Encoding { .. })));
    }
}
