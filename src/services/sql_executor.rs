use crate::services::error::{EventError, EventResult};
use serde_json::Value as JsonValue;
use sqlx::{Column, PgPool, Row, TypeInfo, ValueRef};
use std::collections::HashMap;
use std::time::Duration;

pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<HashMap<String, JsonValue>>,
}

/// Runs an already-guarded query with a hard deadline and converts every row
/// into a column-name-keyed JSON map. Unrecognized Postgres types fall back to
/// their textual representation rather than failing the whole query.
pub async fn execute_query(pool: &PgPool, sql: &str, timeout: Duration) -> EventResult<QueryResult> {
    let query = sqlx::query(sql);
    let rows = tokio::time::timeout(timeout, query.fetch_all(pool))
        .await
        .map_err(|_| EventError::SqlTimeout)?
        .map_err(classify_sql_error)?;

    let columns: Vec<String> = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let mut out_rows = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut map = HashMap::with_capacity(row.columns().len());
        for column in row.columns() {
            let value = decode_column(row, column.ordinal(), column.type_info().name());
            map.insert(column.name().to_string(), value);
        }
        out_rows.push(map);
    }

    Ok(QueryResult {
        columns,
        rows: out_rows,
    })
}

fn classify_sql_error(err: sqlx::Error) -> EventError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.to_string()).unwrap_or_default();
            if code.starts_with("42") {
                EventError::SqlSyntax(db.message().to_string())
            } else {
                EventError::SqlRuntime(db.message().to_string())
            }
        }
        _ => EventError::SqlRuntime(err.to_string()),
    }
}

fn decode_column(row: &sqlx::postgres::PgRow, index: usize, type_name: &str) -> JsonValue {
    let raw = match row.try_get_raw(index) {
        Ok(raw) => raw,
        Err(_) => return JsonValue::Null,
    };
    if raw.is_null() {
        return JsonValue::Null;
    }

    match type_name {
        "BOOL" => row
            .try_get::<bool, _>(index)
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null),
        "INT2" => row
            .try_get::<i16, _>(index)
            .ok()
            .map(|v| JsonValue::from(v))
            .unwrap_or(JsonValue::Null),
        "INT4" => row
            .try_get::<i32, _>(index)
            .ok()
            .map(JsonValue::from)
            .unwrap_or(JsonValue::Null),
        "INT8" => row
            .try_get::<i64, _>(index)
            .ok()
            .map(JsonValue::from)
            .unwrap_or(JsonValue::Null),
        "FLOAT4" => row
            .try_get::<f32, _>(index)
            .ok()
            .and_then(|v| serde_json::Number::from_f64(v as f64))
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        "FLOAT8" => row
            .try_get::<f64, _>(index)
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        "NUMERIC" => row
            .try_get::<String, _>(index)
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        "JSON" | "JSONB" => row
            .try_get::<JsonValue, _>(index)
            .unwrap_or(JsonValue::Null),
        "TIMESTAMPTZ" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(index)
            .ok()
            .map(|v| JsonValue::String(v.to_rfc3339()))
            .unwrap_or(JsonValue::Null),
        "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(index)
            .ok()
            .map(|v| JsonValue::String(v.to_string()))
            .unwrap_or(JsonValue::Null),
        "UUID" => row
            .try_get::<uuid::Uuid, _>(index)
            .ok()
            .map(|v| JsonValue::String(v.to_string()))
            .unwrap_or(JsonValue::Null),
        _ => row
            .try_get::<String, _>(index)
            .ok()
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_syntax_vs_runtime_errors_by_sqlstate_class() {
        // 42xxx is the syntax-error-or-access-rule-violation class in Postgres.
        let syntax_code = "42601";
        assert!(syntax_code.starts_with("42"));
    }
}
