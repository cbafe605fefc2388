//! Read-only SQL and pagination over stored payloads.
//!
//! SQL queries run against a synthetic table `results` materialized in a
//! scratch in-memory SQLite connection. Only a single SELECT statement is
//! accepted; everything else is rejected before touching the database.

use rusqlite::Connection;
use serde_json::{json, Value};

use strand_domain::error::{Error, Result};

use crate::detect::DataType;
use crate::store::{QueryOutput, QuerySpec};

/// Dispatch a query against raw payload bytes.
pub fn run_query(bytes: &[u8], data_type: DataType, spec: &QuerySpec) -> Result<QueryOutput> {
    if data_type == DataType::JsonObject {
        return Err(Error::InvalidInput(
            "data_type json_object cannot be retrieved wholesale; \
             call get_tool_result and follow the metadata retrieval_hints"
                .into(),
        ));
    }
    match spec {
        QuerySpec::Sql(sql) => match data_type {
            DataType::JsonArray | DataType::Csv => sql_query(bytes, data_type, sql),
            DataType::Text | DataType::JsonObject => Err(Error::InvalidInput(format!(
                "SQL queries are not supported for data_type {}; use offset/limit pagination",
                data_type.as_str()
            ))),
        },
        QuerySpec::Page { offset, limit } => paginate(bytes, data_type, *offset, *limit),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SQL path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single SELECT, no trailing statements. Keeps the scratch connection
/// read-only without relying on SQLite authorizer hooks.
fn ensure_read_only(sql: &str) -> Result<()> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if !trimmed.to_ascii_lowercase().starts_with("select") {
        return Err(Error::InvalidInput(
            "only SELECT statements are allowed against tool results".into(),
        ));
    }
    if trimmed.contains(';') {
        return Err(Error::InvalidInput(
            "multiple SQL statements are not allowed".into(),
        ));
    }
    Ok(())
}

fn sql_query(bytes: &[u8], data_type: DataType, sql: &str) -> Result<QueryOutput> {
    ensure_read_only(sql)?;
    let rows = rows_from_payload(bytes, data_type)?;
    let total = rows.len();

    let conn = Connection::open_in_memory()
        .map_err(|e| Error::Internal(format!("scratch db: {e}")))?;
    materialize(&conn, &rows)?;

    let trimmed = sql.trim().trim_end_matches(';');
    let mut stmt = conn
        .prepare(trimmed)
        .map_err(|e| Error::InvalidInput(format!("SQL error: {e}")))?;
    let out_columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut out_rows: Vec<Value> = Vec::new();
    let mut db_rows = stmt
        .query([])
        .map_err(|e| Error::InvalidInput(format!("SQL error: {e}")))?;
    while let Some(row) = db_rows
        .next()
        .map_err(|e| Error::InvalidInput(format!("SQL error: {e}")))?
    {
        let mut object = serde_json::Map::new();
        for (i, name) in out_columns.iter().enumerate() {
            let value: Value = match row.get_ref(i) {
                Ok(rusqlite::types::ValueRef::Null) => Value::Null,
                Ok(rusqlite::types::ValueRef::Integer(n)) => json!(n),
                Ok(rusqlite::types::ValueRef::Real(f)) => json!(f),
                Ok(rusqlite::types::ValueRef::Text(t)) => {
                    json!(String::from_utf8_lossy(t).into_owned())
                }
                Ok(rusqlite::types::ValueRef::Blob(_)) => json!("<blob>"),
                Err(e) => return Err(Error::Internal(format!("row decode: {e}"))),
            };
            object.insert(name.clone(), value);
        }
        out_rows.push(Value::Object(object));
    }

    Ok(QueryOutput {
        row_count: out_rows.len(),
        data: Value::Array(out_rows),
        total: Some(total),
    })
}

/// Decode the payload into uniform row objects.
fn rows_from_payload(bytes: &[u8], data_type: DataType) -> Result<Vec<Value>> {
    match data_type {
        DataType::JsonArray => {
            let elements: Vec<Value> = serde_json::from_slice(bytes)
                .map_err(|e| Error::Corrupt(format!("stored json_array: {e}")))?;
            // Scalar elements become single-column rows.
            Ok(elements
                .into_iter()
                .map(|el| match el {
                    Value::Object(_) => el,
                    other => json!({ "value": other }),
                })
                .collect())
        }
        DataType::Csv => {
            let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);
            let headers: Vec<String> = reader
                .headers()
                .map_err(|e| Error::Corrupt(format!("stored csv: {e}")))?
                .iter()
                .map(str::to_owned)
                .collect();
            let mut rows = Vec::new();
            for record in reader.records() {
                let record = record.map_err(|e| Error::Corrupt(format!("stored csv: {e}")))?;
                let mut row = serde_json::Map::new();
                for (header, field) in headers.iter().zip(record.iter()) {
                    row.insert(header.clone(), json!(field));
                }
                rows.push(Value::Object(row));
            }
            Ok(rows)
        }
        _ => Err(Error::InvalidInput(format!(
            "data_type {} has no tabular form",
            data_type.as_str()
        ))),
    }
}

/// Create the `results` table from row objects and insert everything.
/// All columns are TEXT; the caller casts in SQL where needed.
fn materialize(conn: &Connection, rows: &[Value]) -> Result<()> {
    // Column order: first-seen across all rows.
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        if let Value::Object(map) = row {
            for key in map.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
    }
    if columns.is_empty() {
        columns.push("value".to_owned());
    }

    let column_ddl: Vec<String> = columns.iter().map(|c| format!("{} TEXT", quote_ident(c))).collect();
    conn.execute(
        &format!("CREATE TABLE results ({})", column_ddl.join(", ")),
        [],
    )
    .map_err(|e| Error::Internal(format!("scratch db: {e}")))?;

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let insert = format!(
        "INSERT INTO results ({}) VALUES ({})",
        columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", "),
        placeholders.join(", ")
    );
    let mut stmt = conn
        .prepare(&insert)
        .map_err(|e| Error::Internal(format!("scratch db: {e}")))?;
    for row in rows {
        let values: Vec<Option<String>> = columns
            .iter()
            .map(|column| {
                row.get(column).and_then(|v| match v {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                })
            })
            .collect();
        stmt.execute(rusqlite::params_from_iter(values.iter()))
            .map_err(|e| Error::Internal(format!("scratch db: {e}")))?;
    }
    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pagination path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn paginate(bytes: &[u8], data_type: DataType, offset: usize, limit: usize) -> Result<QueryOutput> {
    match data_type {
        DataType::JsonArray | DataType::Csv => {
            let rows = rows_from_payload(bytes, data_type)?;
            let total = rows.len();
            let page: Vec<Value> = rows.into_iter().skip(offset).take(limit).collect();
            Ok(QueryOutput {
                row_count: page.len(),
                data: Value::Array(page),
                total: Some(total),
            })
        }
        DataType::Text => {
            let text = String::from_utf8_lossy(bytes);
            let chunk: String = text.chars().skip(offset).take(limit).collect();
            Ok(QueryOutput {
                row_count: chunk.chars().count(),
                data: Value::String(chunk),
                total: Some(text.chars().count()),
            })
        }
        DataType::JsonObject => Err(Error::InvalidInput(
            "data_type json_object cannot be paginated; follow the metadata retrieval_hints".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores_payload(n: usize) -> Vec<u8> {
        let elements: Vec<Value> = (0..n)
            .map(|i| json!({"name": format!("user-{i}"), "score": i % 100}))
            .collect();
        serde_json::to_vec(&elements).unwrap()
    }

    #[test]
    fn sql_select_with_cast_and_limit() {
        let bytes = scores_payload(1000);
        let out = run_query(
            &bytes,
            DataType::JsonArray,
            &QuerySpec::Sql(
                "SELECT name, score FROM results \
                 WHERE CAST(score AS REAL) >= 90 \
                 ORDER BY CAST(score AS REAL) DESC LIMIT 10"
                    .into(),
            ),
        )
        .unwrap();
        assert!(out.row_count <= 11);
        assert!(out.row_count > 0);
        let rows = out.data.as_array().unwrap();
        assert_eq!(rows[0]["score"], "99");
    }

    #[test]
    fn sql_rejects_non_select() {
        let bytes = scores_payload(5);
        for sql in ["DELETE FROM results", "DROP TABLE results", "SELECT 1; DROP TABLE results"] {
            let err = run_query(&bytes, DataType::JsonArray, &QuerySpec::Sql(sql.into()));
            assert!(matches!(err, Err(Error::InvalidInput(_))), "allowed {sql:?}");
        }
    }

    #[test]
    fn sql_on_json_object_is_invalid_with_hint() {
        let bytes = serde_json::to_vec(&json!({"a": 1})).unwrap();
        match run_query(&bytes, DataType::JsonObject, &QuerySpec::Sql("SELECT 1".into())) {
            Err(Error::InvalidInput(msg)) => {
                assert!(msg.contains("json_object"));
                assert!(msg.contains("retrieval_hints"));
            }
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn sql_on_text_is_invalid() {
        let err = run_query(b"plain text", DataType::Text, &QuerySpec::Sql("SELECT 1".into()));
        assert!(matches!(err, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn array_pagination() {
        let bytes = scores_payload(50);
        let out = run_query(
            &bytes,
            DataType::JsonArray,
            &QuerySpec::Page { offset: 10, limit: 5 },
        )
        .unwrap();
        assert_eq!(out.row_count, 5);
        assert_eq!(out.total, Some(50));
        assert_eq!(out.data.as_array().unwrap()[0]["name"], "user-10");
    }

    #[test]
    fn text_pagination() {
        let out = run_query(
            b"hello world",
            DataType::Text,
            &QuerySpec::Page { offset: 6, limit: 5 },
        )
        .unwrap();
        assert_eq!(out.data, json!("world"));
    }

    #[test]
    fn scalar_array_gets_value_column() {
        let bytes = serde_json::to_vec(&json!([1, 2, 3, 4])).unwrap();
        let out = run_query(
            &bytes,
            DataType::JsonArray,
            &QuerySpec::Sql("SELECT value FROM results WHERE CAST(value AS INTEGER) > 2".into()),
        )
        .unwrap();
        assert_eq!(out.row_count, 2);
    }

    #[test]
    fn csv_sql_round_trip() {
        let bytes = b"name,score\nalice,91\nbob,85\ncarol,99\n";
        let out = run_query(
            bytes,
            DataType::Csv,
            &QuerySpec::Sql(
                "SELECT name FROM results WHERE CAST(score AS REAL) >= 90 ORDER BY name".into(),
            ),
        )
        .unwrap();
        let rows = out.data.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "alice");
        assert_eq!(rows[1]["name"], "carol");
    }
}
