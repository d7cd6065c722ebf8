// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `serialite query`: stream rows to stdout as JSON lines.

use std::io::Write;

use serialite_core::{Row, SerialiteError, Value};
use tracing::debug;

use crate::session::Session;

pub async fn run_query(session: &Session, db: &str, sql: &str) -> Result<(), SerialiteError> {
    let mut opened = session.open(db).await?;
    let result = opened
        .conn
        .each(sql.to_string(), (), |row| {
            let mut out = std::io::stdout().lock();
            // A closed stdout (e.g. piped into `head`) ends output, not the query.
            let _ = writeln!(out, "{}", row_to_json(&row));
        })
        .await;
    opened.report();
    let closed = opened.close().await;
    let count = result?;
    debug!(rows = count, "query finished");
    closed
}

/// One JSON object per row, keyed by column name in column order.
pub fn row_to_json(row: &Row) -> serde_json::Value {
    let map = row
        .columns
        .iter()
        .map(|(name, value)| (name.clone(), value_to_json(value)))
        .collect();
    serde_json::Value::Object(map)
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(v) => serde_json::Value::from(*v),
        // Non-finite reals have no JSON form.
        Value::Real(v) => serde_json::Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(v) => serde_json::Value::String(v.clone()),
        Value::Blob(bytes) => bytes.iter().copied().map(serde_json::Value::from).collect(),
    }
}
