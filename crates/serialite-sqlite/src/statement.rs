// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Statements backed by the connection's prepared-statement cache.
//!
//! A `rusqlite::Statement` borrows its connection, so the handle keeps the
//! SQL text and binding instead. The first step after a bind or reset runs
//! the cached statement to completion and buffers its rows; later steps drain
//! the buffer.

use std::collections::VecDeque;
use std::sync::Arc;

use rusqlite::types::{ToSqlOutput, ValueRef};
use serialite_core::{EngineError, EngineResult, Params, Row, RunResult, Status, Step, StmtHandle, Value};

use crate::db::DbShared;
use crate::error::{closed, engine_error};

pub(crate) struct SqliteStmt {
    shared: Arc<DbShared>,
    sql: String,
    params: Params,
    rows: Option<VecDeque<Row>>,
    info: RunResult,
}

impl SqliteStmt {
    pub(crate) fn new(shared: Arc<DbShared>, sql: &str) -> Self {
        shared.acquire();
        Self {
            shared,
            sql: sql.to_string(),
            params: Params::None,
            rows: None,
            info: RunResult::default(),
        }
    }

    fn execute(&self) -> EngineResult<(VecDeque<Row>, RunResult)> {
        let guard = self.shared.lock();
        let conn = guard.as_ref().ok_or_else(closed)?;
        self.shared.traced(conn, &self.sql, |conn| {
            let mut stmt = conn.prepare_cached(&self.sql).map_err(engine_error)?;
            bind_all(&mut stmt, &self.params)?;
            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

            let mut buffered = VecDeque::new();
            let mut rows = stmt.raw_query();
            while let Some(row) = rows.next().map_err(engine_error)? {
                let mut columns = Vec::with_capacity(names.len());
                for (idx, name) in names.iter().enumerate() {
                    let value = row.get_ref(idx).map_err(engine_error)?;
                    columns.push((name.clone(), from_sql(value)));
                }
                buffered.push_back(Row::new(columns));
            }
            let info = RunResult {
                last_insert_id: conn.last_insert_rowid(),
                changes: conn.changes() as u64,
            };
            Ok((buffered, info))
        })
    }
}

impl StmtHandle for SqliteStmt {
    fn bind(&mut self, params: &Params) -> EngineResult<()> {
        {
            let guard = self.shared.lock();
            let conn = guard.as_ref().ok_or_else(closed)?;
            let mut stmt = conn.prepare_cached(&self.sql).map_err(engine_error)?;
            bind_all(&mut stmt, params)?;
        }
        self.params = params.clone();
        self.rows = None;
        Ok(())
    }

    fn step(&mut self) -> EngineResult<Step> {
        if self.rows.is_none() {
            let (rows, info) = self.execute()?;
            self.rows = Some(rows);
            self.info = info;
        }
        Ok(match self.rows.as_mut().and_then(VecDeque::pop_front) {
            Some(row) => Step::Row(row),
            None => Step::Done,
        })
    }

    fn reset(&mut self) {
        self.rows = None;
    }

    fn run_info(&self) -> RunResult {
        self.info
    }

    fn finalize(self: Box<Self>) {}
}

impl Drop for SqliteStmt {
    fn drop(&mut self) {
        self.shared.release();
    }
}

/// Binds every parameter slot, so values left over from an earlier use of
/// the cached statement never leak into this one.
fn bind_all(stmt: &mut rusqlite::Statement<'_>, params: &Params) -> EngineResult<()> {
    for idx in 1..=stmt.parameter_count() {
        stmt.raw_bind_parameter(idx, ToSqlOutput::Borrowed(ValueRef::Null)).map_err(engine_error)?;
    }
    match params {
        Params::None => {}
        Params::Positional(values) => {
            for (idx, value) in values.iter().enumerate() {
                if idx >= stmt.parameter_count() {
                    return Err(EngineError::new(Status::RANGE, Status::RANGE.describe()));
                }
                stmt.raw_bind_parameter(idx + 1, ToSqlOutput::Borrowed(to_sql(value))).map_err(engine_error)?;
            }
        }
        Params::Named(pairs) => {
            for (name, value) in pairs {
                let idx = stmt
                    .parameter_index(name)
                    .map_err(engine_error)?
                    .ok_or_else(|| EngineError::new(Status::RANGE, format!("no such parameter: {name}")))?;
                stmt.raw_bind_parameter(idx, ToSqlOutput::Borrowed(to_sql(value))).map_err(engine_error)?;
            }
        }
    }
    Ok(())
}

fn to_sql(value: &Value) -> ValueRef<'_> {
    match value {
        Value::Null => ValueRef::Null,
        Value::Integer(v) => ValueRef::Integer(*v),
        Value::Real(v) => ValueRef::Real(*v),
        Value::Text(v) => ValueRef::Text(v.as_bytes()),
        Value::Blob(v) => ValueRef::Blob(v),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => Value::Blob(v.to_vec()),
    }
}
