// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Engine-level tests that drive the handles directly, without a runtime.

use std::sync::{Arc, Mutex};

use serialite_core::{
    BackupDirection, ChangeKind, DbHandle, Engine, Limit, OpenFlags, Params, Status, Step, Value,
};
use serialite_sqlite::SqliteEngine;

fn open_memory() -> Arc<dyn DbHandle> {
    SqliteEngine::new().open(":memory:", OpenFlags::default()).unwrap()
}

fn int_column(step: Step) -> Option<i64> {
    match step {
        Step::Row(row) => match row.columns.first() {
            Some((_, Value::Integer(v))) => Some(*v),
            _ => None,
        },
        Step::Done => None,
    }
}

#[test]
fn open_failure_reports_cantopen() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing").join("db.sqlite");
    let err = SqliteEngine::new()
        .open(missing.to_str().unwrap(), OpenFlags::READ_WRITE)
        .err()
        .unwrap();
    assert_eq!(err.status.primary(), Status::CANTOPEN);
}

#[test]
fn steps_buffered_rows_then_done() {
    let db = open_memory();
    db.exec("CREATE TABLE t (n INTEGER); INSERT INTO t VALUES (1), (2);").unwrap();
    let mut stmt = db.prepare("SELECT n FROM t ORDER BY n").unwrap();

    assert_eq!(int_column(stmt.step().unwrap()), Some(1));
    assert_eq!(int_column(stmt.step().unwrap()), Some(2));
    assert_eq!(stmt.step().unwrap(), Step::Done);

    stmt.reset();
    assert_eq!(int_column(stmt.step().unwrap()), Some(1));
    stmt.finalize();
}

#[test]
fn binding_replaces_earlier_values() {
    let db = open_memory();
    db.exec("CREATE TABLE t (a, b)").unwrap();
    let mut insert = db.prepare("INSERT INTO t VALUES (?, ?)").unwrap();
    insert
        .bind(&Params::Positional(vec![Value::Integer(1), Value::Integer(2)]))
        .unwrap();
    assert_eq!(insert.step().unwrap(), Step::Done);
    assert_eq!(insert.run_info().last_insert_id, 1);
    assert_eq!(insert.run_info().changes, 1);

    // Only the first slot this time; the second must not keep the old 2.
    insert.bind(&Params::Positional(vec![Value::Integer(3)])).unwrap();
    insert.step().unwrap();
    drop(insert);

    let mut check = db.prepare("SELECT count(*) FROM t WHERE b IS NULL").unwrap();
    assert_eq!(int_column(check.step().unwrap()), Some(1));
}

#[test]
fn named_parameters_bind_by_name() {
    let db = open_memory();
    let mut stmt = db.prepare("SELECT :x + :y").unwrap();
    stmt.bind(&Params::Named(vec![
        (":y".into(), Value::Integer(2)),
        (":x".into(), Value::Integer(40)),
    ]))
    .unwrap();
    assert_eq!(int_column(stmt.step().unwrap()), Some(42));

    let err = stmt
        .bind(&Params::Named(vec![(":z".into(), Value::Null)]))
        .unwrap_err();
    assert_eq!(err.status, Status::RANGE);
}

#[test]
fn too_many_positional_values_is_a_range_error() {
    let db = open_memory();
    let mut stmt = db.prepare("SELECT ?").unwrap();
    let err = stmt
        .bind(&Params::Positional(vec![Value::Integer(1), Value::Integer(2)]))
        .unwrap_err();
    assert_eq!(err.status, Status::RANGE);
}

#[test]
fn syntax_errors_surface_at_prepare() {
    let db = open_memory();
    let err = db.prepare("SELEC 1").err().unwrap();
    assert_eq!(err.status, Status::ERROR);
    assert!(err.message.contains("syntax error"));
}

#[test]
fn close_is_busy_while_statements_live() {
    let db = open_memory();
    let stmt = db.prepare("SELECT 1").unwrap();
    assert_eq!(db.close().unwrap_err().status, Status::BUSY);
    db.exec("SELECT 1").unwrap();

    stmt.finalize();
    db.close().unwrap();
    assert_eq!(db.exec("SELECT 1").unwrap_err().status, Status::MISUSE);
}

#[test]
fn hooks_observe_sql_and_changes() {
    let db = open_memory();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let traces = Arc::clone(&seen);
    db.set_trace_hook(Some(Box::new(move |sql: &str| {
        traces.lock().unwrap().push(format!("trace {sql}"));
    })))
    .unwrap();
    let changes = Arc::clone(&seen);
    db.set_update_hook(Some(Box::new(
        move |kind: ChangeKind, _db: &str, table: &str, rowid: i64| {
            changes.lock().unwrap().push(format!("{kind} {table} {rowid}"));
        },
    )))
    .unwrap();

    db.exec("CREATE TABLE t (x)").unwrap();
    db.exec("INSERT INTO t VALUES (1)").unwrap();
    db.set_trace_hook(None).unwrap();
    db.set_update_hook(None).unwrap();
    db.exec("DELETE FROM t").unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "trace CREATE TABLE t (x)".to_string(),
            "trace INSERT INTO t VALUES (1)".to_string(),
            "insert t 1".to_string(),
        ]
    );
}

#[test]
fn update_hook_replacement_and_closed_handle() {
    let db = open_memory();
    db.exec("CREATE TABLE t (x)").unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    for tag in ["first", "second"] {
        let changes = Arc::clone(&seen);
        db.set_update_hook(Some(Box::new(
            move |kind: ChangeKind, _db: &str, _table: &str, rowid: i64| {
                changes.lock().unwrap().push(format!("{tag} {kind} {rowid}"));
            },
        )))
        .unwrap();
    }
    db.exec("INSERT INTO t VALUES (1)").unwrap();
    db.set_update_hook(None).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["second insert 1".to_string()]);

    db.close().unwrap();
    let err = db.set_update_hook(None).err().unwrap();
    assert_eq!(err.status.primary(), Status::MISUSE);
}

#[test]
fn set_limit_returns_the_previous_value() {
    let db = open_memory();
    let original = db.set_limit(Limit::Attached, 1).unwrap();
    assert!(original >= 1);
    assert_eq!(db.set_limit(Limit::Attached, original).unwrap(), 1);
}

#[test]
fn backup_round_trips_through_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("copy.db");
    let target = target.to_str().unwrap();

    let db = open_memory();
    db.exec("CREATE TABLE t (x); INSERT INTO t VALUES ('kept');").unwrap();
    let mut backup = db.backup(target, "main", "main", BackupDirection::ToFile).unwrap();
    let step = backup.step(-1);
    assert_eq!(step.status, Status::DONE);
    assert_eq!(step.remaining, 0);
    assert!(step.page_count > 0);
    assert_eq!(db.close().unwrap_err().status, Status::BUSY);
    backup.finish();

    let restored = open_memory();
    let mut restore = restored
        .backup(target, "main", "main", BackupDirection::FromFile)
        .unwrap();
    assert_eq!(restore.step(-1).status, Status::DONE);
    restore.finish();

    let mut stmt = restored.prepare("SELECT x FROM t").unwrap();
    match stmt.step().unwrap() {
        Step::Row(row) => assert_eq!(row.get("x"), Some(&Value::Text("kept".into()))),
        Step::Done => panic!("restored table is empty"),
    }
}
