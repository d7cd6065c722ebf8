// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection scheduling against the mock engine.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use serialite_core::{
    Change, ChangeKind, EngineError, Event, ExecutionMode, Limit, OpenFlags, SerialiteError,
    Status,
};
use serialite_runtime::{ConfigOption, Connection, Lifecycle, Pending, Reply};
use serialite_test_utils::{MockEngine, eventually, run_local};
use tokio::sync::mpsc::UnboundedReceiver;

const PATH: &str = "/mock.db";

fn open(engine: &MockEngine) -> (Connection, Pending<()>) {
    Connection::open(Arc::new(engine.clone()), PATH, OpenFlags::default())
}

fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn count(engine: &MockEngine, entry: &str) -> usize {
    engine.log().iter().filter(|e| *e == entry).count()
}

fn last_position(engine: &MockEngine, entry: &str) -> Option<usize> {
    engine.log().iter().rposition(|e| e == entry)
}

fn limit(value: i32) -> ConfigOption {
    ConfigOption::Limit {
        limit: Limit::SqlLength,
        value,
    }
}

#[tokio::test]
async fn open_installs_busy_timeout_and_emits_open() {
    run_local(async {
        let engine = MockEngine::new();
        let (conn, opened) = open(&engine);
        let mut events = conn.subscribe();
        assert_eq!(conn.lifecycle(), Lifecycle::Constructing);

        opened.await.unwrap();
        assert!(conn.is_open());
        assert!(conn.is_idle());
        assert_eq!(conn.path(), PATH);
        assert!(engine.position("end:open:/mock.db") < engine.position("begin:busy_timeout"));
        assert_eq!(drain(&mut events), vec![Event::Open]);
    })
    .await;
}

#[tokio::test]
async fn calls_made_before_open_wait_for_it() {
    run_local(async {
        let engine = MockEngine::new();
        let gate = engine.gate("open:/mock.db");
        let (conn, opened) = open(&engine);
        let exec = conn.exec("CREATE TABLE t (x)");

        assert!(eventually(|| gate.waiting() == 1).await);
        assert!(!engine.logged("begin:exec:CREATE TABLE t (x)"));
        gate.open();

        opened.await.unwrap();
        exec.await.unwrap();
        assert!(
            engine.position("end:open:/mock.db")
                < engine.position("begin:exec:CREATE TABLE t (x)")
        );
    })
    .await;
}

#[tokio::test]
async fn exclusive_call_waits_for_in_flight_calls() {
    run_local(async {
        let engine = MockEngine::new();
        let (conn, opened) = open(&engine);
        opened.await.unwrap();

        let setting_gate = engine.gate("limit");
        let prepare_gate = engine.gate("prepare:SELECT 1");
        let setting = conn.configure(limit(1000));
        let (_stmt, prepared) = conn.prepare("SELECT 1");
        let exec = conn.exec("CREATE TABLE t (x)");

        assert!(eventually(|| setting_gate.waiting() == 1 && prepare_gate.waiting() == 1).await);
        assert!(!engine.logged("begin:exec:CREATE TABLE t (x)"));
        assert_eq!(engine.max_concurrency(), 2);
        setting_gate.open();
        prepare_gate.open();

        setting.await.unwrap();
        prepared.await.unwrap();
        exec.await.unwrap();
        let exec_began = engine.position("begin:exec:CREATE TABLE t (x)");
        assert!(last_position(&engine, "end:limit") < exec_began);
        assert!(last_position(&engine, "end:prepare:SELECT 1") < exec_began);
    })
    .await;
}

#[tokio::test]
async fn continuations_fire_in_call_order() {
    run_local(async {
        let engine = MockEngine::new();
        let (conn, opened) = open(&engine);
        opened.await.unwrap();

        let gate = engine.gate("prepare:SELECT 1");
        let order = Rc::new(RefCell::new(Vec::new()));
        let record = |tag: &'static str| {
            let order = Rc::clone(&order);
            Reply::callback(move |result: serialite_core::Result<()>| {
                assert_eq!(result, Ok(()));
                order.borrow_mut().push(tag);
            })
        };
        let _a = conn.prepare_with("SELECT 1", record("A"));
        let _b = conn.prepare_with("SELECT 2", record("B"));
        conn.configure_with(limit(5), record("C"));

        assert!(eventually(|| gate.waiting() == 1).await);
        assert!(
            eventually(|| engine.logged("end:prepare:SELECT 2") && engine.logged("end:limit")).await
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(order.borrow().is_empty());

        gate.open();
        assert!(eventually(|| order.borrow().len() == 3).await);
        assert_eq!(*order.borrow(), vec!["A", "B", "C"]);
    })
    .await;
}

#[tokio::test]
async fn settings_apply_one_at_a_time_in_call_order() {
    run_local(async {
        let engine = MockEngine::new();
        let (conn, opened) = open(&engine);
        opened.await.unwrap();

        let gate = engine.gate("limit");
        let first = conn.configure(limit(1));
        let second = conn.configure(limit(2));
        let (stmt, prepared) = conn.prepare("SELECT 1");

        assert!(eventually(|| gate.waiting() == 1).await);
        assert!(eventually(|| engine.logged("end:prepare:SELECT 1")).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count(&engine, "begin:limit"), 1);
        assert!(!stmt.is_prepared());
        gate.open();

        first.await.unwrap();
        second.await.unwrap();
        prepared.await.unwrap();
        assert_eq!(count(&engine, "begin:limit"), 2);
        let second_began = last_position(&engine, "begin:limit");
        assert!(engine.position("end:limit") < second_began);
        assert_eq!(engine.max_concurrency(), 2);
    })
    .await;
}

#[tokio::test]
async fn trace_toggled_back_off_stays_off() {
    run_local(async {
        let engine = MockEngine::new();
        let (conn, opened) = open(&engine);
        opened.await.unwrap();
        let mut events = conn.subscribe();
        drain(&mut events);

        let gate = engine.gate("trace_hook");
        let on = conn.configure(ConfigOption::Trace(true));
        let off = conn.configure(ConfigOption::Trace(false));
        assert!(eventually(|| gate.waiting() == 1).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count(&engine, "begin:trace_hook"), 1);
        gate.open();
        on.await.unwrap();
        off.await.unwrap();

        conn.exec("CREATE TABLE t (x)").await.unwrap();
        assert!(
            drain(&mut events)
                .iter()
                .all(|event| !matches!(event, Event::Trace(_)))
        );
        conn.close().await.unwrap();
        assert_eq!(count(&engine, "begin:trace_hook"), 2);
    })
    .await;
}

#[tokio::test]
async fn nothing_starts_while_an_exclusive_call_runs() {
    run_local(async {
        let engine = MockEngine::new();
        let (conn, opened) = open(&engine);
        opened.await.unwrap();

        let gate = engine.gate("exec:CREATE TABLE t (x)");
        let exec = conn.exec("CREATE TABLE t (x)");
        let setting = conn.configure(limit(10));
        assert!(!conn.is_idle());

        assert!(eventually(|| gate.waiting() == 1).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!engine.logged("begin:limit"));
        gate.open();

        exec.await.unwrap();
        setting.await.unwrap();
        assert!(engine.position("end:exec:CREATE TABLE t (x)") < engine.position("begin:limit"));
        assert_eq!(engine.max_concurrency(), 1);
    })
    .await;
}

#[tokio::test]
async fn serialize_mode_runs_settings_one_at_a_time() {
    run_local(async {
        let engine = MockEngine::new();
        let (conn, opened) = open(&engine);
        opened.await.unwrap();

        let gate = engine.gate("limit");
        let (first, second) = conn.serialize(|c| {
            assert_eq!(c.mode(), ExecutionMode::Serialize);
            (c.configure(limit(1)), c.configure(limit(2)))
        });
        assert_eq!(conn.mode(), ExecutionMode::Parallel);

        assert!(eventually(|| gate.waiting() == 1).await);
        gate.open();
        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(engine.max_concurrency(), 1);
    })
    .await;
}

#[tokio::test]
async fn set_mode_persists_until_changed() {
    run_local(async {
        let engine = MockEngine::new();
        let (conn, opened) = open(&engine);
        opened.await.unwrap();

        conn.set_mode(ExecutionMode::Serialize);
        assert_eq!(conn.mode(), ExecutionMode::Serialize);
        conn.parallelize(|c| assert_eq!(c.mode(), ExecutionMode::Parallel));
        assert_eq!(conn.mode(), ExecutionMode::Serialize);
        conn.set_mode(ExecutionMode::Parallel);
        assert_eq!(conn.mode(), ExecutionMode::Parallel);
    })
    .await;
}

#[tokio::test]
async fn failed_open_rejects_queued_calls() {
    run_local(async {
        let engine = MockEngine::new().with_failure(
            "open:/mock.db",
            EngineError::new(Status::CANTOPEN, "unable to open database file"),
        );
        let (conn, opened) = open(&engine);
        let exec = conn.exec("CREATE TABLE t (x)");

        assert_eq!(
            opened.await,
            Err(SerialiteError::Engine {
                status: Status::CANTOPEN,
                message: "unable to open database file".into(),
            })
        );
        assert_eq!(exec.await, Err(SerialiteError::misuse("Database is closed")));
        assert_eq!(conn.lifecycle(), Lifecycle::Terminal);
        assert!(!conn.is_open());
    })
    .await;
}

#[tokio::test]
async fn calls_after_close_are_rejected() {
    run_local(async {
        let engine = MockEngine::new();
        let (conn, opened) = open(&engine);
        let mut events = conn.subscribe();
        opened.await.unwrap();

        conn.close().await.unwrap();
        assert!(!conn.is_open());
        assert_eq!(
            conn.exec("SELECT 1").await,
            Err(SerialiteError::misuse("Database is closed"))
        );
        assert_eq!(
            conn.close().await,
            Err(SerialiteError::misuse("Database is closed"))
        );
        assert_eq!(drain(&mut events), vec![Event::Open, Event::Close]);
    })
    .await;
}

#[tokio::test]
async fn unheard_rejections_surface_as_one_error_event() {
    run_local(async {
        let engine = MockEngine::new();
        let (conn, opened) = open(&engine);
        let mut events = conn.subscribe();
        opened.await.unwrap();

        let gate = engine.gate("close");
        let closed = conn.close();
        conn.exec_with("INSERT INTO t VALUES (1)", Reply::none());
        conn.exec_with("INSERT INTO t VALUES (2)", Reply::none());
        assert_eq!(conn.lifecycle(), Lifecycle::Closing);
        assert!(eventually(|| gate.waiting() == 1).await);
        gate.open();

        closed.await.unwrap();
        assert_eq!(
            drain(&mut events),
            vec![
                Event::Open,
                Event::Close,
                Event::Error(SerialiteError::misuse("Database is closed")),
            ]
        );
        assert!(!engine.logged("begin:exec:INSERT INTO t VALUES (1)"));
    })
    .await;
}

#[tokio::test]
async fn unheard_failure_becomes_an_error_event() {
    run_local(async {
        let engine = MockEngine::new().with_failure(
            "exec:DROP TABLE missing",
            EngineError::new(Status::ERROR, "no such table: missing"),
        );
        let (conn, opened) = open(&engine);
        let mut events = conn.subscribe();
        opened.await.unwrap();

        conn.exec_with("DROP TABLE missing", Reply::none());
        conn.wait().await.unwrap();
        assert_eq!(
            drain(&mut events),
            vec![
                Event::Open,
                Event::Error(SerialiteError::Engine {
                    status: Status::ERROR,
                    message: "no such table: missing".into(),
                }),
            ]
        );
    })
    .await;
}

#[tokio::test]
async fn serialized_one_shots_run_in_submission_order() {
    run_local(async {
        let engine = MockEngine::new();
        let gate = engine.gate("open:/mock.db");
        let (conn, opened) = open(&engine);
        let (a, b, c) = conn.serialize(|c| {
            (
                c.run("INSERT INTO t VALUES (1)", ()),
                c.run("INSERT INTO t VALUES (2)", ()),
                c.run("INSERT INTO t VALUES (3)", ()),
            )
        });
        assert!(eventually(|| gate.waiting() == 1).await);
        gate.open();
        opened.await.unwrap();

        let ids: Vec<i64> = vec![
            a.await.unwrap().last_insert_id,
            b.await.unwrap().last_insert_id,
            c.await.unwrap().last_insert_id,
        ];
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(
            engine.position("end:finalize:INSERT INTO t VALUES (1)")
                < engine.position("begin:prepare:INSERT INTO t VALUES (2)")
        );
        assert!(
            engine.position("end:finalize:INSERT INTO t VALUES (2)")
                < engine.position("begin:prepare:INSERT INTO t VALUES (3)")
        );
        assert_eq!(engine.live_children(), 0);
    })
    .await;
}

#[tokio::test]
async fn failed_open_fails_every_queued_one_shot() {
    run_local(async {
        let engine = MockEngine::new().with_failure(
            "open:/mock.db",
            EngineError::new(Status::CANTOPEN, "unable to open database file"),
        );
        let (conn, opened) = open(&engine);
        let runs = conn.serialize(|c| {
            vec![
                c.run("INSERT INTO t VALUES (1)", ()),
                c.run("INSERT INTO t VALUES (2)", ()),
                c.run("INSERT INTO t VALUES (3)", ()),
            ]
        });

        assert!(opened.await.is_err());
        for run in runs {
            assert_eq!(run.await, Err(SerialiteError::misuse("Database is closed")));
        }
        assert!(!engine.log().iter().any(|e| e.starts_with("begin:prepare")));
    })
    .await;
}

#[tokio::test]
async fn one_shot_reports_prepare_failure() {
    run_local(async {
        let engine = MockEngine::new().with_failure(
            "prepare:SELEC 1",
            EngineError::new(Status::ERROR, "near \"SELEC\": syntax error"),
        );
        let (conn, opened) = open(&engine);
        opened.await.unwrap();

        assert_eq!(
            conn.get("SELEC 1", ()).await,
            Err(SerialiteError::Engine {
                status: Status::ERROR,
                message: "near \"SELEC\": syntax error".into(),
            })
        );
        assert!(conn.wait().await.is_ok());
        assert!(conn.is_idle());
    })
    .await;
}

#[tokio::test]
async fn trace_events_arrive_before_the_continuation() {
    run_local(async {
        let engine = MockEngine::new();
        let (conn, opened) = open(&engine);
        opened.await.unwrap();
        let events = Rc::new(RefCell::new(conn.subscribe()));
        drain(&mut events.borrow_mut());

        conn.configure(ConfigOption::Trace(true)).await.unwrap();
        let seen_in_callback = Rc::new(RefCell::new(None));
        let (rx, sink) = (Rc::clone(&events), Rc::clone(&seen_in_callback));
        let (reply, done) = Reply::channel();
        conn.exec_with(
            "INSERT INTO t VALUES (1)",
            Reply::callback(move |result| {
                *sink.borrow_mut() = Some(drain(&mut rx.borrow_mut()));
                let _ = reply.send(result);
            }),
        );
        done.await.unwrap();

        assert_eq!(
            seen_in_callback.borrow_mut().take(),
            Some(vec![Event::Trace("INSERT INTO t VALUES (1)".into())])
        );
    })
    .await;
}

#[tokio::test]
async fn change_and_profile_events_follow_writes() {
    run_local(async {
        let engine = MockEngine::new();
        let (conn, opened) = open(&engine);
        opened.await.unwrap();
        let mut events = conn.subscribe();

        conn.configure(ConfigOption::Change(true)).await.unwrap();
        conn.configure(ConfigOption::Profile(true)).await.unwrap();
        conn.exec("INSERT INTO t VALUES (1)").await.unwrap();

        assert_eq!(
            drain(&mut events),
            vec![
                Event::Change(Change {
                    kind: ChangeKind::Insert,
                    database: "main".into(),
                    table: "t".into(),
                    rowid: 1,
                }),
                Event::Profile {
                    sql: "INSERT INTO t VALUES (1)".into(),
                    elapsed: Duration::from_millis(1),
                },
            ]
        );
    })
    .await;
}

#[tokio::test]
async fn disabled_trace_stops_events() {
    run_local(async {
        let engine = MockEngine::new();
        let (conn, opened) = open(&engine);
        opened.await.unwrap();
        let mut events = conn.subscribe();

        conn.configure(ConfigOption::Trace(true)).await.unwrap();
        conn.exec("CREATE TABLE t (x)").await.unwrap();
        conn.configure(ConfigOption::Trace(false)).await.unwrap();
        conn.exec("CREATE TABLE u (x)").await.unwrap();

        assert_eq!(
            drain(&mut events),
            vec![Event::Trace("CREATE TABLE t (x)".into())]
        );
    })
    .await;
}

#[tokio::test]
async fn close_removes_installed_hooks() {
    run_local(async {
        let engine = MockEngine::new();
        let (conn, opened) = open(&engine);
        opened.await.unwrap();

        conn.configure(ConfigOption::Trace(true)).await.unwrap();
        conn.close().await.unwrap();
        assert_eq!(count(&engine, "begin:trace_hook"), 2);
        assert_eq!(count(&engine, "begin:update_hook"), 0);
        assert!(last_position(&engine, "end:trace_hook") < engine.position("begin:close"));
    })
    .await;
}

#[tokio::test]
async fn refused_close_leaves_the_connection_open() {
    run_local(async {
        let engine = MockEngine::new();
        let (conn, opened) = open(&engine);
        opened.await.unwrap();

        let (stmt, prepared) = conn.prepare("SELECT 1");
        prepared.await.unwrap();
        let refused = conn.close().await;
        assert_eq!(refused.map_err(|e| e.status()), Err(Status::BUSY));
        assert_eq!(conn.lifecycle(), Lifecycle::Ready);
        conn.exec("SELECT 2").await.unwrap();

        stmt.finalize().await.unwrap();
        conn.close().await.unwrap();
        assert_eq!(conn.lifecycle(), Lifecycle::Terminal);
    })
    .await;
}

#[tokio::test]
async fn close_during_prepare_finalizes_the_new_statement() {
    run_local(async {
        let engine = MockEngine::new();
        let (conn, opened) = open(&engine);
        opened.await.unwrap();

        let gate = engine.gate("prepare:SELECT 1");
        let (stmt, prepared) = conn.prepare("SELECT 1");
        let closed = conn.close();
        assert!(eventually(|| gate.waiting() == 1).await);
        gate.open();

        assert_eq!(
            prepared.await,
            Err(SerialiteError::misuse("Database is closing"))
        );
        closed.await.unwrap();
        assert!(stmt.is_finalized());
        assert!(engine.position("end:finalize:SELECT 1") < engine.position("begin:close"));
        assert_eq!(engine.live_children(), 0);
    })
    .await;
}

#[tokio::test]
async fn interrupt_depends_on_lifecycle() {
    run_local(async {
        let engine = MockEngine::new();
        let gate = engine.gate("open:/mock.db");
        let (conn, opened) = open(&engine);
        assert_eq!(
            conn.interrupt(),
            Err(SerialiteError::misuse("Database is not open"))
        );
        assert!(eventually(|| gate.waiting() == 1).await);
        gate.open();
        opened.await.unwrap();

        conn.interrupt().unwrap();
        assert_eq!(engine.interrupts(), 1);

        let close_gate = engine.gate("close");
        let closed = conn.close();
        assert_eq!(
            conn.interrupt(),
            Err(SerialiteError::misuse("Database is closing"))
        );
        assert!(eventually(|| close_gate.waiting() == 1).await);
        close_gate.open();
        closed.await.unwrap();
        assert_eq!(
            conn.interrupt(),
            Err(SerialiteError::misuse("Database is not open"))
        );
    })
    .await;
}

#[tokio::test]
async fn wait_resolves_after_earlier_calls() {
    run_local(async {
        let engine = MockEngine::new();
        let (conn, opened) = open(&engine);
        opened.await.unwrap();

        let gate = engine.gate("exec:CREATE TABLE t (x)");
        let exec = conn.exec("CREATE TABLE t (x)");
        let waited = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&waited);
        let (reply, done) = Reply::channel();
        conn.wait_with(Reply::callback(move |result| {
            *flag.borrow_mut() = true;
            let _ = reply.send(result);
        }));

        assert!(eventually(|| gate.waiting() == 1).await);
        assert!(!*waited.borrow());
        gate.open();
        exec.await.unwrap();
        done.await.unwrap();
        assert!(*waited.borrow());
    })
    .await;
}

#[tokio::test]
async fn load_extension_and_busy_timeout_reach_the_engine() {
    run_local(async {
        let engine = MockEngine::new();
        let (conn, opened) = open(&engine);
        opened.await.unwrap();

        conn.load_extension("/usr/lib/mod_spatial.so").await.unwrap();
        conn.configure(ConfigOption::BusyTimeout(Duration::from_millis(250)))
            .await
            .unwrap();
        assert!(engine.logged("end:load_extension:/usr/lib/mod_spatial.so"));
        assert_eq!(count(&engine, "begin:busy_timeout"), 2);
    })
    .await;
}
