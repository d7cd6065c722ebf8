// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scriptable in-memory engine for deterministic testing.
//!
//! `MockEngine` implements the engine seam without touching disk. Every engine
//! call goes through one choke point that records `begin:<key>` / `end:<key>`
//! in a shared log, tracks how many calls overlap, parks at an installed
//! [`Gate`] and returns an installed failure.
//!
//! Call keys:
//!
//! | call | key |
//! |---|---|
//! | open | `open:<path>` |
//! | close | `close` |
//! | exec | `exec:<sql>` |
//! | prepare / bind / step / finalize | `prepare:<sql>`, `bind:<sql>`, `step:<sql>`, `finalize:<sql>` |
//! | busy timeout / limit | `busy_timeout`, `limit` |
//! | hooks | `trace_hook`, `profile_hook`, `update_hook` |
//! | extension | `load_extension:<path>` |
//! | backup | `backup_init:<filename>`, `backup_step`, `backup_finish` |

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serialite_core::{
    BackupDirection, BackupHandle, BackupStep, ChangeKind, DbHandle, Engine, EngineError,
    EngineResult, Limit, OpenFlags, Params, ProfileHook, Row, RunResult, Status, Step,
    StmtHandle, TraceHook, UpdateHook,
};

use crate::gate::Gate;

/// Page count reported by every mock backup.
pub const MOCK_BACKUP_PAGES: i32 = 10;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct MockState {
    log: Mutex<Vec<String>>,
    gates: Mutex<HashMap<String, Arc<Gate>>>,
    failures: Mutex<HashMap<String, EngineError>>,
    rows: Mutex<HashMap<String, Vec<Row>>>,
    backup_script: Mutex<VecDeque<Status>>,
    bound: Mutex<Vec<(String, Params)>>,
    hooks: Mutex<MockHooks>,
    live_children: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    interrupts: AtomicUsize,
    last_insert_id: AtomicI64,
}

impl MockState {
    fn record(&self, entry: String) {
        lock(&self.log).push(entry);
    }

    /// The single choke point every engine call goes through.
    fn call<T>(&self, key: String, f: impl FnOnce() -> EngineResult<T>) -> EngineResult<T> {
        self.record(format!("begin:{key}"));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let gate = lock(&self.gates).get(&key).cloned();
        if let Some(gate) = gate {
            gate.pass();
        }

        let failure = lock(&self.failures).get(&key).cloned();
        let result = match failure {
            Some(err) => Err(err),
            None => f(),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.record(format!("end:{key}"));
        result
    }
}

/// A mock engine that returns scripted results.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<MockState>,
}

impl MockEngine {
    /// Create a mock engine with no scripted behavior.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows returned by statements prepared from `sql`.
    pub fn with_rows(self, sql: &str, rows: Vec<Row>) -> Self {
        lock(&self.state.rows).insert(sql.to_string(), rows);
        self
    }

    /// Make the call identified by `key` fail with `err`.
    pub fn with_failure(self, key: &str, err: EngineError) -> Self {
        lock(&self.state.failures).insert(key.to_string(), err);
        self
    }

    /// Statuses returned by successive backup steps; `DONE` once exhausted.
    pub fn with_backup_script(self, statuses: Vec<Status>) -> Self {
        lock(&self.state.backup_script).extend(statuses);
        self
    }

    /// Install a closed gate on `key` and return it.
    pub fn gate(&self, key: &str) -> Arc<Gate> {
        let gate = Gate::new();
        lock(&self.state.gates).insert(key.to_string(), Arc::clone(&gate));
        gate
    }

    /// Snapshot of the call log.
    pub fn log(&self) -> Vec<String> {
        lock(&self.state.log).clone()
    }

    /// Position of `entry` in the call log.
    pub fn position(&self, entry: &str) -> Option<usize> {
        lock(&self.state.log).iter().position(|e| e == entry)
    }

    /// Whether the call log contains `entry`.
    pub fn logged(&self, entry: &str) -> bool {
        self.position(entry).is_some()
    }

    /// Highest number of engine calls observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }

    /// Statements and backups not yet finalized or finished.
    pub fn live_children(&self) -> usize {
        self.state.live_children.load(Ordering::SeqCst)
    }

    pub fn interrupts(&self) -> usize {
        self.state.interrupts.load(Ordering::SeqCst)
    }

    /// Parameters passed to `bind`, in call order, with their statement text.
    pub fn bound(&self) -> Vec<(String, Params)> {
        lock(&self.state.bound).clone()
    }
}

impl Engine for MockEngine {
    fn open(&self, path: &str, _flags: OpenFlags) -> EngineResult<Arc<dyn DbHandle>> {
        let state = Arc::clone(&self.state);
        self.state.call(format!("open:{path}"), || {
            Ok(Arc::new(MockDb { state }) as Arc<dyn DbHandle>)
        })
    }
}

#[derive(Default)]
struct MockHooks {
    trace: Option<TraceHook>,
    profile: Option<ProfileHook>,
    update: Option<UpdateHook>,
}

struct MockDb {
    state: Arc<MockState>,
}

/// Table touched by a write statement, if `sql` is one.
fn write_target(sql: &str) -> Option<(ChangeKind, String)> {
    let words: Vec<&str> = sql.split_whitespace().collect();
    let verb = words.first()?.to_ascii_uppercase();
    let (kind, table) = match verb.as_str() {
        "INSERT" => (ChangeKind::Insert, words.get(2)?),
        "UPDATE" => (ChangeKind::Update, words.get(1)?),
        "DELETE" => (ChangeKind::Delete, words.get(2)?),
        _ => return None,
    };
    let table = table.trim_matches(|c: char| !c.is_alphanumeric() && c != '_');
    Some((kind, table.to_string()))
}

impl MockState {
    /// Fire the installed hooks the way the engine does for one statement.
    fn fire_hooks(&self, sql: &str) {
        let hooks = lock(&self.hooks);
        if let Some(trace) = &hooks.trace {
            trace(sql);
        }
        if let Some((kind, table)) = write_target(sql) {
            let rowid = if kind == ChangeKind::Insert {
                self.last_insert_id.fetch_add(1, Ordering::SeqCst) + 1
            } else {
                self.last_insert_id.load(Ordering::SeqCst)
            };
            if let Some(update) = &hooks.update {
                update(kind, "main", &table, rowid);
            }
        }
        if let Some(profile) = &hooks.profile {
            profile(sql, Duration::from_millis(1));
        }
    }
}

impl DbHandle for MockDb {
    fn close(&self) -> EngineResult<()> {
        self.state.call("close".into(), || {
            if self.state.live_children.load(Ordering::SeqCst) > 0 {
                return Err(EngineError::new(
                    Status::BUSY,
                    "unable to close due to unfinalized statements or unfinished backups",
                ));
            }
            Ok(())
        })
    }

    fn exec(&self, sql: &str) -> EngineResult<()> {
        self.state.call(format!("exec:{sql}"), || {
            self.state.fire_hooks(sql);
            Ok(())
        })
    }

    fn prepare(&self, sql: &str) -> EngineResult<Box<dyn StmtHandle>> {
        self.state.call(format!("prepare:{sql}"), || {
            let rows = lock(&self.state.rows).get(sql).cloned().unwrap_or_default();
            self.state.live_children.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockStmt {
                state: Arc::clone(&self.state),
                sql: sql.to_string(),
                rows,
                cursor: 0,
                changes: 0,
            }) as Box<dyn StmtHandle>)
        })
    }

    fn busy_timeout(&self, _timeout: Duration) -> EngineResult<()> {
        self.state.call("busy_timeout".into(), || Ok(()))
    }

    fn set_limit(&self, _limit: Limit, value: i32) -> EngineResult<i32> {
        self.state.call("limit".into(), || Ok(value))
    }

    fn load_extension(&self, path: &str) -> EngineResult<()> {
        self.state.call(format!("load_extension:{path}"), || Ok(()))
    }

    fn interrupt(&self) {
        self.state.interrupts.fetch_add(1, Ordering::SeqCst);
    }

    fn set_trace_hook(&self, hook: Option<TraceHook>) -> EngineResult<()> {
        self.state.call("trace_hook".into(), || {
            lock(&self.state.hooks).trace = hook;
            Ok(())
        })
    }

    fn set_profile_hook(&self, hook: Option<ProfileHook>) -> EngineResult<()> {
        self.state.call("profile_hook".into(), || {
            lock(&self.state.hooks).profile = hook;
            Ok(())
        })
    }

    fn set_update_hook(&self, hook: Option<UpdateHook>) -> EngineResult<()> {
        self.state.call("update_hook".into(), || {
            lock(&self.state.hooks).update = hook;
            Ok(())
        })
    }

    fn backup(
        &self,
        filename: &str,
        _source_name: &str,
        _dest_name: &str,
        _direction: BackupDirection,
    ) -> EngineResult<Box<dyn BackupHandle>> {
        self.state.call(format!("backup_init:{filename}"), || {
            self.state.live_children.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockBackup {
                state: Arc::clone(&self.state),
                remaining: MOCK_BACKUP_PAGES,
            }) as Box<dyn BackupHandle>)
        })
    }
}

struct MockStmt {
    state: Arc<MockState>,
    sql: String,
    rows: Vec<Row>,
    cursor: usize,
    changes: u64,
}

impl StmtHandle for MockStmt {
    fn bind(&mut self, params: &Params) -> EngineResult<()> {
        self.state.call(format!("bind:{}", self.sql), || {
            lock(&self.state.bound).push((self.sql.clone(), params.clone()));
            Ok(())
        })?;
        self.cursor = 0;
        Ok(())
    }

    fn step(&mut self) -> EngineResult<Step> {
        let key = format!("step:{}", self.sql);
        let state = Arc::clone(&self.state);
        state.call(key, || {
            if self.cursor == 0 {
                self.state.fire_hooks(&self.sql);
            }
            if let Some(row) = self.rows.get(self.cursor) {
                self.cursor += 1;
                return Ok(Step::Row(row.clone()));
            }
            if self.cursor == self.rows.len() {
                self.cursor += 1;
                if write_target(&self.sql).is_some() {
                    self.changes = 1;
                }
            }
            Ok(Step::Done)
        })
    }

    fn reset(&mut self) {
        self.cursor = 0;
        self.state.record(format!("reset:{}", self.sql));
    }

    fn run_info(&self) -> RunResult {
        RunResult {
            last_insert_id: self.state.last_insert_id.load(Ordering::SeqCst),
            changes: self.changes,
        }
    }

    fn finalize(self: Box<Self>) {
        let _ = self.state.call(format!("finalize:{}", self.sql), || Ok(()));
    }
}

impl Drop for MockStmt {
    fn drop(&mut self) {
        self.state.live_children.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockBackup {
    state: Arc<MockState>,
    remaining: i32,
}

impl BackupHandle for MockBackup {
    fn step(&mut self, pages: i32) -> BackupStep {
        let scripted = lock(&self.state.backup_script).pop_front();
        let status = self
            .state
            .call("backup_step".into(), || Ok(scripted.unwrap_or(Status::DONE)))
            .unwrap_or_else(|err| err.status);
        match status {
            Status::OK if pages < 0 => self.remaining = 0,
            Status::OK => self.remaining = (self.remaining - pages).max(1),
            Status::DONE => self.remaining = 0,
            _ => {}
        }
        BackupStep {
            status,
            remaining: self.remaining,
            page_count: MOCK_BACKUP_PAGES,
        }
    }

    fn finish(self: Box<Self>) {
        let _ = self.state.call("backup_finish".into(), || Ok(()));
    }
}

impl Drop for MockBackup {
    fn drop(&mut self) {
        self.state.live_children.fetch_sub(1, Ordering::SeqCst);
    }
}
