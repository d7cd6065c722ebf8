// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared across the engine seam and the runtime.

use std::ops::BitOr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::status::Status;

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// One result row, columns in statement order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    /// Value of the first column with the given name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Parameters bound to a statement before it is stepped.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    #[default]
    None,
    Positional(Vec<Value>),
    /// Names include their prefix character (`:id`, `@id`, `$id`).
    Named(Vec<(String, Value)>),
}

impl Params {
    pub fn is_empty(&self) -> bool {
        match self {
            Params::None => true,
            Params::Positional(values) => values.is_empty(),
            Params::Named(pairs) => pairs.is_empty(),
        }
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::Positional(values)
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Params::None
    }
}

/// Outcome of a `run`: the connection's last insert rowid and change count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunResult {
    pub last_insert_id: i64,
    pub changes: u64,
}

/// One statement step.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Row(Row),
    Done,
}

/// Progress reported by one backup step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupStep {
    /// `OK` (more pages), `DONE` (finished) or an error code.
    pub status: Status,
    pub remaining: i32,
    pub page_count: i32,
}

/// Which side of a backup the named file is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackupDirection {
    /// Copy the connection's database into the file.
    #[default]
    ToFile,
    /// Copy the file's database into the connection.
    FromFile,
}

/// How a connection orders independent calls.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionMode {
    /// Every call waits for the previous one to finish.
    Serialize,
    /// Non-exclusive calls may overlap on the worker pool.
    #[default]
    Parallel,
}

/// Flags passed to the engine when opening a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub const READ_ONLY: OpenFlags = OpenFlags(0x0000_0001);
    pub const READ_WRITE: OpenFlags = OpenFlags(0x0000_0002);
    pub const CREATE: OpenFlags = OpenFlags(0x0000_0004);
    pub const URI: OpenFlags = OpenFlags(0x0000_0040);
    pub const MEMORY: OpenFlags = OpenFlags(0x0000_0080);
    pub const NO_MUTEX: OpenFlags = OpenFlags(0x0000_8000);
    pub const FULL_MUTEX: OpenFlags = OpenFlags(0x0001_0000);
    pub const SHARED_CACHE: OpenFlags = OpenFlags(0x0002_0000);
    pub const PRIVATE_CACHE: OpenFlags = OpenFlags(0x0004_0000);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        OpenFlags(bits)
    }

    pub const fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        OpenFlags::READ_WRITE | OpenFlags::CREATE | OpenFlags::FULL_MUTEX
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        OpenFlags(self.0 | rhs.0)
    }
}

/// Kind of row change reported by the update hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    Unknown,
}

/// A row change observed on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub kind: ChangeKind,
    pub database: String,
    pub table: String,
    pub rowid: i64,
}

/// Run-time limits that can be adjusted on an open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Limit {
    Length,
    SqlLength,
    Column,
    ExprDepth,
    CompoundSelect,
    VdbeOp,
    FunctionArg,
    Attached,
    LikePatternLength,
    VariableNumber,
    TriggerDepth,
    WorkerThreads,
}

impl Limit {
    /// The engine's numeric limit category.
    pub fn id(self) -> i32 {
        match self {
            Limit::Length => 0,
            Limit::SqlLength => 1,
            Limit::Column => 2,
            Limit::ExprDepth => 3,
            Limit::CompoundSelect => 4,
            Limit::VdbeOp => 5,
            Limit::FunctionArg => 6,
            Limit::Attached => 7,
            Limit::LikePatternLength => 8,
            Limit::VariableNumber => 9,
            Limit::TriggerDepth => 10,
            Limit::WorkerThreads => 11,
        }
    }
}
