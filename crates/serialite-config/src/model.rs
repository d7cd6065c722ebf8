// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model.
//!
//! Every struct uses `#[serde(deny_unknown_fields)]` so a misspelled key is
//! reported at load time instead of being silently ignored.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serialite_core::{ExecutionMode, OpenFlags, Status};

/// Top-level Serialite configuration. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SerialiteConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub backup: BackupConfig,

    /// Owning thread and worker pool.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// How connections are opened and scheduled.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Initial execution mode of every connection.
    #[serde(default)]
    pub mode: ExecutionMode,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default)]
    pub read_only: bool,

    /// Create the database file if missing. Ignored when `read_only`.
    #[serde(default = "default_true")]
    pub create: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            busy_timeout_ms: default_busy_timeout_ms(),
            read_only: false,
            create: true,
        }
    }
}

impl ConnectionConfig {
    pub fn open_flags(&self) -> OpenFlags {
        let access = if self.read_only {
            OpenFlags::READ_ONLY
        } else if self.create {
            OpenFlags::READ_WRITE | OpenFlags::CREATE
        } else {
            OpenFlags::READ_WRITE
        };
        access | OpenFlags::FULL_MUTEX
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Online backup behavior.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    /// Status names (`"BUSY"`, `"SQLITE_LOCKED"`) a step may fail with and
    /// still leave the backup usable.
    #[serde(default = "default_retry_errors")]
    pub retry_errors: Vec<String>,

    /// Pages copied per step; negative copies everything at once.
    #[serde(default = "default_step_pages")]
    pub step_pages: i32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            retry_errors: default_retry_errors(),
            step_pages: default_step_pages(),
        }
    }
}

impl BackupConfig {
    /// Resolve `retry_errors` to status codes, failing on the first unknown
    /// name.
    pub fn retry_statuses(&self) -> Result<Vec<Status>, String> {
        self.retry_errors.iter().map(|name| name.parse()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Upper bound on engine calls running at once.
    #[serde(default = "default_max_worker_threads")]
    pub max_worker_threads: usize,

    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_worker_threads: default_max_worker_threads(),
            thread_name: default_thread_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Default level for `serialite` targets (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_busy_timeout_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_retry_errors() -> Vec<String> {
    vec!["BUSY".to_string(), "LOCKED".to_string()]
}

fn default_step_pages() -> i32 {
    100
}

fn default_max_worker_threads() -> usize {
    8
}

fn default_thread_name() -> String {
    "serialite-worker".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
