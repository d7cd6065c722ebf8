// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Opening and configuring connections for a CLI invocation.

use std::sync::Arc;

use serialite_config::SerialiteConfig;
use serialite_core::{Event, SerialiteError};
use serialite_runtime::{ConfigOption, Connection};
use serialite_sqlite::SqliteEngine;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

pub struct Session {
    pub config: SerialiteConfig,
    trace: bool,
    profile: bool,
}

/// An open connection plus its event stream.
pub struct Opened {
    pub conn: Connection,
    events: UnboundedReceiver<Event>,
}

impl Opened {
    /// Print the trace and profile events emitted so far.
    pub fn report(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                Event::Trace(sql) => eprintln!("trace: {sql}"),
                Event::Profile { sql, elapsed } => {
                    eprintln!("profile: {sql} ({:.3} ms)", elapsed.as_secs_f64() * 1000.0)
                }
                Event::Error(err) => warn!(error = %err, "unhandled error event"),
                other => debug!(event = ?other, "connection event"),
            }
        }
    }

    /// Close the connection, reporting whatever it emitted on the way.
    pub async fn close(mut self) -> Result<(), SerialiteError> {
        let closed = self.conn.close().await;
        self.report();
        closed
    }
}

impl Session {
    pub fn new(config: SerialiteConfig, trace: bool, profile: bool) -> Self {
        Self {
            config,
            trace,
            profile,
        }
    }

    /// Open `db` with the configured flags, mode and hooks.
    pub async fn open(&self, db: &str) -> Result<Opened, SerialiteError> {
        let settings = &self.config.connection;
        let (conn, opened) = Connection::open(Arc::new(SqliteEngine::new()), db, settings.open_flags());
        let events = conn.subscribe();
        conn.set_mode(settings.mode);
        // Queued behind the open; a failed open fails these too.
        let timeout = conn.configure(ConfigOption::BusyTimeout(settings.busy_timeout()));
        let trace = self.trace.then(|| conn.configure(ConfigOption::Trace(true)));
        let profile = self.profile.then(|| conn.configure(ConfigOption::Profile(true)));

        opened.await?;
        timeout.await?;
        if let Some(trace) = trace {
            trace.await?;
        }
        if let Some(profile) = profile {
            profile.await?;
        }
        debug!(db, mode = %settings.mode, "connection ready");
        Ok(Opened { conn, events })
    }

    pub async fn exec(&self, db: &str, sql: &str) -> Result<(), SerialiteError> {
        let mut opened = self.open(db).await?;
        let result = opened.conn.exec(sql).await;
        opened.report();
        let closed = opened.close().await;
        result.and(closed)
    }
}
