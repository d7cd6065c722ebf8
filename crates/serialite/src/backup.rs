// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `serialite backup` command implementation.
//!
//! Copies the database in steps of `step_pages` pages through the runtime's
//! backup resource. A retryable step failure (by default `BUSY` or `LOCKED`)
//! leaves the backup usable, so the loop waits briefly and steps again.

use std::time::Duration;

use serialite_core::SerialiteError;
use serialite_runtime::{Backup, BackupOptions};
use tracing::{debug, info};

use crate::session::Session;

/// Pause between a retryable failure and the next step.
const RETRY_DELAY: Duration = Duration::from_millis(10);

pub async fn run_backup(
    session: &Session,
    db: &str,
    dest: &str,
    pages: Option<i32>,
) -> Result<(), SerialiteError> {
    let settings = &session.config.backup;
    let retry = settings.retry_statuses().map_err(SerialiteError::Config)?;
    let pages = pages.unwrap_or(settings.step_pages);

    let mut opened = session.open(db).await?;
    let (backup, ready) = opened
        .conn
        .backup(BackupOptions::to_file(dest).with_retry_errors(retry));
    let copied = match ready.await {
        Ok(()) => copy(&backup, pages).await,
        Err(err) => Err(err),
    };
    let finished = if backup.is_finished() {
        Ok(())
    } else {
        backup.finish().await
    };
    opened.report();
    let closed = opened.close().await;
    copied.and(finished).and(closed)?;

    info!(dest, pages = backup.page_count(), "backup complete");
    eprintln!("Backup complete: {} pages written to {dest}", backup.page_count());
    Ok(())
}

async fn copy(backup: &Backup, pages: i32) -> Result<(), SerialiteError> {
    loop {
        match backup.step(pages).await {
            Ok(true) => return Ok(()),
            Ok(false) => debug!(
                remaining = backup.remaining(),
                page_count = backup.page_count(),
                "backup progress"
            ),
            Err(err) if !backup.is_failed() => {
                debug!(error = %err, "backup step will be retried");
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(err) => return Err(err),
        }
    }
}
