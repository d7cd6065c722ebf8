// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Semantic checks serde cannot express.

use serialite_core::Status;

use crate::diagnostic::ConfigError;
use crate::model::SerialiteConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Collect every validation failure rather than stopping at the first.
pub fn validate_config(config: &SerialiteConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    for name in &config.backup.retry_errors {
        match name.parse::<Status>() {
            Ok(status) if !status.is_error() => fail(format!(
                "backup.retry_errors entry `{name}` is not an error status"
            )),
            Ok(_) => {}
            Err(reason) => fail(format!("backup.retry_errors: {reason}")),
        }
    }

    if config.backup.step_pages == 0 {
        fail("backup.step_pages must be positive, or negative to copy everything".to_string());
    }

    if config.runtime.max_worker_threads == 0 {
        fail("runtime.max_worker_threads must be at least 1".to_string());
    }

    if config.runtime.thread_name.trim().is_empty() {
        fail("runtime.thread_name must not be empty".to_string());
    }

    let level = config.log.level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        fail(format!(
            "log.level `{}` is not one of {}",
            config.log.level,
            LOG_LEVELS.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
