// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for Serialite.
//!
//! TOML files are merged in XDG order and overridden by `SERIALITE_*`
//! environment variables. Unknown keys are rejected with a suggestion, and
//! values are validated after deserialization.
//!
//! ```no_run
//! use serialite_config::load_and_validate;
//!
//! let config = load_and_validate().expect("config errors");
//! println!("busy timeout: {}ms", config.connection.busy_timeout_ms);
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

use std::path::Path;

pub use diagnostic::{ConfigError, render_errors};
pub use loader::{load_config, load_config_from_path, load_config_from_str, to_toml};
pub use model::{BackupConfig, ConnectionConfig, LogConfig, RuntimeConfig, SerialiteConfig};

/// Load from the standard hierarchy and validate.
pub fn load_and_validate() -> Result<SerialiteConfig, Vec<ConfigError>> {
    finish(loader::load_config(), collect_toml_sources)
}

/// Load `toml_content` over the defaults and validate.
pub fn load_and_validate_str(toml_content: &str) -> Result<SerialiteConfig, Vec<ConfigError>> {
    finish(loader::load_config_from_str(toml_content), || {
        vec![("<inline>".to_string(), toml_content.to_string())]
    })
}

/// Load the file at `path` (plus environment overrides) and validate.
pub fn load_and_validate_path(path: &Path) -> Result<SerialiteConfig, Vec<ConfigError>> {
    finish(loader::load_config_from_path(path), || {
        std::fs::read_to_string(path)
            .map(|content| vec![(path.display().to_string(), content)])
            .unwrap_or_default()
    })
}

fn finish(
    loaded: Result<SerialiteConfig, figment::Error>,
    sources: impl FnOnce() -> Vec<(String, String)>,
) -> Result<SerialiteConfig, Vec<ConfigError>> {
    match loaded {
        Ok(config) => {
            validation::validate_config(&config)?;
            tracing::debug!(?config, "configuration loaded");
            Ok(config)
        }
        Err(err) => Err(diagnostic::figment_to_config_errors(err, &sources())),
    }
}

/// Contents of every config file that exists, for error spans.
fn collect_toml_sources() -> Vec<(String, String)> {
    let local = std::env::current_dir()
        .map(|d| d.join(loader::LOCAL_CONFIG))
        .unwrap_or_else(|_| loader::LOCAL_CONFIG.into());
    [Some(local), loader::user_config_path(), Some(loader::SYSTEM_CONFIG.into())]
        .into_iter()
        .flatten()
        .filter_map(|path| {
            std::fs::read_to_string(&path)
                .ok()
                .map(|content| (path.display().to_string(), content))
        })
        .collect()
}
