// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.
//!
//! Merge order (later overrides earlier): compiled defaults,
//! `/etc/serialite/serialite.toml`, `~/.config/serialite/serialite.toml`,
//! `./serialite.toml`, then `SERIALITE_*` environment variables.

#![allow(clippy::result_large_err)] // figment::Error is external

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::SerialiteConfig;

pub(crate) const SYSTEM_CONFIG: &str = "/etc/serialite/serialite.toml";
pub(crate) const LOCAL_CONFIG: &str = "serialite.toml";

/// Config sections, used to split environment variable names.
const SECTIONS: &[&str] = &["connection", "backup", "runtime", "log"];

pub(crate) fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("serialite/serialite.toml"))
}

/// Load from the standard hierarchy with environment overrides.
pub fn load_config() -> Result<SerialiteConfig, figment::Error> {
    build_figment().extract()
}

/// Defaults plus `toml_content` only. No files, no environment.
pub fn load_config_from_str(toml_content: &str) -> Result<SerialiteConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(SerialiteConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Defaults, then the file at `path`, then environment overrides.
pub fn load_config_from_path(path: &Path) -> Result<SerialiteConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(SerialiteConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// The unextracted standard Figment, for callers that inspect metadata.
/// The effective configuration as a TOML document, loadable back in.
pub fn to_toml(config: &SerialiteConfig) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(config)
}

pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(SerialiteConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG))
        .merge(env_provider())
}

/// `SERIALITE_BACKUP_STEP_PAGES` maps to `backup.step_pages`: only the first
/// underscore after a known section is a separator.
fn env_provider() -> Env {
    Env::prefixed("SERIALITE_").map(|key| section_key(key.as_str()).into())
}

pub(crate) fn section_key(key: &str) -> String {
    for section in SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}
