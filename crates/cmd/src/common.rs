// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::DateTime;
use pitlog::{Deadline, PitId, Repository};
use steward::{CONFIG_ENV, Config};

/// Get the configuration path with an optional override, falling back to the
/// ICECHAIN_CONFIG environment variable
pub fn get_config_path_with_override(override_path: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        return Ok(path);
    }
    env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .map_err(|_| anyhow!("{CONFIG_ENV} environment variable not set and no --config given"))
}

pub fn load_config(override_path: Option<PathBuf>) -> Result<Config> {
    let path = get_config_path_with_override(override_path)?;
    Config::load(&path).with_context(|| format!("Failed to load configuration from {}", path.display()))
}

pub async fn open_repository(config: &Config, repository_id: &str) -> Result<Repository> {
    let stores = config.store_registry()?;
    let repositories = config.repository_store(&stores)?;
    repositories
        .open(repository_id)
        .await
        .with_context(|| format!("Failed to open repository '{repository_id}'"))
}

pub fn parse_pit(value: Option<&str>) -> Result<Option<PitId>> {
    value
        .map(|v| v.parse::<PitId>().with_context(|| format!("Invalid PIT id '{v}'")))
        .transpose()
}

/// Deadline from a command-line override, else from configuration
pub fn deadline(config: &Config, override_secs: Option<u64>) -> Deadline {
    match override_secs {
        Some(secs) => Deadline::after(std::time::Duration::from_secs(secs)),
        None => config.deadline(),
    }
}

/// Last 8 hex digits of a PIT id, git-style; UUIDv7 timestamps collide in
/// the leading digits
pub fn format_pit_id(pit_id: &PitId) -> String {
    let hex_only: String = pit_id.as_str().chars().filter(char::is_ascii_hexdigit).collect();
    let len = hex_only.len();
    if len >= 8 {
        hex_only[len - 8..].to_string()
    } else {
        hex_only
    }
}

/// Helper function to format file sizes
pub fn format_file_size(size: u64) -> String {
    if size >= 1024 * 1024 * 1024 {
        format!("{:.1}GB", size as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if size >= 1024 * 1024 {
        format!("{:.1}MB", size as f64 / (1024.0 * 1024.0))
    } else if size >= 1024 {
        format!("{:.1}KB", size as f64 / 1024.0)
    } else {
        format!("{size}B")
    }
}

/// Microseconds since the epoch as UTC wall-clock time
pub fn format_timestamp(micros: i64) -> String {
    DateTime::from_timestamp_micros(micros)
        .map_or_else(|| micros.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}
