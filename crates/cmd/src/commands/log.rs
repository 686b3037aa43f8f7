// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Write;

use anyhow::Result;
use steward::Config;

use crate::common::{format_pit_id, format_timestamp, open_repository};

#[allow(clippy::print_stdout)]
pub async fn log_command(config: &Config, repository: &str, limit: Option<usize>) -> Result<()> {
    let output = log_command_as_string(config, repository, limit).await?;
    print!("{output}");
    Ok(())
}

/// The PIT chain, newest first
pub async fn log_command_as_string(config: &Config, repository: &str, limit: Option<usize>) -> Result<String> {
    let repo = open_repository(config, repository).await?;
    let mut out = String::new();
    _ = writeln!(out, "=== Repository {} ({}) ===", repo.id(), repo.scope());
    if repo.pits().is_empty() {
        out.push_str("  (no PITs)\n");
        return Ok(out);
    }

    let shown = limit.unwrap_or(usize::MAX);
    for pit in repo.pits().iter().rev().take(shown) {
        let parent = pit.parent.as_ref().map_or_else(|| "-".to_string(), format_pit_id);
        _ = writeln!(
            out,
            "{}  {}  parent {:<8}  +{} ~{} -{}  ({} tables)",
            format_pit_id(&pit.pit_id),
            format_timestamp(pit.created_at),
            parent,
            pit.counts.added,
            pit.counts.modified,
            pit.counts.deleted,
            pit.counts.tables
        );
    }
    Ok(out)
}
