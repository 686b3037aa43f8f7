// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Write;

use anyhow::{Result, bail};
use pitlog::VerifyReport;
use steward::Config;

use crate::common::{deadline, format_pit_id, open_repository, parse_pit};

#[allow(clippy::print_stdout)]
pub async fn verify_command(
    config: &Config,
    repository: &str,
    pit: Option<&str>,
    deep: bool,
    deadline_secs: Option<u64>,
) -> Result<()> {
    let (output, report) = verify_command_as_string(config, repository, pit, deep, deadline_secs).await?;
    print!("{output}");
    if !report.is_ok() {
        bail!(
            "Repository '{repository}' failed verification: {} missing, {} corrupt",
            report.missing.len(),
            report.corrupt.len()
        );
    }
    Ok(())
}

/// Check that every live file of a PIT has its content; `deep` re-hashes it
pub async fn verify_command_as_string(
    config: &Config,
    repository: &str,
    pit: Option<&str>,
    deep: bool,
    deadline_secs: Option<u64>,
) -> Result<(String, VerifyReport)> {
    let repo = open_repository(config, repository).await?;
    let pit_id = repo.resolve_pit(parse_pit(pit)?.as_ref())?;
    let report = repo
        .verify(&pit_id, deep, &deadline(config, deadline_secs))
        .await?;

    let mut out = String::new();
    let mode = if deep { "deep" } else { "shallow" };
    _ = writeln!(
        out,
        "Verified PIT {} ({mode}): {} files checked",
        format_pit_id(&pit_id),
        report.checked
    );
    for path in &report.missing {
        _ = writeln!(out, "  missing: {path}");
    }
    for path in &report.corrupt {
        _ = writeln!(out, "  corrupt: {path}");
    }
    if report.is_ok() {
        out.push_str("  ok\n");
    }
    Ok((out, report))
}
