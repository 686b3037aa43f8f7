// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Write;

use anyhow::{Context, Result, anyhow};
use clap::Args;
use pitlog::TableIdent;
use steward::{Catalog, Config, RegisterAs, RestoreOptions, register_restored};

use crate::common::{deadline, format_file_size, format_pit_id, parse_pit};

#[derive(Debug, Clone, Args)]
pub struct RestoreArgs {
    /// Repository id under the configured repository root
    #[arg(short, long)]
    pub repository: String,

    /// PIT to restore; defaults to the last one
    #[arg(long)]
    pub pit: Option<String>,

    /// New table location, or base location for database and catalog scopes
    #[arg(short, long)]
    pub target: String,

    /// Write even if the target already holds objects
    #[arg(long)]
    pub overwrite: bool,

    /// Register restored tables: `original`, `namespace:<ns>` or `table:<ns.table>`
    #[arg(long)]
    pub register: Option<String>,

    /// Give up after this many seconds
    #[arg(long)]
    pub deadline_secs: Option<u64>,
}

pub fn parse_register(value: &str) -> Result<RegisterAs> {
    match value.split_once(':') {
        None if value == "original" => Ok(RegisterAs::Original),
        Some(("namespace", ns)) if !ns.is_empty() => Ok(RegisterAs::Namespace(ns.to_string())),
        Some(("table", table)) => TableIdent::parse(table)
            .map(RegisterAs::Table)
            .ok_or_else(|| anyhow!("Table '{table}' is not of the form namespace.table")),
        _ => Err(anyhow!(
            "Invalid --register '{value}': expected original, namespace:<ns> or table:<ns.table>"
        )),
    }
}

#[allow(clippy::print_stdout)]
pub async fn restore_command(config: &Config, args: &RestoreArgs) -> Result<()> {
    let output = restore_command_as_string(config, args).await?;
    print!("{output}");
    Ok(())
}

pub async fn restore_command_as_string(config: &Config, args: &RestoreArgs) -> Result<String> {
    // Reject a bad --register before any bytes are written
    let register = args.register.as_deref().map(parse_register).transpose()?;

    let mut options = RestoreOptions::new(args.repository.clone(), args.target.clone())
        .with_overwrite(args.overwrite)
        .with_deadline(deadline(config, args.deadline_secs));
    if let Some(pit) = parse_pit(args.pit.as_deref())? {
        options = options.at_pit(pit);
    }
    let outcome = config.restore_executor()?.run(&options).await?;

    let mut out = String::new();
    _ = writeln!(
        out,
        "Restored PIT {} ({}): {} files, {}",
        format_pit_id(&outcome.pit_id),
        outcome.pit_id,
        outcome.files_written,
        format_file_size(outcome.bytes_written)
    );
    for table in &outcome.tables {
        _ = writeln!(out, "  {} -> {}", table.ident, table.metadata_location);
    }

    if let Some(register) = register {
        let stores = config.store_registry()?;
        let catalog = config.open_catalog(&stores)?;
        let names = register_restored(catalog.as_ref(), &outcome, &register)
            .await
            .with_context(|| format!("Restored files are in place but registration with catalog '{}' failed", catalog.name()))?;
        for name in names {
            _ = writeln!(out, "  registered {name}");
        }
    }
    Ok(out)
}
