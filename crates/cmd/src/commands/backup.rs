// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Write;

use anyhow::{Result, anyhow};
use clap::{ArgGroup, Args};
use pitlog::{DeltaMode, Scope, TableIdent};
use steward::{BackupOptions, BackupOutcome, Config};

use crate::common::{deadline, format_file_size, format_pit_id};

#[derive(Debug, Clone, Args)]
#[command(group(ArgGroup::new("scope").required(true).args(["table", "database", "all"])))]
pub struct BackupArgs {
    /// Repository id under the configured repository root
    #[arg(short, long)]
    pub repository: String,

    /// Back up one table, as namespace.table
    #[arg(long)]
    pub table: Option<String>,

    /// Back up every table in a namespace
    #[arg(long)]
    pub database: Option<String>,

    /// Back up every table in the catalog
    #[arg(long)]
    pub all: bool,

    /// Keep unreadable files at their previous state instead of failing
    #[arg(long)]
    pub lenient: bool,

    /// Give up after this many seconds
    #[arg(long)]
    pub deadline_secs: Option<u64>,
}

impl BackupArgs {
    fn scope(&self, catalog: &str) -> Result<Scope> {
        if let Some(table) = &self.table {
            let ident = TableIdent::parse(table)
                .ok_or_else(|| anyhow!("Table '{table}' is not of the form namespace.table"))?;
            return Ok(Scope::table(catalog, &ident));
        }
        if let Some(namespace) = &self.database {
            return Ok(Scope::database(catalog, namespace.clone()));
        }
        Ok(Scope::catalog(catalog))
    }

    fn delta_mode(&self, config: &Config) -> DeltaMode {
        if self.lenient {
            DeltaMode::Lenient
        } else {
            config.delta_mode
        }
    }
}

#[allow(clippy::print_stdout)]
pub async fn backup_command(config: &Config, args: &BackupArgs) -> Result<()> {
    let output = backup_command_as_string(config, args).await?;
    print!("{output}");
    Ok(())
}

pub async fn backup_command_as_string(config: &Config, args: &BackupArgs) -> Result<String> {
    let scope = args.scope(config.catalog.name())?;
    diagnostics::log_info!("Backing up {scope} into repository {repository}", scope: scope.to_string(), repository: args.repository.as_str());

    let options = BackupOptions::new(args.repository.clone(), scope)
        .with_delta_mode(args.delta_mode(config))
        .with_deadline(deadline(config, args.deadline_secs));
    let outcome = config.backup_executor()?.run(&options).await?;
    Ok(format_outcome(&outcome))
}

fn format_outcome(outcome: &BackupOutcome) -> String {
    let mut out = String::new();
    _ = writeln!(out, "PIT {} ({})", format_pit_id(&outcome.pit_id), outcome.pit_id);
    let parent = outcome.parent.as_ref().map_or_else(|| "none (first backup)".to_string(), format_pit_id);
    _ = writeln!(out, "  parent:  {parent}");
    let tables: Vec<String> = outcome.tables.iter().map(ToString::to_string).collect();
    _ = writeln!(out, "  tables:  {}", tables.join(", "));
    _ = writeln!(
        out,
        "  changes: {} added, {} modified, {} deleted",
        outcome.counts.added, outcome.counts.modified, outcome.counts.deleted
    );
    _ = writeln!(
        out,
        "  stored:  {} files ({}), {} already present",
        outcome.stored,
        format_file_size(outcome.bytes_stored),
        outcome.deduplicated
    );
    for path in &outcome.carried_forward {
        _ = writeln!(out, "  carried forward unreadable: {path}");
    }
    out
}
