// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use cmd::commands::{
    BackupArgs, RestoreArgs, backup_command, log_command, restore_command, show_command, verify_command,
};
use cmd::common::load_config;

#[derive(Parser)]
#[command(author, version, about = "Incremental backups of Iceberg tables", long_about = None)]
#[command(name = "icechain")]
struct Cli {
    /// Configuration file (defaults to $ICECHAIN_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture the tables of a scope and append a PIT
    Backup(BackupArgs),
    /// Write the tables of a PIT at a new location
    Restore(RestoreArgs),
    /// List a repository's PITs, newest first
    Log {
        #[arg(short, long)]
        repository: String,
        /// Show at most this many PITs
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show one PIT manifest
    Show {
        #[arg(short, long)]
        repository: String,
        /// Defaults to the last PIT
        #[arg(long)]
        pit: Option<String>,
        /// Print the stored manifest as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check that the content of every live file is present
    Verify {
        #[arg(short, long)]
        repository: String,
        /// Defaults to the last PIT
        #[arg(long)]
        pit: Option<String>,
        /// Re-hash every content object
        #[arg(long)]
        deep: bool,
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    diagnostics::init_diagnostics();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    match &cli.command {
        Commands::Backup(args) => backup_command(&config, args).await,
        Commands::Restore(args) => restore_command(&config, args).await,
        Commands::Log { repository, limit } => log_command(&config, repository, *limit).await,
        Commands::Show { repository, pit, json } => {
            show_command(&config, repository, pit.as_deref(), *json).await
        }
        Commands::Verify {
            repository,
            pit,
            deep,
            deadline_secs,
        } => verify_command(&config, repository, pit.as_deref(), *deep, *deadline_secs).await,
    }
}
