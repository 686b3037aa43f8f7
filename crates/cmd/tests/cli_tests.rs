// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use anyhow::Result;
use cmd::commands::backup::backup_command_as_string;
use cmd::commands::log::log_command_as_string;
use cmd::commands::restore::restore_command_as_string;
use cmd::commands::show::show_command_as_string;
use cmd::commands::verify::verify_command_as_string;
use cmd::commands::{BackupArgs, RestoreArgs};
use cmd::common::load_config;
use icecodec::fixtures;
use pitlog::{PitManifest, TableIdent};
use serde_json::json;
use steward::{Catalog, Config, ErrorKind, StewardError};
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
    config: Config,
}

impl Workspace {
    fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().display().to_string();
        let yaml = format!(
            "repository: file://{root}/backups\n\
             stores:\n  - url: file://{root}\n\
             catalog:\n  type: json\n  name: prod\n  url: file://{root}/catalog.json\n\
             transfer:\n  concurrency: 4\n"
        );
        let path = dir.path().join("icechain.yaml");
        std::fs::write(&path, yaml)?;
        let config = load_config(Some(path))?;
        Ok(Self { dir, config })
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn uri(&self, relative: &str) -> String {
        format!("file://{}/{relative}", self.root().display())
    }

    fn write(&self, relative: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Commit version 1 of sales.orders with `data` files and register it
    fn orders_table(&self, data: &[(&str, &[u8])]) -> Result<()> {
        let base = "warehouse/sales/orders";
        let location = self.uri(base);
        let mut entries = Vec::new();
        for (name, bytes) in data {
            _ = self.write(&format!("{base}/data/{name}"), bytes)?;
            entries.push(fixtures::data_entry(
                1,
                &format!("{location}/data/{name}"),
                bytes.len() as i64,
                1,
            ));
        }
        let manifest = fixtures::manifest(&entries)?;
        _ = self.write(&format!("{base}/metadata/m-1.avro"), &manifest)?;
        let list = fixtures::manifest_list(&[fixtures::manifest_list_record(
            &format!("{location}/metadata/m-1.avro"),
            manifest.len() as i64,
            1,
            false,
        )])?;
        _ = self.write(&format!("{base}/metadata/snap-1.avro"), &list)?;
        let descriptor = fixtures::descriptor(&location, &[(1, format!("{location}/metadata/snap-1.avro"))], &[]);
        _ = self.write(&format!("{base}/metadata/v1.metadata.json"), descriptor.as_bytes())?;

        let catalog = json!({"tables": {"sales.orders": {
            "location": location,
            "metadata_location": format!("{location}/metadata/v1.metadata.json"),
        }}});
        _ = self.write("catalog.json", serde_json::to_vec_pretty(&catalog)?.as_slice())?;
        Ok(())
    }
}

fn backup_args(table: &str) -> BackupArgs {
    BackupArgs {
        repository: "orders".to_string(),
        table: Some(table.to_string()),
        database: None,
        all: false,
        lenient: false,
        deadline_secs: None,
    }
}

fn restore_args(target: String, register: Option<&str>) -> RestoreArgs {
    RestoreArgs {
        repository: "orders".to_string(),
        pit: None,
        target,
        overwrite: false,
        register: register.map(str::to_string),
        deadline_secs: None,
    }
}

#[tokio::test]
async fn test_backup_log_show_verify() -> Result<()> {
    let ws = Workspace::new()?;
    ws.orders_table(&[("a.parquet", b"aaaa".as_slice()), ("b.parquet", b"bbbb".as_slice())])?;

    let output = backup_command_as_string(&ws.config, &backup_args("sales.orders")).await?;
    assert!(output.contains("parent:  none (first backup)"), "{output}");
    assert!(output.contains("tables:  sales.orders"), "{output}");
    assert!(output.contains("5 added, 0 modified, 0 deleted"), "{output}");

    let again = backup_command_as_string(&ws.config, &backup_args("sales.orders")).await?;
    assert!(again.contains("0 added, 0 modified, 0 deleted"), "{again}");

    let log = log_command_as_string(&ws.config, "orders", None).await?;
    assert_eq!(log.lines().count(), 3, "{log}");
    let latest = log_command_as_string(&ws.config, "orders", Some(1)).await?;
    assert_eq!(latest.lines().count(), 2, "{latest}");

    let shown = show_command_as_string(&ws.config, "orders", None, true).await?;
    let manifest: PitManifest = serde_json::from_str(&shown)?;
    assert!(manifest.parent.is_some());
    let first = manifest.parent.clone().map(|p| p.to_string());
    let text = show_command_as_string(&ws.config, "orders", first.as_deref(), false).await?;
    assert!(text.contains("+ data/a.parquet (data, 4B)"), "{text}");
    assert!(text.contains("  parent:  none"), "{text}");

    let (report_text, report) = verify_command_as_string(&ws.config, "orders", None, true, None).await?;
    assert!(report.is_ok(), "{report_text}");
    assert_eq!(report.checked, 5);
    Ok(())
}

#[tokio::test]
async fn test_restore_and_register() -> Result<()> {
    let ws = Workspace::new()?;
    ws.orders_table(&[("a.parquet", b"aaaa".as_slice())])?;
    _ = backup_command_as_string(&ws.config, &backup_args("sales.orders")).await?;

    let target = ws.uri("restored/orders");
    let output = restore_command_as_string(&ws.config, &restore_args(target.clone(), Some("table:dr.orders"))).await?;
    assert!(output.contains("registered dr.orders"), "{output}");
    assert_eq!(std::fs::read(ws.root().join("restored/orders/data/a.parquet"))?, b"aaaa");

    let stores = ws.config.store_registry()?;
    let catalog = ws.config.open_catalog(&stores)?;
    let entry = catalog.resolve(&TableIdent::new("dr", "orders")).await?;
    assert_eq!(entry.location, target);
    assert_eq!(entry.metadata_location, format!("{target}/metadata/v1.metadata.json"));

    let err = restore_command_as_string(&ws.config, &restore_args(target, None))
        .await
        .expect_err("target already holds the restored table");
    let kind = err.downcast_ref::<StewardError>().map(StewardError::kind);
    assert_eq!(kind, Some(ErrorKind::TargetNotEmpty));
    Ok(())
}

#[tokio::test]
async fn test_bad_register_writes_nothing() -> Result<()> {
    let ws = Workspace::new()?;
    ws.orders_table(&[("a.parquet", b"aaaa".as_slice())])?;
    _ = backup_command_as_string(&ws.config, &backup_args("sales.orders")).await?;

    let result = restore_command_as_string(&ws.config, &restore_args(ws.uri("restored/orders"), Some("elsewhere"))).await;
    assert!(result.is_err());
    assert!(!ws.root().join("restored").exists());
    Ok(())
}

#[tokio::test]
async fn test_backup_rejects_malformed_table() -> Result<()> {
    let ws = Workspace::new()?;
    let result = backup_command_as_string(&ws.config, &backup_args("orders")).await;
    assert!(result.is_err());
    Ok(())
}
