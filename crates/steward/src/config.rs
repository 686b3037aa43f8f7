// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! YAML configuration
//!
//! ```yaml
//! repository: s3://backups/icechain
//! stores:
//!   - url: s3://backups
//!     region: us-west-2
//! catalog:
//!   type: json
//!   name: prod
//!   url: s3://warehouse/catalog.json
//! transfer:
//!   concurrency: 16
//! deadline_secs: 3600
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use icecodec::{PathCodec, SchemePolicy};
use pitlog::{Deadline, DeltaMode, RepositoryStore, TableIdent};
use serde::{Deserialize, Serialize};

use crate::backup::BackupExecutor;
use crate::catalog::{Catalog, JsonCatalog, MemoryCatalog, TableEntry};
use crate::copy::TransferOptions;
use crate::error::{Result, StewardError};
use crate::restore::RestoreExecutor;
use crate::stores::{Located, StoreConfig, StoreRegistry, normalize_uri};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "ICECHAIN_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum CatalogConfig {
    /// Tables listed inline, keyed by `namespace.table`
    Memory {
        name: String,
        #[serde(default)]
        tables: BTreeMap<String, TableEntry>,
    },
    /// Catalog document stored at `url`
    Json { name: String, url: String },
}

impl CatalogConfig {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Memory { name, .. } | Self::Json { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Repository root URI; each repository id is a directory beneath it
    pub repository: String,
    #[serde(default)]
    pub stores: Vec<StoreConfig>,
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub transfer: TransferOptions,
    #[serde(default)]
    pub scheme_policy: SchemePolicy,
    #[serde(default)]
    pub delta_mode: DeltaMode,
    /// Wall-clock budget per operation; unbounded when unset
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

impl Config {
    /// Load and validate a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            StewardError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        _ = normalize_uri(&self.repository)?;
        if self.catalog.name().is_empty() {
            return Err(StewardError::Config("catalog name cannot be empty".to_string()));
        }
        if let CatalogConfig::Memory { tables, .. } = &self.catalog {
            if let Some(key) = tables.keys().find(|key| TableIdent::parse(key).is_none()) {
                return Err(StewardError::Config(format!(
                    "catalog table '{key}' is not of the form namespace.table"
                )));
            }
        }
        if self.transfer.concurrency == 0 {
            return Err(StewardError::Config("transfer.concurrency must be greater than 0".to_string()));
        }
        if self.transfer.retry.max_attempts == 0 {
            return Err(StewardError::Config(
                "transfer.retry.max_attempts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn codec(&self) -> PathCodec {
        PathCodec::new(self.scheme_policy)
    }

    /// A fresh deadline for one operation
    #[must_use]
    pub fn deadline(&self) -> Deadline {
        self.deadline_secs
            .map_or_else(Deadline::none, |secs| Deadline::after(Duration::from_secs(secs)))
    }

    pub fn store_registry(&self) -> Result<StoreRegistry> {
        StoreRegistry::from_configs(&self.stores)
    }

    pub fn open_catalog(&self, stores: &StoreRegistry) -> Result<Arc<dyn Catalog>> {
        match &self.catalog {
            CatalogConfig::Memory { name, tables } => {
                let tables = tables
                    .iter()
                    .filter_map(|(key, entry)| TableIdent::parse(key).map(|ident| (ident, entry.clone())))
                    .collect();
                Ok(Arc::new(MemoryCatalog::with_tables(name.clone(), tables)))
            }
            CatalogConfig::Json { name, url } => Ok(Arc::new(
                JsonCatalog::new(name.clone(), stores.resolve(url)?).with_retry(self.transfer.retry),
            )),
        }
    }

    pub fn repository_store(&self, stores: &StoreRegistry) -> Result<RepositoryStore> {
        let Located { store, path } = stores.resolve(&self.repository)?;
        Ok(RepositoryStore::new(store, path).with_retry(self.transfer.retry))
    }

    pub fn backup_executor(&self) -> Result<BackupExecutor> {
        let stores = self.store_registry()?;
        let catalog = self.open_catalog(&stores)?;
        let repositories = self.repository_store(&stores)?;
        Ok(BackupExecutor::new(stores, repositories, catalog)
            .with_codec(self.codec())
            .with_transfer(self.transfer))
    }

    pub fn restore_executor(&self) -> Result<RestoreExecutor> {
        let stores = self.store_registry()?;
        let repositories = self.repository_store(&stores)?;
        Ok(RestoreExecutor::new(stores, repositories)
            .with_codec(self.codec())
            .with_transfer(self.transfer))
    }
}

#[cfg(test)]
mod tests {
    use pitlog::Scope;

    use super::*;

    const SAMPLE: &str = r#"
repository: memory://backups/icechain
stores:
  - url: memory://backups
  - url: s3://warehouse
    region: us-west-2
    endpoint: http://localhost:9000
    allow_http: true
catalog:
  type: memory
  name: prod
  tables:
    sales.orders:
      location: s3://warehouse/sales/orders
      metadata_location: s3://warehouse/sales/orders/metadata/v3.metadata.json
transfer:
  concurrency: 16
  retry:
    max_attempts: 2
    min_delay: 10
    max_delay: 50
scheme_policy: canonical
delta_mode: lenient
deadline_secs: 600
"#;

    #[test]
    fn test_parse_sample() -> Result<()> {
        let config = Config::from_yaml(SAMPLE)?;
        assert_eq!(config.stores.len(), 2);
        assert_eq!(config.stores[1].region.as_deref(), Some("us-west-2"));
        assert_eq!(config.transfer.concurrency, 16);
        assert_eq!(config.transfer.multipart_threshold, TransferOptions::default().multipart_threshold);
        assert_eq!(config.transfer.retry.min_delay, Duration::from_millis(10));
        assert_eq!(config.scheme_policy, SchemePolicy::Canonical);
        assert_eq!(config.delta_mode, DeltaMode::Lenient);
        assert_eq!(config.catalog.name(), "prod");
        Ok(())
    }

    #[test]
    fn test_defaults() -> Result<()> {
        let config = Config::from_yaml(
            "repository: s3://backups\ncatalog:\n  type: json\n  name: prod\n  url: s3://warehouse/catalog.json\n",
        )?;
        assert!(config.stores.is_empty());
        assert_eq!(config.transfer, TransferOptions::default());
        assert_eq!(config.scheme_policy, SchemePolicy::Preserve);
        assert_eq!(config.delta_mode, DeltaMode::Strict);
        assert!(config.deadline_secs.is_none());
        Ok(())
    }

    #[test]
    fn test_rejects_bad_config() {
        let unknown = "repository: s3://b\ncatalog:\n  type: memory\n  name: prod\ncolor: blue\n";
        assert!(matches!(Config::from_yaml(unknown), Err(StewardError::Yaml(_))));

        let no_bucket = "repository: s3:///x\ncatalog:\n  type: memory\n  name: prod\n";
        assert!(matches!(Config::from_yaml(no_bucket), Err(StewardError::InvalidUrl { .. })));

        let bad_table = "repository: s3://b\ncatalog:\n  type: memory\n  name: prod\n  tables:\n    orders:\n      location: s3://w/o\n      metadata_location: s3://w/o/m.json\n";
        assert!(matches!(Config::from_yaml(bad_table), Err(StewardError::Config(_))));

        let idle = "repository: s3://b\ncatalog:\n  type: memory\n  name: prod\ntransfer:\n  concurrency: 0\n";
        assert!(matches!(Config::from_yaml(idle), Err(StewardError::Config(_))));
    }

    #[tokio::test]
    async fn test_memory_catalog_from_config() -> Result<()> {
        let config = Config::from_yaml(SAMPLE)?;
        let stores = config.store_registry()?;
        let catalog = config.open_catalog(&stores)?;
        let tables = catalog.list_tables(&Scope::catalog("prod")).await?;
        assert_eq!(tables, vec![TableIdent::new("sales", "orders")]);

        let repositories = config.repository_store(&stores)?;
        assert!(repositories.list().await?.is_empty());
        Ok(())
    }

    #[test]
    fn test_load_from_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("icechain.yaml");
        std::fs::write(&path, SAMPLE)?;
        assert_eq!(Config::load(&path)?, Config::from_yaml(SAMPLE)?);
        assert!(matches!(
            Config::load(dir.path().join("missing.yaml")),
            Err(StewardError::Config(_))
        ));
        Ok(())
    }
}
