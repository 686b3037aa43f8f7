// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! In-memory warehouse, backup bucket and restore bucket with Iceberg-shaped
//! tables committed through the fixture builders

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use futures::TryStreamExt;
use icecodec::fixtures;
use object_store::ObjectStore;
use object_store::memory::InMemory;
use object_store::path::Path;
use pitlog::{RepositoryStore, TableIdent};
use steward::{BackupExecutor, Catalog, Located, MemoryCatalog, RestoreExecutor, StoreRegistry, TableEntry};

pub const WAREHOUSE: &str = "memory://warehouse";
pub const BACKUPS: &str = "memory://backups";
pub const RESTORE: &str = "memory://restore";

pub struct Harness {
    pub warehouse: Arc<InMemory>,
    pub backups: Arc<InMemory>,
    pub restore: Arc<InMemory>,
    pub catalog: Arc<MemoryCatalog>,
    pub stores: StoreRegistry,
}

/// A table whose commits the harness writes
pub struct TableFixture {
    pub ident: TableIdent,
    pub location: String,
    version: i64,
    history: Vec<String>,
}

impl TableFixture {
    pub fn metadata_location(&self) -> String {
        format!("{}/metadata/v{}.metadata.json", self.location, self.version)
    }
}

impl Harness {
    pub fn new() -> Result<Self> {
        let warehouse = Arc::new(InMemory::new());
        let backups = Arc::new(InMemory::new());
        let restore = Arc::new(InMemory::new());
        let mut stores = StoreRegistry::new();
        stores.register(WAREHOUSE, warehouse.clone())?;
        stores.register(BACKUPS, backups.clone())?;
        stores.register(RESTORE, restore.clone())?;
        Ok(Self {
            warehouse,
            backups,
            restore,
            catalog: Arc::new(MemoryCatalog::new("prod")),
            stores,
        })
    }

    pub fn repositories(&self) -> RepositoryStore {
        RepositoryStore::new(self.backups.clone(), Path::from("repos"))
    }

    pub fn backup_executor(&self) -> BackupExecutor {
        let catalog: Arc<dyn Catalog> = self.catalog.clone();
        BackupExecutor::new(self.stores.clone(), self.repositories(), catalog)
    }

    pub fn restore_executor(&self) -> RestoreExecutor {
        RestoreExecutor::new(self.stores.clone(), self.repositories())
    }

    pub fn table(&self, namespace: &str, name: &str) -> TableFixture {
        TableFixture {
            ident: TableIdent::new(namespace, name),
            location: format!("{WAREHOUSE}/{namespace}/{name}"),
            version: 0,
            history: Vec::new(),
        }
    }

    pub async fn put(&self, uri: &str, bytes: Vec<u8>) -> Result<()> {
        let Located { store, path } = self.stores.resolve(uri)?;
        _ = store.put(&path, Bytes::from(bytes).into()).await?;
        Ok(())
    }

    pub async fn get(&self, uri: &str) -> Result<Vec<u8>> {
        let Located { store, path } = self.stores.resolve(uri)?;
        Ok(store.get(&path).await?.bytes().await?.to_vec())
    }

    pub async fn exists(&self, uri: &str) -> Result<bool> {
        let Located { store, path } = self.stores.resolve(uri)?;
        match store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn remove(&self, uri: &str) -> Result<()> {
        let Located { store, path } = self.stores.resolve(uri)?;
        store.delete(&path).await?;
        Ok(())
    }

    /// Commit a snapshot holding exactly `data` plus position delete files
    /// `(delete file, data file it targets)`, expiring earlier snapshots
    pub async fn commit(
        &self,
        table: &mut TableFixture,
        data: &[(&str, &[u8])],
        deletes: &[(&str, &str)],
    ) -> Result<()> {
        table.version += 1;
        let version = table.version;
        let location = table.location.clone();

        let mut entries = Vec::new();
        for (name, bytes) in data {
            let path = format!("{location}/data/{name}");
            self.put(&path, bytes.to_vec()).await?;
            entries.push(fixtures::data_entry(1, &path, bytes.len() as i64, 10));
        }
        for (name, target) in deletes {
            let path = format!("{location}/data/{name}");
            let referenced = format!("{location}/data/{target}");
            let bytes = fixtures::position_deletes(&[(referenced.clone(), 0)])?;
            let size = bytes.len() as i64;
            self.put(&path, bytes).await?;
            entries.push(fixtures::position_delete_entry(&path, size, &referenced));
        }

        let manifest = fixtures::manifest(&entries)?;
        let manifest_path = format!("{location}/metadata/m-{version}.avro");
        let manifest_len = manifest.len() as i64;
        self.put(&manifest_path, manifest).await?;

        let list = fixtures::manifest_list(&[fixtures::manifest_list_record(
            &manifest_path,
            manifest_len,
            version,
            false,
        )])?;
        let list_path = format!("{location}/metadata/snap-{version}.avro");
        self.put(&list_path, list).await?;

        let descriptor = fixtures::descriptor(&location, &[(version, list_path)], &table.history);
        let metadata_location = table.metadata_location();
        self.put(&metadata_location, descriptor.into_bytes()).await?;
        table.history.push(metadata_location.clone());

        self.catalog
            .upsert(
                table.ident.clone(),
                TableEntry {
                    location,
                    metadata_location,
                },
            )
            .await;
        Ok(())
    }
}

/// Every object in `store`, keyed by path
pub async fn dump(store: &InMemory) -> Result<BTreeMap<String, Vec<u8>>> {
    let listed: Vec<_> = store.list(None).try_collect().await?;
    let mut objects = BTreeMap::new();
    for meta in listed {
        let bytes = store.get(&meta.location).await?.bytes().await?;
        _ = objects.insert(meta.location.to_string(), bytes.to_vec());
    }
    Ok(objects)
}

/// Sorted data and delete file keys among `paths`
pub fn data_keys<'a>(paths: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut keys: Vec<String> = paths
        .into_iter()
        .filter(|p| p.starts_with("data/") || p.contains("/data/"))
        .map(str::to_string)
        .collect();
    keys.sort();
    keys
}
