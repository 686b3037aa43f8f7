// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! The table catalog: where each table lives and which root descriptor is
//! current

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use diagnostics::*;
use object_store::{PutMode, PutOptions, PutPayload, UpdateVersion};
use pitlog::{RetryPolicy, Scope, TableIdent};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Result, StewardError};
use crate::stores::Located;

/// Catalog entry for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    /// Table root URI
    pub location: String,
    /// URI of the current root descriptor
    pub metadata_location: String,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Catalog name, matched against the catalog component of a scope
    fn name(&self) -> &str;

    async fn resolve(&self, ident: &TableIdent) -> Result<TableEntry>;

    /// Tables inside `scope`, ordered by identifier
    async fn list_tables(&self, scope: &Scope) -> Result<Vec<TableIdent>>;

    /// Add a table; an identifier that is already registered is an error
    async fn register(&self, ident: &TableIdent, entry: &TableEntry) -> Result<()>;
}

fn check_catalog(catalog: &dyn Catalog, scope: &Scope) -> Result<()> {
    if scope.catalog != catalog.name() {
        return Err(StewardError::Catalog(format!(
            "scope {scope} names catalog '{}', this catalog is '{}'",
            scope.catalog,
            catalog.name()
        )));
    }
    Ok(())
}

fn already_registered(ident: &TableIdent) -> StewardError {
    StewardError::Catalog(format!("table {ident} is already registered"))
}

/// Catalog held in memory
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    name: String,
    tables: RwLock<BTreeMap<TableIdent, TableEntry>>,
}

impl MemoryCatalog {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: RwLock::default(),
        }
    }

    #[must_use]
    pub fn with_tables(name: impl Into<String>, tables: BTreeMap<TableIdent, TableEntry>) -> Self {
        Self {
            name: name.into(),
            tables: RwLock::new(tables),
        }
    }

    /// Point a table at a new root descriptor, as a commit would
    pub async fn upsert(&self, ident: TableIdent, entry: TableEntry) {
        _ = self.tables.write().await.insert(ident, entry);
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self, ident: &TableIdent) -> Result<TableEntry> {
        self.tables
            .read()
            .await
            .get(ident)
            .cloned()
            .ok_or_else(|| StewardError::unavailable(ident, "not in catalog"))
    }

    async fn list_tables(&self, scope: &Scope) -> Result<Vec<TableIdent>> {
        check_catalog(self, scope)?;
        Ok(self
            .tables
            .read()
            .await
            .keys()
            .filter(|ident| scope.contains(ident))
            .cloned()
            .collect())
    }

    async fn register(&self, ident: &TableIdent, entry: &TableEntry) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.contains_key(ident) {
            return Err(already_registered(ident));
        }
        _ = tables.insert(ident.clone(), entry.clone());
        Ok(())
    }
}

/// Serialized catalog document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogDocument {
    /// Keyed by `namespace.table`
    #[serde(default)]
    pub tables: BTreeMap<String, TableEntry>,
}

impl CatalogDocument {
    fn entries(&self) -> Result<BTreeMap<TableIdent, &TableEntry>> {
        self.tables
            .iter()
            .map(|(key, entry)| {
                TableIdent::parse(key)
                    .map(|ident| (ident, entry))
                    .ok_or_else(|| StewardError::Catalog(format!("invalid table key '{key}'")))
            })
            .collect()
    }
}

/// Attempts at a conditional document update before giving up
const MAX_UPDATE_ATTEMPTS: usize = 16;

/// Catalog stored as one JSON document in an object store.
///
/// Registration rewrites the document conditionally on the version it read,
/// so concurrent registrations each land or retry against the newer document.
#[derive(Debug)]
pub struct JsonCatalog {
    name: String,
    document: Located,
    retry: RetryPolicy,
}

impl JsonCatalog {
    #[must_use]
    pub fn new(name: impl Into<String>, document: Located) -> Self {
        Self {
            name: name.into(),
            document,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The stored document; a missing document is an empty catalog
    pub async fn load(&self) -> Result<CatalogDocument> {
        Ok(self.load_versioned().await?.0)
    }

    /// The stored document with the version it was read at; `None` when
    /// there is no document yet
    async fn load_versioned(&self) -> Result<(CatalogDocument, Option<UpdateVersion>)> {
        let Located { store, path } = &self.document;
        let fetched = self
            .retry
            .run("get", || async move {
                let result = store.get(path).await?;
                let version = UpdateVersion {
                    e_tag: result.meta.e_tag.clone(),
                    version: result.meta.version.clone(),
                };
                Ok((result.bytes().await?, version))
            })
            .await;
        match fetched {
            Ok((bytes, version)) => Ok((serde_json::from_slice(&bytes)?, Some(version))),
            Err(object_store::Error::NotFound { .. }) => Ok((CatalogDocument::default(), None)),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite the document unconditionally
    pub async fn store(&self, document: &CatalogDocument) -> Result<()> {
        let Located { store, path } = &self.document;
        let bytes = Bytes::from(serde_json::to_vec_pretty(document)?);
        self.retry.put(store.as_ref(), path, bytes).await?;
        Ok(())
    }

    /// Write the document only if it is still at `read`; false when another
    /// writer got there first
    async fn store_if_unchanged(
        &self,
        document: &CatalogDocument,
        read: Option<UpdateVersion>,
    ) -> Result<bool> {
        let Located { store, path } = &self.document;
        let bytes = Bytes::from(serde_json::to_vec_pretty(document)?);
        let mode = match read {
            Some(version) => PutMode::Update(version),
            None => PutMode::Create,
        };
        let options = PutOptions {
            mode,
            ..PutOptions::default()
        };
        match store.put_opts(path, PutPayload::from(bytes.clone()), options).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::Precondition { .. } | object_store::Error::AlreadyExists { .. }) => {
                Ok(false)
            }
            Err(object_store::Error::NotImplemented | object_store::Error::NotSupported { .. }) => {
                let key = path.to_string();
                warn!("Store for {key} has no conditional updates, overwriting the catalog document", key: key);
                self.retry.put(store.as_ref(), path, bytes).await?;
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Catalog for JsonCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self, ident: &TableIdent) -> Result<TableEntry> {
        let document = self.load().await?;
        document
            .tables
            .get(&ident.to_string())
            .cloned()
            .ok_or_else(|| StewardError::unavailable(ident, "not in catalog"))
    }

    async fn list_tables(&self, scope: &Scope) -> Result<Vec<TableIdent>> {
        check_catalog(self, scope)?;
        let document = self.load().await?;
        Ok(document
            .entries()?
            .into_keys()
            .filter(|ident| scope.contains(ident))
            .collect())
    }

    async fn register(&self, ident: &TableIdent, entry: &TableEntry) -> Result<()> {
        let key = ident.to_string();
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let (mut document, read) = self.load_versioned().await?;
            if document.tables.contains_key(&key) {
                return Err(already_registered(ident));
            }
            _ = document.tables.insert(key.clone(), entry.clone());
            if self.store_if_unchanged(&document, read).await? {
                let location = entry.location.as_str();
                info!("Registered table {ident} at {location}", ident: key, location: location);
                return Ok(());
            }
            debug!("Catalog document changed while registering {key}, retrying", key: key);
        }
        Err(StewardError::Catalog(format!(
            "catalog document kept changing while registering {ident}"
        )))
    }
}
