// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Object stores addressed by URI
//!
//! Table locations and repository URLs name objects as `scheme://authority/key`.
//! The registry maps a URI onto the store that serves it and the key inside
//! that store. Registered stores win, longest prefix first; otherwise `s3://`
//! buckets are built from the environment and `file://` paths from the local
//! filesystem root.

use std::collections::BTreeMap;
use std::sync::Arc;

use diagnostics::*;
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, StewardError};

/// One configured store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Prefix this store serves, e.g. `s3://warehouse` or `file:///srv/backups`
    pub url: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub allow_http: bool,
}

/// A store and the key of one object or prefix inside it
#[derive(Clone)]
pub struct Located {
    pub store: Arc<dyn ObjectStore>,
    pub path: Path,
}

impl std::fmt::Debug for Located {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Located")
            .field("store", &self.store.to_string())
            .field("path", &self.path)
            .finish()
    }
}

/// Normalized `scheme://authority/key` form: scheme aliases resolved, bare
/// filesystem paths turned into `file://` URIs, no trailing slash
pub fn normalize_uri(uri: &str) -> Result<String> {
    let trimmed = uri.trim();
    let canonical = if trimmed.starts_with('/') {
        format!("file://{trimmed}")
    } else {
        icecodec::canonicalize(trimmed).into_owned()
    };
    let url = Url::parse(&canonical).map_err(|e| StewardError::InvalidUrl {
        url: uri.to_string(),
        reason: e.to_string(),
    })?;
    if url.scheme() != "file" && url.host_str().is_none_or(str::is_empty) {
        return Err(StewardError::InvalidUrl {
            url: uri.to_string(),
            reason: "missing bucket or authority".to_string(),
        });
    }
    Ok(canonical.trim_end_matches('/').to_string())
}

fn key_path(uri: &str, key: &str) -> Result<Path> {
    let key = key.trim_matches('/');
    Path::parse(key).map_err(|e| StewardError::InvalidUrl {
        url: uri.to_string(),
        reason: e.to_string(),
    })
}

/// `scheme://authority` of a normalized URI, and the key after it
fn split_authority(uri: &str) -> (&str, &str) {
    let after_scheme = uri.find("://").map_or(0, |i| i + 3);
    match uri[after_scheme..].find('/') {
        Some(slash) => uri.split_at(after_scheme + slash),
        None => (uri, ""),
    }
}

/// Build a store rooted at `config.url`
pub fn build_object_store(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>> {
    let normalized = normalize_uri(&config.url)?;
    let url = Url::parse(&normalized).map_err(|e| StewardError::InvalidUrl {
        url: config.url.clone(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "s3" => {
            let bucket = url.host_str().unwrap_or_default();
            let region = config.region.as_deref().unwrap_or("<env>");
            info!("Building S3 store for bucket {bucket} in region {region}", bucket: bucket, region: region);
            let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
            if let Some(region) = &config.region {
                builder = builder.with_region(region);
            }
            if let Some(endpoint) = &config.endpoint {
                builder = builder.with_endpoint(endpoint);
            }
            if let Some(key) = &config.access_key_id {
                builder = builder.with_access_key_id(key);
            }
            if let Some(secret) = &config.secret_access_key {
                builder = builder.with_secret_access_key(secret);
            }
            if config.allow_http {
                builder = builder.with_allow_http(true);
            }
            Ok(Arc::new(builder.build()?))
        }
        "file" => {
            let dir = url.path();
            std::fs::create_dir_all(dir)?;
            info!("Using local store at {dir}", dir: dir);
            Ok(Arc::new(LocalFileSystem::new_with_prefix(dir)?))
        }
        "memory" => Ok(Arc::new(InMemory::new())),
        other => Err(StewardError::InvalidUrl {
            url: config.url.clone(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

/// Maps URIs onto object stores
#[derive(Clone, Default)]
pub struct StoreRegistry {
    /// Normalized prefix → store rooted at that prefix
    stores: BTreeMap<String, Arc<dyn ObjectStore>>,
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("prefixes", &self.stores.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StoreRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and register every configured store
    pub fn from_configs(configs: &[StoreConfig]) -> Result<Self> {
        let mut registry = Self::new();
        for config in configs {
            let store = build_object_store(config)?;
            registry.register(&config.url, store)?;
        }
        Ok(registry)
    }

    /// Serve URIs under `prefix` from `store`, whose root is `prefix`
    pub fn register(&mut self, prefix: &str, store: Arc<dyn ObjectStore>) -> Result<()> {
        let prefix = normalize_uri(prefix)?;
        debug!("Registered store for {prefix}", prefix: prefix);
        _ = self.stores.insert(prefix, store);
        Ok(())
    }

    fn registered(&self, uri: &str) -> Option<(&str, &Arc<dyn ObjectStore>)> {
        self.stores
            .iter()
            .rev()
            .find(|(prefix, _)| {
                uri.strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
            })
            .map(|(prefix, store)| (prefix.as_str(), store))
    }

    /// The store serving `uri` and the key of `uri` inside it
    pub fn resolve(&self, uri: &str) -> Result<Located> {
        let normalized = normalize_uri(uri)?;

        // Reverse lexical order visits longer prefixes of the same URI first
        if let Some((prefix, store)) = self.registered(&normalized) {
            return Ok(Located {
                store: store.clone(),
                path: key_path(uri, &normalized[prefix.len()..])?,
            });
        }

        let (authority, key) = split_authority(&normalized);
        let store: Arc<dyn ObjectStore> = if authority.starts_with("s3://") {
            build_object_store(&StoreConfig {
                url: authority.to_string(),
                ..StoreConfig::default()
            })?
        } else if authority == "file://" {
            Arc::new(LocalFileSystem::new())
        } else {
            return Err(StewardError::UnknownStore(normalized));
        };
        Ok(Located {
            store,
            path: key_path(uri, key)?,
        })
    }
}
