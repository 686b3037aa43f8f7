// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! The backup repository: an append-only chain of PITs over an object store
//!
//! Layout under `<base>/<repository-id>/`:
//!
//! ```text
//! index/<generation:020>.json   repository index, highest generation wins
//! pits/<pit-id>.json            immutable PIT manifest
//! content/<aa>/<sha256>         content-addressed bytes
//! ```

use std::sync::Arc;

use bytes::Bytes;
use diagnostics::*;
use futures::{StreamExt, TryStreamExt, stream};
use object_store::ObjectStore;
use object_store::path::Path;
use regex::Regex;

use crate::checksum::{is_checksum, sha256_hex};
use crate::deadline::Deadline;
use crate::error::RepositoryError;
use crate::fileset::FileSet;
use crate::index::{RepositoryIndex, index_file_name, parse_index_file_name};
use crate::pit::{PitId, PitManifest};
use crate::scope::Scope;
use crate::store::RetryPolicy;

type Result<T> = std::result::Result<T, RepositoryError>;

const REPOSITORY_ID_PATTERN: &str = "^[A-Za-z0-9_-]+$";
const VERIFY_CONCURRENCY: usize = 16;

fn validate_id(repository_id: &str) -> Result<()> {
    let valid = Regex::new(REPOSITORY_ID_PATTERN).is_ok_and(|re| re.is_match(repository_id));
    if valid {
        Ok(())
    } else {
        Err(RepositoryError::InvalidRepositoryId(repository_id.to_string()))
    }
}

fn describe(pit: Option<&PitId>) -> String {
    pit.map_or_else(|| "<none>".to_string(), ToString::to_string)
}

/// Where repositories live: a store and a base prefix
#[derive(Clone)]
pub struct RepositoryStore {
    store: Arc<dyn ObjectStore>,
    base: Path,
    retry: RetryPolicy,
}

impl std::fmt::Debug for RepositoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryStore")
            .field("store", &self.store.to_string())
            .field("base", &self.base)
            .finish()
    }
}

impl RepositoryStore {
    pub fn new(store: Arc<dyn ObjectStore>, base: Path) -> Self {
        Self {
            store,
            base,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn root(&self, repository_id: &str) -> Path {
        self.base.child(repository_id)
    }

    fn handle(&self, repository_id: &str, index: RepositoryIndex) -> Repository {
        Repository {
            store: self.store.clone(),
            root: self.root(repository_id),
            retry: self.retry,
            index,
        }
    }

    /// Open a repository, creating it with `scope` frozen if it is absent.
    ///
    /// An existing repository must have been created with the same scope.
    pub async fn create_or_open(&self, repository_id: &str, scope: &Scope) -> Result<Repository> {
        validate_id(repository_id)?;
        let root = self.root(repository_id);

        let index = match load_latest_index(self.store.as_ref(), &root, &self.retry).await? {
            Some(index) => index,
            None => {
                let fresh = RepositoryIndex::new(repository_id, scope.clone());
                let path = root.child("index").child(index_file_name(0));
                let bytes = Bytes::from(serde_json::to_vec_pretty(&fresh)?);
                if self.retry.put_if_absent(self.store.as_ref(), &path, bytes).await? {
                    info!("Created repository {repository_id} with scope {scope}", repository_id: repository_id, scope: scope.to_string());
                    fresh
                } else {
                    // Another writer created it first
                    load_latest_index(self.store.as_ref(), &root, &self.retry)
                        .await?
                        .ok_or_else(|| RepositoryError::RepositoryNotFound(repository_id.to_string()))?
                }
            }
        };

        if !index.scope.is_compatible(scope) {
            return Err(RepositoryError::ScopeMismatch {
                existing: index.scope,
                incoming: scope.clone(),
            });
        }
        Ok(self.handle(repository_id, index))
    }

    /// Open an existing repository for reading or appending
    pub async fn open(&self, repository_id: &str) -> Result<Repository> {
        validate_id(repository_id)?;
        let root = self.root(repository_id);
        let index = load_latest_index(self.store.as_ref(), &root, &self.retry)
            .await?
            .ok_or_else(|| RepositoryError::RepositoryNotFound(repository_id.to_string()))?;
        Ok(self.handle(repository_id, index))
    }

    /// Ids of repositories under the base prefix
    pub async fn list(&self) -> Result<Vec<String>> {
        let listing = self.store.list_with_delimiter(Some(&self.base)).await?;
        let mut ids: Vec<String> = listing
            .common_prefixes
            .iter()
            .filter_map(|p| p.filename().map(str::to_string))
            .filter(|id| validate_id(id).is_ok())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

async fn load_latest_index(
    store: &dyn ObjectStore,
    root: &Path,
    retry: &RetryPolicy,
) -> Result<Option<RepositoryIndex>> {
    let prefix = root.child("index");
    let listed = retry.list(store, &prefix).await?;
    let Some(generation) = listed
        .iter()
        .filter_map(|meta| meta.location.filename().and_then(parse_index_file_name))
        .max()
    else {
        return Ok(None);
    };

    let bytes = retry
        .get_bytes(store, &prefix.child(index_file_name(generation)))
        .await?;
    let index: RepositoryIndex = serde_json::from_slice(&bytes)?;
    if index.generation != generation {
        return Err(RepositoryError::chain(
            describe(index.last_pit.as_ref()),
            format!(
                "index object {generation} records generation {}",
                index.generation
            ),
        ));
    }
    Ok(Some(index))
}

/// Result of checking that a PIT's files are all present
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub checked: usize,
    /// Keys whose content object is absent
    pub missing: Vec<String>,
    /// Keys whose content no longer hashes to the recorded checksum
    pub corrupt: Vec<String>,
}

impl VerifyReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty() && self.corrupt.is_empty()
    }
}

/// Outcome of storing bytes in the content area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentWrite {
    pub checksum: String,
    /// False when identical bytes were already stored
    pub stored: bool,
}

/// An open repository
pub struct Repository {
    store: Arc<dyn ObjectStore>,
    root: Path,
    retry: RetryPolicy,
    index: RepositoryIndex,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("root", &self.root)
            .field("generation", &self.index.generation)
            .field("last_pit", &self.index.last_pit)
            .finish()
    }
}

impl Repository {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.index.repository_id
    }

    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.index.scope
    }

    #[must_use]
    pub fn index(&self) -> &RepositoryIndex {
        &self.index
    }

    #[must_use]
    pub fn last_pit(&self) -> Option<&PitId> {
        self.index.last_pit.as_ref()
    }

    #[must_use]
    pub fn pits(&self) -> &[crate::index::PitSummary] {
        &self.index.pits
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    #[must_use]
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    fn pit_path(&self, pit_id: &PitId) -> Path {
        self.root.child("pits").child(format!("{pit_id}.json"))
    }

    /// Re-read the current index generation
    pub async fn refresh(&mut self) -> Result<()> {
        self.index = load_latest_index(self.store.as_ref(), &self.root, &self.retry)
            .await?
            .ok_or_else(|| RepositoryError::RepositoryNotFound(self.index.repository_id.clone()))?;
        Ok(())
    }

    /// The explicit PIT if it exists, else the last PIT
    pub fn resolve_pit(&self, pit: Option<&PitId>) -> Result<PitId> {
        match pit {
            Some(id) => self
                .index
                .summary(id)
                .map(|s| s.pit_id.clone())
                .ok_or_else(|| RepositoryError::PitNotFound(id.to_string())),
            None => self
                .index
                .last_pit
                .clone()
                .ok_or_else(|| RepositoryError::PitNotFound("<last>".to_string())),
        }
    }

    /// Create-only write that treats finding our own bytes as success
    async fn create_exclusive(&self, path: &Path, bytes: Bytes) -> Result<bool> {
        if self
            .retry
            .put_if_absent(self.store.as_ref(), path, bytes.clone())
            .await?
        {
            return Ok(true);
        }
        let existing = self.retry.get_bytes(self.store.as_ref(), path).await?;
        Ok(existing == bytes)
    }

    /// Append `manifest` as the successor of `expected_parent`.
    ///
    /// The PIT manifest is written before the index generation that makes it
    /// visible. If another append won the race for the next generation this
    /// fails with `ConcurrentModification` and the repository is unchanged.
    pub async fn append_pit(&mut self, manifest: &PitManifest, expected_parent: Option<&PitId>) -> Result<()> {
        if manifest.parent.as_ref() != expected_parent {
            return Err(RepositoryError::ParentMismatch {
                pit_id: manifest.pit_id.clone(),
                declared: manifest.parent.clone(),
                expected: expected_parent.cloned(),
            });
        }
        if !self.index.scope.is_compatible(&manifest.scope) {
            return Err(RepositoryError::ScopeMismatch {
                existing: self.index.scope.clone(),
                incoming: manifest.scope.clone(),
            });
        }

        let latest = load_latest_index(self.store.as_ref(), &self.root, &self.retry)
            .await?
            .ok_or_else(|| RepositoryError::RepositoryNotFound(self.index.repository_id.clone()))?;
        if latest.last_pit.as_ref() != expected_parent {
            return Err(RepositoryError::ConcurrentModification {
                expected: describe(expected_parent),
                actual: describe(latest.last_pit.as_ref()),
            });
        }
        if latest.summary(&manifest.pit_id).is_some() {
            return Err(RepositoryError::chain(&manifest.pit_id, "PIT id already in index"));
        }

        let pit_bytes = Bytes::from(serde_json::to_vec_pretty(manifest)?);
        if !self.create_exclusive(&self.pit_path(&manifest.pit_id), pit_bytes).await? {
            return Err(RepositoryError::chain(
                &manifest.pit_id,
                "a different manifest already exists under this PIT id",
            ));
        }

        let next = latest.next(manifest);
        let index_path = self.root.child("index").child(index_file_name(next.generation));
        let index_bytes = Bytes::from(serde_json::to_vec_pretty(&next)?);
        if !self.create_exclusive(&index_path, index_bytes).await? {
            let pit_id = manifest.pit_id.to_string();
            warn!("Lost index race for PIT {pit_id}, generation {generation}", pit_id: pit_id, generation: next.generation);
            let actual = load_latest_index(self.store.as_ref(), &self.root, &self.retry)
                .await?
                .and_then(|index| index.last_pit);
            return Err(RepositoryError::ConcurrentModification {
                expected: describe(expected_parent),
                actual: describe(actual.as_ref()),
            });
        }

        let pit_id = manifest.pit_id.to_string();
        let counts = manifest.counts();
        info!(
            "Appended PIT {pit_id} at generation {generation}: {added} added, {modified} modified, {deleted} deleted",
            pit_id: pit_id,
            generation: next.generation,
            added: counts.added,
            modified: counts.modified,
            deleted: counts.deleted
        );
        self.index = next;
        Ok(())
    }

    pub async fn load_pit(&self, pit_id: &PitId) -> Result<PitManifest> {
        let bytes = match self.retry.get_bytes(self.store.as_ref(), &self.pit_path(pit_id)).await {
            Ok(bytes) => bytes,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(RepositoryError::PitNotFound(pit_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let manifest: PitManifest = serde_json::from_slice(&bytes)?;
        if &manifest.pit_id != pit_id {
            return Err(RepositoryError::chain(pit_id, "manifest records a different PIT id"));
        }
        Ok(manifest)
    }

    /// PIT ids from the chain root to `pit_id`
    pub fn chain(&self, pit_id: &PitId) -> Result<Vec<PitId>> {
        self.index.chain(pit_id)
    }

    /// The live file set at `pit_id`, replayed from the chain root
    pub async fn accumulate(&self, pit_id: &PitId, deadline: &Deadline) -> Result<FileSet> {
        let chain = self.chain(pit_id)?;
        let mut files = FileSet::empty();
        let mut parent: Option<PitId> = None;
        for id in &chain {
            deadline.check("chain traversal")?;
            let manifest = self.load_pit(id).await?;
            if manifest.parent != parent {
                return Err(RepositoryError::chain(
                    id,
                    format!(
                        "manifest parent {} disagrees with index parent {}",
                        describe(manifest.parent.as_ref()),
                        describe(parent.as_ref())
                    ),
                ));
            }
            files.apply(&manifest)?;
            parent = Some(id.clone());
        }
        let count = files.len();
        let pit = pit_id.to_string();
        debug!("Accumulated {count} files for PIT {pit}", count: count, pit: pit);
        Ok(files)
    }

    /// Content object key for a SHA-256 hex checksum
    pub fn content_path(&self, checksum: &str) -> Result<Path> {
        if !is_checksum(checksum) {
            return Err(RepositoryError::InvalidChecksum(checksum.to_string()));
        }
        Ok(self
            .root
            .child("content")
            .child(&checksum[..2])
            .child(checksum))
    }

    /// Store bytes under their checksum; identical bytes are stored once
    pub async fn put_content(&self, bytes: Bytes) -> Result<ContentWrite> {
        let checksum = sha256_hex(&bytes);
        let path = self.content_path(&checksum)?;
        let stored = self
            .retry
            .put_if_absent(self.store.as_ref(), &path, bytes)
            .await?;
        Ok(ContentWrite { checksum, stored })
    }

    /// [`Self::put_content`] for bytes that must hash to `expected`
    pub async fn put_content_expecting(&self, key: &str, expected: &str, bytes: Bytes) -> Result<ContentWrite> {
        let actual = sha256_hex(&bytes);
        if actual != expected {
            return Err(RepositoryError::ChecksumMismatch {
                path: key.to_string(),
                expected: expected.to_string(),
                actual,
            });
        }
        self.put_content(bytes).await
    }

    /// Read content back, checking it still hashes to its name
    pub async fn get_content(&self, checksum: &str) -> Result<Bytes> {
        let path = self.content_path(checksum)?;
        let bytes = self.retry.get_bytes(self.store.as_ref(), &path).await?;
        let actual = sha256_hex(&bytes);
        if actual != checksum {
            return Err(RepositoryError::ChecksumMismatch {
                path: path.to_string(),
                expected: checksum.to_string(),
                actual,
            });
        }
        Ok(bytes)
    }

    pub async fn has_content(&self, checksum: &str) -> Result<bool> {
        let path = self.content_path(checksum)?;
        Ok(self.retry.exists(self.store.as_ref(), &path).await?.is_some())
    }

    /// Check that every file live at `pit_id` has content; `deep` re-hashes it
    pub async fn verify(&self, pit_id: &PitId, deep: bool, deadline: &Deadline) -> Result<VerifyReport> {
        let files = self.accumulate(pit_id, deadline).await?;
        let outcomes: Vec<(String, Option<bool>)> = stream::iter(files.iter())
            .map(|(path, file)| async move {
                deadline.check("verify")?;
                let state = if deep {
                    match self.get_content(&file.checksum).await {
                        Ok(_) => Some(true),
                        Err(RepositoryError::ChecksumMismatch { .. }) => Some(false),
                        Err(RepositoryError::ObjectStore(object_store::Error::NotFound { .. })) => None,
                        Err(e) => return Err(e),
                    }
                } else {
                    self.has_content(&file.checksum).await?.then_some(true)
                };
                Ok::<_, RepositoryError>((path.clone(), state))
            })
            .buffer_unordered(VERIFY_CONCURRENCY)
            .try_collect()
            .await?;

        let mut report = VerifyReport {
            checked: outcomes.len(),
            ..VerifyReport::default()
        };
        for (path, state) in outcomes {
            match state {
                Some(true) => {}
                Some(false) => report.corrupt.push(path),
                None => report.missing.push(path),
            }
        }
        report.missing.sort();
        report.corrupt.sort();
        Ok(report)
    }
}
