// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Backup: capture → abstract → delta → copy → append
//!
//! The first backup of a repository is the same algorithm run against the
//! empty file set. Nothing becomes visible until the final index write, so a
//! failed backup leaves at most unreferenced content behind.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use diagnostics::*;
use icecodec::PathCodec;
use pitlog::{
    Deadline, DeltaMode, FileSet, Granularity, PitCounts, PitId, PitManifest, RepositoryStore,
    Scope, TableIdent, compute_delta,
};

use crate::catalog::Catalog;
use crate::copy::{TransferOptions, copy_verified, for_each_bounded};
use crate::error::{Result, StewardError};
use crate::snapshot::{CaptureOptions, CapturedFile, TableSnapshot, capture_table};
use crate::stores::{Located, StoreRegistry};

#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub repository_id: String,
    pub scope: Scope,
    pub delta_mode: DeltaMode,
    pub deadline: Deadline,
}

impl BackupOptions {
    pub fn new(repository_id: impl Into<String>, scope: Scope) -> Self {
        Self {
            repository_id: repository_id.into(),
            scope,
            delta_mode: DeltaMode::default(),
            deadline: Deadline::none(),
        }
    }

    #[must_use]
    pub fn with_delta_mode(mut self, mode: DeltaMode) -> Self {
        self.delta_mode = mode;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOutcome {
    pub pit_id: PitId,
    pub parent: Option<PitId>,
    pub tables: Vec<TableIdent>,
    pub counts: PitCounts,
    /// Files written to the content area
    pub stored: usize,
    /// Files whose bytes the content area already held
    pub deduplicated: usize,
    pub bytes_stored: u64,
    /// Previous files kept unchanged because capture could not read them
    pub carried_forward: Vec<String>,
}

pub struct BackupExecutor {
    stores: StoreRegistry,
    repositories: RepositoryStore,
    catalog: Arc<dyn Catalog>,
    codec: PathCodec,
    transfer: TransferOptions,
}

impl std::fmt::Debug for BackupExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupExecutor")
            .field("stores", &self.stores)
            .field("repositories", &self.repositories)
            .field("catalog", &self.catalog.name())
            .field("transfer", &self.transfer)
            .finish()
    }
}

impl BackupExecutor {
    pub fn new(stores: StoreRegistry, repositories: RepositoryStore, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            stores,
            repositories,
            catalog,
            codec: PathCodec::default(),
            transfer: TransferOptions::default(),
        }
    }

    #[must_use]
    pub fn with_codec(mut self, codec: PathCodec) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn with_transfer(mut self, transfer: TransferOptions) -> Self {
        self.transfer = transfer;
        self
    }

    /// Tables the scope covers, as the catalog lists them now
    async fn tables(&self, scope: &Scope) -> Result<Vec<TableIdent>> {
        if scope.catalog != self.catalog.name() {
            return Err(StewardError::Catalog(format!(
                "scope {scope} names catalog '{}', configured catalog is '{}'",
                scope.catalog,
                self.catalog.name()
            )));
        }
        let tables = match scope.granularity {
            Granularity::Table => scope.table_ident().into_iter().collect(),
            Granularity::Database | Granularity::Catalog => self.catalog.list_tables(scope).await?,
        };
        if tables.is_empty() {
            return Err(StewardError::unavailable(scope, "scope contains no tables"));
        }
        Ok(tables)
    }

    async fn capture(&self, scope: &Scope, deadline: &Deadline) -> Result<Vec<TableSnapshot>> {
        let options = CaptureOptions {
            codec: self.codec,
            retry: self.transfer.retry,
            concurrency: self.transfer.concurrency,
            deadline,
        };
        let mut snapshots = Vec::new();
        for ident in self.tables(scope).await? {
            let entry = self.catalog.resolve(&ident).await?;
            let prefix = scope.key_prefix(&ident);
            snapshots.push(capture_table(&self.stores, &ident, &entry, &prefix, &options).await?);
        }
        Ok(snapshots)
    }

    /// Take one backup and append it as the repository's new last PIT
    pub async fn run(&self, options: &BackupOptions) -> Result<BackupOutcome> {
        let BackupOptions {
            repository_id,
            scope,
            delta_mode,
            deadline,
        } = options;
        let mut repo = self.repositories.create_or_open(repository_id, scope).await?;
        let parent = repo.last_pit().cloned();

        let snapshots = self.capture(scope, deadline).await?;
        let mut current = FileSet::empty();
        let mut unreadable = BTreeSet::new();
        let mut captured: BTreeMap<&str, &CapturedFile> = BTreeMap::new();
        for snapshot in &snapshots {
            for (key, file) in &snapshot.files {
                _ = current.insert(key.clone(), file.live());
                _ = captured.insert(key.as_str(), file);
            }
            unreadable.extend(snapshot.unreadable.iter().cloned());
        }

        let previous = match &parent {
            Some(pit) => repo.accumulate(pit, deadline).await?,
            None => FileSet::empty(),
        };
        let delta = compute_delta(&previous, &current, &unreadable, *delta_mode)?;
        for path in &delta.carried_forward {
            warn!("Carrying {path} forward unchanged: capture could not read it", path: path);
        }

        let jobs: Vec<(&str, &str, &CapturedFile)> = delta
            .to_copy()
            .filter_map(|(key, checksum, _)| captured.get(key).map(|file| (key, checksum, *file)))
            .collect();
        let stored = AtomicUsize::new(0);
        let bytes_stored = AtomicU64::new(0);
        let repo_ref = &repo;
        let (stored_ref, bytes_ref) = (&stored, &bytes_stored);
        let copied = for_each_bounded(jobs, self.transfer.concurrency, deadline, |(key, checksum, file)| async move {
            let wrote = if let Some(payload) = &file.payload {
                repo_ref
                    .put_content_expecting(key, checksum, payload.clone())
                    .await?
                    .stored
            } else if repo_ref.has_content(checksum).await? {
                false
            } else {
                let src = self.stores.resolve(&file.source)?;
                let dst = Located {
                    store: repo_ref.store().clone(),
                    path: repo_ref.content_path(checksum)?,
                };
                copy_verified(key, &src, &dst, checksum, file.size, &self.transfer).await?;
                true
            };
            if wrote {
                _ = stored_ref.fetch_add(1, Ordering::Relaxed);
                _ = bytes_ref.fetch_add(file.size, Ordering::Relaxed);
                debug!("Stored {key}", key: key);
            }
            Ok(())
        })
        .await?;

        let mut manifest = PitManifest::new(parent.clone(), scope.clone());
        manifest.tables = snapshots.iter().map(TableSnapshot::record).collect();
        manifest.added = delta.added;
        manifest.modified = delta.modified;
        manifest.deleted = delta.deleted;

        deadline.check("append")?;
        repo.append_pit(&manifest, parent.as_ref()).await?;

        let stored = stored.into_inner();
        let pit_id = manifest.pit_id.to_string();
        let counts = manifest.counts();
        info!(
            "Backup {pit_id} of {scope}: {added} added, {modified} modified, {deleted} deleted, {stored} stored",
            scope: scope.to_string(),
            added: counts.added,
            modified: counts.modified,
            deleted: counts.deleted,
            pit_id: pit_id,
            stored: stored
        );

        Ok(BackupOutcome {
            pit_id: manifest.pit_id,
            parent,
            tables: snapshots.into_iter().map(|s| s.ident).collect(),
            counts,
            stored,
            deduplicated: copied.saturating_sub(stored),
            bytes_stored: bytes_stored.into_inner(),
            carried_forward: delta.carried_forward,
        })
    }
}
