// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Restore: resolve PIT → accumulate → restore paths → copy
//!
//! Files are written in dependency order: data and delete files, manifests,
//! manifest lists, then root descriptors. Every metadata file is encoded with
//! the lengths of the re-encoded files it names, and a restore that stops
//! early never leaves a descriptor pointing at missing files.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use diagnostics::*;
use futures::StreamExt;
use icecodec::{PathCodec, RestoredSizes};
use pitlog::{Deadline, FileKind, Granularity, LiveFile, PitId, Repository, RepositoryStore, TableIdent};
use tokio::sync::Mutex;

use crate::catalog::{Catalog, TableEntry};
use crate::copy::{Aborted, TransferOptions, copy_verified, for_each_bounded, put_bytes};
use crate::error::{Result, StewardError};
use crate::snapshot::payload_kind;
use crate::stores::{Located, StoreRegistry};

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub repository_id: String,
    /// PIT to restore; the last PIT when unset
    pub pit: Option<PitId>,
    /// Table location for table scope, base location otherwise
    pub target: String,
    /// Allow writing into a prefix that already holds objects
    pub overwrite: bool,
    pub deadline: Deadline,
}

impl RestoreOptions {
    pub fn new(repository_id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            repository_id: repository_id.into(),
            pit: None,
            target: target.into(),
            overwrite: false,
            deadline: Deadline::none(),
        }
    }

    #[must_use]
    pub fn at_pit(mut self, pit: PitId) -> Self {
        self.pit = Some(pit);
        self
    }

    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredTable {
    /// Identifier the table was backed up under
    pub ident: TableIdent,
    pub location: String,
    /// Concrete root descriptor at the new location
    pub metadata_location: String,
    pub files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub pit_id: PitId,
    pub tables: Vec<RestoredTable>,
    pub files_written: usize,
    pub bytes_written: u64,
}

/// Catalog names for restored tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterAs {
    /// Each table keeps the identifier it was backed up under
    Original,
    /// Every table moves into this namespace
    Namespace(String),
    /// The single restored table takes this identifier
    Table(TableIdent),
}

impl RegisterAs {
    fn ident_for(&self, original: &TableIdent) -> TableIdent {
        match self {
            Self::Original => original.clone(),
            Self::Namespace(ns) => TableIdent::new(ns.clone(), original.name.clone()),
            Self::Table(ident) => ident.clone(),
        }
    }
}

/// Where a table lands under the caller's target
fn table_target(granularity: Granularity, target: &str, ident: &TableIdent) -> String {
    let base = target.trim_end_matches('/');
    match granularity {
        Granularity::Table => base.to_string(),
        Granularity::Database => format!("{base}/{}", ident.name),
        Granularity::Catalog => format!("{base}/{}/{}", ident.namespace, ident.name),
    }
}

const STAGES: usize = 4;

/// Write order of a file kind; files that record lengths come after the
/// files they record
fn stage(kind: FileKind) -> usize {
    match kind {
        FileKind::Data | FileKind::PositionDeletes | FileKind::EqualityDeletes | FileKind::Statistics => 0,
        FileKind::Manifest => 1,
        FileKind::ManifestList => 2,
        FileKind::Descriptor => 3,
    }
}

/// One file to write
struct Placement<'a> {
    key: &'a str,
    file: &'a LiveFile,
    target: String,
    location: &'a str,
}

#[derive(Debug)]
pub struct RestoreExecutor {
    stores: StoreRegistry,
    repositories: RepositoryStore,
    codec: PathCodec,
    transfer: TransferOptions,
}

impl RestoreExecutor {
    pub fn new(stores: StoreRegistry, repositories: RepositoryStore) -> Self {
        Self {
            stores,
            repositories,
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

    async fn ensure_empty(&self, location: &str) -> Result<()> {
        let Located { store, path } = self.stores.resolve(location)?;
        let mut listing = store.list(Some(&path));
        if let Some(first) = listing.next().await {
            _ = first?;
            return Err(StewardError::TargetNotEmpty(location.to_string()));
        }
        Ok(())
    }

    fn restore_uri(&self, relative: &str, location: &str) -> Result<String> {
        self.codec
            .restore_path(relative, location)
            .map_err(|e| StewardError::codec(relative, e))
    }

    async fn write(&self, repo: &Repository, placement: &Placement<'_>, sizes: &RestoredSizes) -> Result<u64> {
        let Placement {
            key,
            file,
            target,
            location,
        } = placement;
        let dst = self.stores.resolve(target)?;
        let kind = payload_kind(file.kind);

        if kind.is_metadata() {
            let stored = repo.get_content(&file.checksum).await?;
            let restored = self
                .codec
                .restore_payload_sized(kind, &stored, location, sizes)
                .map_err(|e| StewardError::codec(*key, e))?;
            let size = restored.len() as u64;
            put_bytes(&dst, Bytes::from(restored), &self.transfer).await?;
            return Ok(size);
        }

        let src = Located {
            store: repo.store().clone(),
            path: repo.content_path(&file.checksum)?,
        };
        copy_verified(key, &src, &dst, &file.checksum, file.size, &self.transfer).await?;
        Ok(file.size)
    }

    /// Write `placements` with the bounded pool; returns files written.
    /// Lengths of rewritten payloads are added to `restored`.
    async fn write_all(
        &self,
        repo: &Repository,
        placements: Vec<&Placement<'_>>,
        known: &RestoredSizes,
        restored: &Mutex<RestoredSizes>,
        bytes: &AtomicU64,
        deadline: &Deadline,
    ) -> std::result::Result<usize, Aborted> {
        for_each_bounded(placements, self.transfer.concurrency, deadline, |placement| async move {
            let written = self.write(repo, placement, known).await?;
            _ = bytes.fetch_add(written, Ordering::Relaxed);
            if placement.file.kind.is_metadata() {
                _ = restored.lock().await.insert(placement.target.clone(), written);
            }
            let target = placement.target.as_str();
            debug!("Restored {target}", target: target);
            Ok(())
        })
        .await
    }

    /// Restore a PIT's tables at new locations
    pub async fn run(&self, options: &RestoreOptions) -> Result<RestoreOutcome> {
        let repo = self.repositories.open(&options.repository_id).await?;
        let pit_id = repo.resolve_pit(options.pit.as_ref())?;
        let manifest = repo.load_pit(&pit_id).await?;
        let files = repo.accumulate(&pit_id, &options.deadline).await?;
        let granularity = repo.scope().granularity;

        let mut tables = Vec::new();
        let mut placements = Vec::new();
        for record in &manifest.tables {
            let location = table_target(granularity, &options.target, &record.ident);
            if !options.overwrite {
                self.ensure_empty(&location).await?;
            }
            let descriptor = record
                .descriptor_key
                .strip_prefix(record.key_prefix.as_str())
                .unwrap_or(&record.descriptor_key);
            let mut count = 0;
            for (relative, file) in files.with_prefix(&record.key_prefix) {
                placements.push((record, relative, file, self.restore_uri(relative, &location)?));
                count += 1;
            }
            tables.push(RestoredTable {
                ident: record.ident.clone(),
                metadata_location: self.restore_uri(descriptor, &location)?,
                location,
                files: count,
            });
        }

        let placements: Vec<Placement<'_>> = placements
            .into_iter()
            .map(|(record, relative, file, target)| {
                let location = tables
                    .iter()
                    .find(|t| t.ident == record.ident)
                    .map_or("", |t| t.location.as_str());
                Placement {
                    key: relative,
                    file,
                    target,
                    location,
                }
            })
            .collect();
        let mut stages: [Vec<&Placement<'_>>; STAGES] = Default::default();
        for placement in &placements {
            stages[stage(placement.file.kind)].push(placement);
        }

        let total = placements.len();
        let bytes = AtomicU64::new(0);
        let restored = Mutex::new(RestoredSizes::new());
        let partial = |written: usize, source: StewardError| StewardError::PartialRestore {
            pit_id: pit_id.to_string(),
            written,
            total,
            source: Box::new(source),
        };

        let mut files_written = 0;
        for batch in stages {
            let known = restored.lock().await.clone();
            let done = self
                .write_all(&repo, batch, &known, &restored, &bytes, &options.deadline)
                .await
                .map_err(|a| partial(files_written + a.completed, a.source))?;
            files_written += done;
        }

        let pit = pit_id.to_string();
        let table_count = tables.len();
        info!("Restored PIT {pit}: {files_written} files across {table_count} tables", pit: pit, files_written: files_written, table_count: table_count);

        Ok(RestoreOutcome {
            pit_id,
            tables,
            files_written,
            bytes_written: bytes.into_inner(),
        })
    }
}

/// Register restored tables with `catalog`; returns the identifiers used
pub async fn register_restored(
    catalog: &dyn Catalog,
    outcome: &RestoreOutcome,
    naming: &RegisterAs,
) -> Result<Vec<TableIdent>> {
    if matches!(naming, RegisterAs::Table(_)) && outcome.tables.len() != 1 {
        return Err(StewardError::Config(format!(
            "a single table name was given but PIT {} restored {} tables",
            outcome.pit_id,
            outcome.tables.len()
        )));
    }
    let mut registered = Vec::new();
    for table in &outcome.tables {
        let ident = naming.ident_for(&table.ident);
        let entry = TableEntry {
            location: table.location.clone(),
            metadata_location: table.metadata_location.clone(),
        };
        catalog.register(&ident, &entry).await?;
        registered.push(ident);
    }
    Ok(registered)
}
