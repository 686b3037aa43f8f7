// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Capture of one table's file set
//!
//! Capture walks root descriptor → manifest lists → manifests → data and
//! delete files. Metadata payloads are read, abstracted and held in memory;
//! other files are hashed in place and copied later only if the delta needs
//! them. Every captured file records the metadata file that led to it, so a
//! lenient backup can tell which files depend on one it could not read.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use diagnostics::*;
use futures::{StreamExt, TryStreamExt, stream};
use icecodec::avro::ManifestContainer;
use icecodec::{DataContent, PathCodec, PayloadKind, read_descriptor, read_manifest, read_manifest_list};
use object_store::ObjectStore;
use pitlog::{ContentHasher, Deadline, FileKind, FileSet, LiveFile, RetryPolicy, TableIdent, TableRecord, sha256_hex};

use crate::catalog::TableEntry;
use crate::error::{Result, StewardError};
use crate::stores::{Located, StoreRegistry};

/// How a captured file's bytes are rewritten between storage and a table
#[must_use]
pub fn payload_kind(kind: FileKind) -> PayloadKind {
    match kind {
        FileKind::Descriptor => PayloadKind::RootDescriptor,
        FileKind::ManifestList => PayloadKind::ManifestList,
        FileKind::Manifest => PayloadKind::ManifestFile,
        FileKind::PositionDeletes => PayloadKind::PositionDeletes,
        FileKind::Data | FileKind::EqualityDeletes | FileKind::Statistics => PayloadKind::Opaque,
    }
}

#[derive(Debug, Clone)]
pub struct CapturedFile {
    pub kind: FileKind,
    /// URI the file was read from
    pub source: String,
    /// SHA-256 of the bytes the repository stores
    pub checksum: String,
    pub size: u64,
    pub referenced_by: Option<String>,
    /// Abstracted payload, for metadata kinds
    pub payload: Option<Bytes>,
}

impl CapturedFile {
    #[must_use]
    pub fn live(&self) -> LiveFile {
        LiveFile {
            checksum: self.checksum.clone(),
            size: self.size,
            kind: self.kind,
            referenced_by: self.referenced_by.clone(),
        }
    }
}

/// One table's files at capture time, keyed by repository key
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    pub ident: TableIdent,
    pub location: String,
    pub metadata_location: String,
    pub format_version: Option<i64>,
    pub current_snapshot_id: Option<i64>,
    pub key_prefix: String,
    pub descriptor_key: String,
    pub files: BTreeMap<String, CapturedFile>,
    /// Keys of referenced files that could not be read
    pub unreadable: BTreeSet<String>,
}

impl TableSnapshot {
    #[must_use]
    pub fn file_set(&self) -> FileSet {
        let mut set = FileSet::empty();
        for (key, file) in &self.files {
            _ = set.insert(key.clone(), file.live());
        }
        set
    }

    #[must_use]
    pub fn record(&self) -> TableRecord {
        TableRecord {
            ident: self.ident.clone(),
            original_location: self.location.clone(),
            key_prefix: self.key_prefix.clone(),
            descriptor_key: self.descriptor_key.clone(),
            metadata_location: self.metadata_location.clone(),
        }
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|f| f.size).sum()
    }
}

/// A file found by the walk but not yet read
struct Pending {
    key: String,
    source: String,
    kind: FileKind,
    referenced_by: Option<String>,
}

struct Walker<'a> {
    stores: &'a StoreRegistry,
    codec: PathCodec,
    retry: RetryPolicy,
    deadline: &'a Deadline,
    location: &'a str,
    key_prefix: &'a str,
    files: BTreeMap<String, CapturedFile>,
    unreadable: BTreeSet<String>,
}

impl Walker<'_> {
    /// Repository key and readable URI for a path as metadata spells it
    fn place(&self, path: &str) -> Result<(String, String)> {
        let relative = self
            .codec
            .abstract_path(path, self.location)
            .map_err(|e| StewardError::codec(path, e))?;
        let source = self
            .codec
            .restore_path(&relative, self.location)
            .map_err(|e| StewardError::codec(path, e))?;
        Ok((format!("{}{relative}", self.key_prefix), source))
    }

    fn pending(&self, path: &str, kind: FileKind, referenced_by: Option<&str>) -> Result<Pending> {
        let (key, source) = self.place(path)?;
        Ok(Pending {
            key,
            source,
            kind,
            referenced_by: referenced_by.map(str::to_string),
        })
    }

    fn seen(&self, key: &str) -> bool {
        self.files.contains_key(key) || self.unreadable.contains(key)
    }

    /// Bytes at `source`, or `None` if the object is gone
    async fn fetch(&self, source: &str) -> Result<Option<Bytes>> {
        self.deadline.check("capture")?;
        let Located { store, path } = self.stores.resolve(source)?;
        match self.retry.get_bytes(store.as_ref(), &path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read and abstract a metadata file; returns the original bytes
    async fn capture_metadata(&mut self, file: Pending) -> Result<Option<Bytes>> {
        if self.seen(&file.key) {
            return Ok(None);
        }
        let Some(bytes) = self.fetch(&file.source).await? else {
            let key = file.key.as_str();
            warn!("Referenced metadata file {key} is missing", key: key);
            _ = self.unreadable.insert(file.key);
            return Ok(None);
        };
        let abstracted = self
            .codec
            .abstract_payload(payload_kind(file.kind), &bytes, self.location)
            .map_err(|e| StewardError::codec(&file.source, e))?;
        _ = self.files.insert(
            file.key,
            CapturedFile {
                kind: file.kind,
                source: file.source,
                checksum: sha256_hex(&abstracted),
                size: abstracted.len() as u64,
                referenced_by: file.referenced_by,
                payload: Some(Bytes::from(abstracted)),
            },
        );
        Ok(Some(bytes))
    }
}

async fn hash_object(stores: &StoreRegistry, retry: &RetryPolicy, source: &str) -> Result<Option<(String, u64)>> {
    let Located { store, path } = stores.resolve(source)?;
    let (store, path) = (store.as_ref(), &path);
    let hashed = retry
        .run("hash", move || async move {
            let mut stream = store.get(path).await?.into_stream();
            let mut hasher = ContentHasher::new();
            while let Some(chunk) = stream.try_next().await? {
                hasher.update(&chunk);
            }
            let size = hasher.len();
            Ok((hasher.finish(), size))
        })
        .await;
    match hashed {
        Ok(hashed) => Ok(Some(hashed)),
        Err(object_store::Error::NotFound { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Settings for [`capture_table`]
#[derive(Debug, Clone, Copy)]
pub struct CaptureOptions<'a> {
    pub codec: PathCodec,
    pub retry: RetryPolicy,
    /// Files hashed at once
    pub concurrency: usize,
    pub deadline: &'a Deadline,
}

/// Capture the current state of one table.
///
/// The root descriptor must be readable. Any other missing file is reported
/// in [`TableSnapshot::unreadable`] and its references are not followed.
pub async fn capture_table(
    stores: &StoreRegistry,
    ident: &TableIdent,
    entry: &TableEntry,
    key_prefix: &str,
    options: &CaptureOptions<'_>,
) -> Result<TableSnapshot> {
    let mut walker = Walker {
        stores,
        codec: options.codec,
        retry: options.retry,
        deadline: options.deadline,
        location: &entry.location,
        key_prefix,
        files: BTreeMap::new(),
        unreadable: BTreeSet::new(),
    };

    let root = walker.pending(&entry.metadata_location, FileKind::Descriptor, None)?;
    let descriptor_key = root.key.clone();
    let bytes = walker
        .capture_metadata(root)
        .await?
        .ok_or_else(|| StewardError::unavailable(ident, format!("{} is missing", entry.metadata_location)))?;
    let refs = read_descriptor(&bytes).map_err(|e| StewardError::codec(&entry.metadata_location, e))?;
    let parent = Some(descriptor_key.as_str());

    for historical in &refs.metadata_log {
        let file = walker.pending(historical, FileKind::Descriptor, parent)?;
        _ = walker.capture_metadata(file).await?;
    }

    let mut manifests = Vec::new();
    for list_path in &refs.manifest_lists {
        let file = walker.pending(list_path, FileKind::ManifestList, parent)?;
        let list_key = file.key.clone();
        let Some(bytes) = walker.capture_metadata(file).await? else {
            continue;
        };
        let container = ManifestContainer::decode(&bytes).map_err(|e| StewardError::codec(list_path, e))?;
        for listed in read_manifest_list(&container).map_err(|e| StewardError::codec(list_path, e))? {
            manifests.push((listed.manifest_path, list_key.clone()));
        }
    }
    for path in &refs.snapshot_manifests {
        manifests.push((path.clone(), descriptor_key.clone()));
    }

    let mut opaque = Vec::new();
    for path in &refs.statistics_files {
        opaque.push(walker.pending(path, FileKind::Statistics, parent)?);
    }

    let mut delete_files = Vec::new();
    for (manifest_path, list_key) in &manifests {
        let file = walker.pending(manifest_path, FileKind::Manifest, Some(list_key.as_str()))?;
        let manifest_key = file.key.clone();
        let Some(bytes) = walker.capture_metadata(file).await? else {
            continue;
        };
        let container = ManifestContainer::decode(&bytes).map_err(|e| StewardError::codec(manifest_path, e))?;
        let entries = read_manifest(&container).map_err(|e| StewardError::codec(manifest_path, e))?;
        for entry in entries.iter().filter(|e| e.is_live()) {
            let parquet = entry
                .file_format
                .as_deref()
                .is_none_or(|f| f.eq_ignore_ascii_case("parquet"));
            let kind = match entry.content {
                DataContent::Data => FileKind::Data,
                DataContent::PositionDeletes if parquet => FileKind::PositionDeletes,
                // Deletion vectors are not rewritten
                DataContent::PositionDeletes => FileKind::Data,
                DataContent::EqualityDeletes => FileKind::EqualityDeletes,
            };
            let file = walker.pending(&entry.file_path, kind, Some(manifest_key.as_str()))?;
            if kind == FileKind::PositionDeletes {
                delete_files.push(file);
            } else {
                opaque.push(file);
            }
        }
    }

    for file in delete_files {
        _ = walker.capture_metadata(file).await?;
    }

    let mut seen = BTreeSet::new();
    opaque.retain(|file| !walker.seen(&file.key) && seen.insert(file.key.clone()));
    let deadline = options.deadline;
    let retry = options.retry;
    let hashed: Vec<(Pending, Option<(String, u64)>)> = stream::iter(opaque)
        .map(|file| async move {
            deadline.check("capture")?;
            let hashed = hash_object(stores, &retry, &file.source).await?;
            Ok::<_, StewardError>((file, hashed))
        })
        .buffer_unordered(options.concurrency.max(1))
        .try_collect()
        .await?;

    for (file, hashed) in hashed {
        match hashed {
            Some((checksum, size)) => {
                _ = walker.files.insert(
                    file.key,
                    CapturedFile {
                        kind: file.kind,
                        source: file.source,
                        checksum,
                        size,
                        referenced_by: file.referenced_by,
                        payload: None,
                    },
                );
            }
            None => {
                let key = file.key.as_str();
                warn!("Referenced file {key} is missing", key: key);
                _ = walker.unreadable.insert(file.key);
            }
        }
    }

    let table = ident.to_string();
    let count = walker.files.len();
    let unreadable = walker.unreadable.len();
    info!("Captured {count} files for {table} ({unreadable} unreadable)", count: count, table: table, unreadable: unreadable);

    Ok(TableSnapshot {
        ident: ident.clone(),
        location: entry.location.clone(),
        metadata_location: entry.metadata_location.clone(),
        format_version: refs.format_version,
        current_snapshot_id: refs.current_snapshot_id,
        key_prefix: key_prefix.to_string(),
        descriptor_key,
        files: walker.files,
        unreadable: walker.unreadable,
    })
}
