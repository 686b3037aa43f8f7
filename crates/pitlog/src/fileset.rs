// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! The live file set of a PIT, built by replaying the chain

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RepositoryError;
use crate::pit::{FileEntry, FileKind, PitManifest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveFile {
    pub checksum: String,
    pub size: u64,
    pub kind: FileKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_by: Option<String>,
}

impl LiveFile {
    #[must_use]
    pub fn into_entry(self, path: String) -> FileEntry {
        FileEntry {
            path,
            checksum: self.checksum,
            size: self.size,
            kind: self.kind,
            referenced_by: self.referenced_by,
        }
    }
}

impl From<&FileEntry> for LiveFile {
    fn from(entry: &FileEntry) -> Self {
        Self {
            checksum: entry.checksum.clone(),
            size: entry.size,
            kind: entry.kind,
            referenced_by: entry.referenced_by.clone(),
        }
    }
}

/// Repository key → live file, ordered by key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    files: BTreeMap<String, LiveFile>,
}

impl FileSet {
    /// The sentinel state before the first PIT
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, file: LiveFile) -> Option<LiveFile> {
        self.files.insert(path.into(), file)
    }

    pub fn insert_entry(&mut self, entry: &FileEntry) -> Option<LiveFile> {
        self.insert(entry.path.clone(), LiveFile::from(entry))
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&LiveFile> {
        self.files.get(path)
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LiveFile)> {
        self.files.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Files under a key prefix, keys returned with the prefix removed
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a LiveFile)> {
        self.files
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .map_while(move |(path, file)| path.strip_prefix(prefix).map(|rel| (rel, file)))
    }

    /// Replay one PIT: added, then modified, then deleted.
    ///
    /// A PIT that adds a live path or modifies or deletes a path that is not
    /// live (or not at the recorded checksum) breaks the chain.
    pub fn apply(&mut self, pit: &PitManifest) -> Result<(), RepositoryError> {
        for entry in &pit.added {
            if self.contains(&entry.path) {
                return Err(RepositoryError::chain(
                    &pit.pit_id,
                    format!("added path {} is already live", entry.path),
                ));
            }
            _ = self.insert_entry(entry);
        }

        for entry in &pit.modified {
            let Some(live) = self.files.get_mut(&entry.path) else {
                return Err(RepositoryError::chain(
                    &pit.pit_id,
                    format!("modified path {} is not live", entry.path),
                ));
            };
            if live.checksum != entry.previous_checksum {
                return Err(RepositoryError::chain(
                    &pit.pit_id,
                    format!(
                        "modified path {} expected previous checksum {}, chain has {}",
                        entry.path, entry.previous_checksum, live.checksum
                    ),
                ));
            }
            *live = LiveFile {
                checksum: entry.checksum.clone(),
                size: entry.size,
                kind: entry.kind,
                referenced_by: entry.referenced_by.clone(),
            };
        }

        for entry in &pit.deleted {
            if self.files.remove(&entry.path).is_none() {
                return Err(RepositoryError::chain(
                    &pit.pit_id,
                    format!("deleted path {} is not live", entry.path),
                ));
            }
        }
        Ok(())
    }
}

impl FromIterator<FileEntry> for FileSet {
    fn from_iter<I: IntoIterator<Item = FileEntry>>(iter: I) -> Self {
        let mut set = Self::empty();
        for entry in iter {
            _ = set.insert_entry(&entry);
        }
        set
    }
}

impl<'a> IntoIterator for &'a FileSet {
    type Item = (&'a String, &'a LiveFile);
    type IntoIter = std::collections::btree_map::Iter<'a, String, LiveFile>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}
