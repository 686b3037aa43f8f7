// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! File-level delta between the previous PIT and a fresh capture

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::RepositoryError;
use crate::fileset::FileSet;
use crate::pit::{DeletedEntry, FileEntry, ModifiedEntry};

/// What to do with files capture could not read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaMode {
    /// Any unreadable file fails the backup
    #[default]
    Strict,
    /// Unreadable files, and files reached only through them, keep their
    /// previous state
    Lenient,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub added: Vec<FileEntry>,
    pub modified: Vec<ModifiedEntry>,
    pub deleted: Vec<DeletedEntry>,
    /// Previous files kept as-is because capture could not read them
    pub carried_forward: Vec<String>,
}

impl Delta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Entries whose bytes must be copied into the content area
    pub fn to_copy(&self) -> impl Iterator<Item = (&str, &str, u64)> {
        self.added
            .iter()
            .map(|e| (e.path.as_str(), e.checksum.as_str(), e.size))
            .chain(
                self.modified
                    .iter()
                    .map(|e| (e.path.as_str(), e.checksum.as_str(), e.size)),
            )
    }
}

/// Whether `path` or anything it was reached through is unreadable
fn descends_from_unreadable(previous: &FileSet, path: &str, unreadable: &BTreeSet<String>) -> bool {
    let mut current = Some(path);
    // Provenance chains are short; the bound only guards against cycles
    for _ in 0..=previous.len() {
        let Some(p) = current else {
            return false;
        };
        if unreadable.contains(p) {
            return true;
        }
        current = previous.get(p).and_then(|f| f.referenced_by.as_deref());
    }
    false
}

/// Diff `current` against `previous`.
///
/// The first backup diffs against [`FileSet::empty`]. Results are ordered by
/// path.
pub fn compute_delta(
    previous: &FileSet,
    current: &FileSet,
    unreadable: &BTreeSet<String>,
    mode: DeltaMode,
) -> Result<Delta, RepositoryError> {
    let mut effective = current.clone();
    let mut carried_forward = Vec::new();

    if !unreadable.is_empty() {
        if mode == DeltaMode::Strict {
            return Err(RepositoryError::UnreadableFiles(
                unreadable.iter().cloned().collect(),
            ));
        }
        for (path, file) in previous {
            if descends_from_unreadable(previous, path, unreadable) {
                _ = effective.insert(path.clone(), file.clone());
                carried_forward.push(path.clone());
            }
        }
    }

    let mut delta = Delta {
        carried_forward,
        ..Delta::default()
    };

    for (path, file) in &effective {
        match previous.get(path) {
            None => delta.added.push(file.clone().into_entry(path.clone())),
            Some(prev) if prev.checksum != file.checksum => delta.modified.push(ModifiedEntry {
                path: path.clone(),
                previous_checksum: prev.checksum.clone(),
                checksum: file.checksum.clone(),
                size: file.size,
                kind: file.kind,
                referenced_by: file.referenced_by.clone(),
            }),
            Some(_) => {}
        }
    }

    for (path, prev) in previous {
        if !effective.contains(path) {
            delta.deleted.push(DeletedEntry {
                path: path.clone(),
                checksum: prev.checksum.clone(),
            });
        }
    }

    Ok(delta)
}
