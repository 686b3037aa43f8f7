// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! PIT manifests: one immutable backup increment

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RepositoryError;
use crate::scope::{Scope, TableIdent};

/// Time-ordered PIT identifier (UUIDv7 text)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PitId(String);

impl PitId {
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid7::uuid7().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PitId {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<uuid7::Uuid>()
            .map(|id| Self(id.to_string()))
            .map_err(|_| RepositoryError::InvalidPitId(s.to_string()))
    }
}

impl fmt::Display for PitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role a file plays in a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// Root descriptor, current or from the metadata log
    Descriptor,
    ManifestList,
    Manifest,
    Data,
    PositionDeletes,
    EqualityDeletes,
    /// Puffin table or partition statistics
    Statistics,
}

impl FileKind {
    /// Whether the stored bytes are an abstracted metadata payload
    #[must_use]
    pub fn is_metadata(self) -> bool {
        matches!(
            self,
            Self::Descriptor | Self::ManifestList | Self::Manifest | Self::PositionDeletes
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Repository key: scope prefix plus table-relative path
    pub path: String,
    /// SHA-256 hex of the stored bytes
    pub checksum: String,
    pub size: u64,
    pub kind: FileKind,
    /// Key of the metadata file that led capture to this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedEntry {
    pub path: String,
    pub previous_checksum: String,
    pub checksum: String,
    pub size: u64,
    pub kind: FileKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedEntry {
    pub path: String,
    pub checksum: String,
}

/// A table as it stood when the PIT was taken
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRecord {
    pub ident: TableIdent,
    /// Location the table was backed up from
    pub original_location: String,
    /// Scope prefix of this table's file keys
    pub key_prefix: String,
    /// Repository key of the current root descriptor
    pub descriptor_key: String,
    /// Root descriptor pointer as the catalog reported it
    pub metadata_location: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitCounts {
    pub tables: usize,
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitManifest {
    pub pit_id: PitId,
    pub parent: Option<PitId>,
    /// Microseconds since the Unix epoch
    pub created_at: i64,
    pub scope: Scope,
    pub tables: Vec<TableRecord>,
    pub added: Vec<FileEntry>,
    pub modified: Vec<ModifiedEntry>,
    pub deleted: Vec<DeletedEntry>,
}

impl PitManifest {
    /// Start a manifest for a new PIT on top of `parent`
    #[must_use]
    pub fn new(parent: Option<PitId>, scope: Scope) -> Self {
        Self {
            pit_id: PitId::generate(),
            parent,
            created_at: chrono::Utc::now().timestamp_micros(),
            scope,
            tables: Vec::new(),
            added: Vec::new(),
            modified: Vec::new(),
            deleted: Vec::new(),
        }
    }

    #[must_use]
    pub fn counts(&self) -> PitCounts {
        PitCounts {
            tables: self.tables.len(),
            added: self.added.len(),
            modified: self.modified.len(),
            deleted: self.deleted.len(),
        }
    }

    #[must_use]
    pub fn table(&self, ident: &TableIdent) -> Option<&TableRecord> {
        self.tables.iter().find(|t| &t.ident == ident)
    }
}
