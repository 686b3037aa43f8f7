// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Append-only PIT chains for table backups
//!
//! A repository records one PIT (point-in-time) per successful backup. Each
//! PIT lists the files added, modified and deleted since its parent, so the
//! live file set at any PIT is the replay of the chain from its root. File
//! bytes live in a content-addressed area shared by all PITs.

mod checksum;
mod deadline;
mod delta;
mod error;
mod fileset;
mod index;
mod pit;
mod repository;
mod scope;
pub mod store;

pub use checksum::{ContentHasher, sha256_hex};
pub use deadline::Deadline;
pub use delta::{Delta, DeltaMode, compute_delta};
pub use error::RepositoryError;
pub use fileset::{FileSet, LiveFile};
pub use index::{PitSummary, RepositoryIndex};
pub use pit::{
    DeletedEntry, FileEntry, FileKind, ModifiedEntry, PitCounts, PitId, PitManifest, TableRecord,
};
pub use repository::{ContentWrite, Repository, RepositoryStore, VerifyReport};
pub use scope::{Granularity, Scope, TableIdent};
pub use store::RetryPolicy;
