// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Error types for the PIT chain repository

use thiserror::Error;

use crate::pit::PitId;
use crate::scope::Scope;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Invalid repository id '{0}': use letters, digits, '-' and '_'")]
    InvalidRepositoryId(String),

    #[error("Repository '{0}' not found")]
    RepositoryNotFound(String),

    #[error("Repository scope is frozen as {existing}, incoming backup has scope {incoming}")]
    ScopeMismatch { existing: Scope, incoming: Scope },

    #[error(
        "Concurrent modification: expected last PIT {expected}, repository has {actual}"
    )]
    ConcurrentModification { expected: String, actual: String },

    #[error("PIT {0} not found")]
    PitNotFound(String),

    #[error("Invalid PIT id '{0}'")]
    InvalidPitId(String),

    #[error("PIT {pit_id} names parent {declared:?} but was appended after {expected:?}")]
    ParentMismatch {
        pit_id: PitId,
        declared: Option<PitId>,
        expected: Option<PitId>,
    },

    #[error("Chain integrity violated at PIT {pit_id}: {reason}")]
    ChainIntegrity { pit_id: String, reason: String },

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid content checksum '{0}'")]
    InvalidChecksum(String),

    #[error("{} file(s) were unreadable and strict delta mode is set: {}", .0.len(), .0.join(", "))]
    UnreadableFiles(Vec<String>),

    #[error("Deadline exceeded during {0}")]
    DeadlineExceeded(String),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RepositoryError {
    pub(crate) fn chain(pit_id: impl ToString, reason: impl Into<String>) -> Self {
        Self::ChainIntegrity {
            pit_id: pit_id.to_string(),
            reason: reason.into(),
        }
    }
}
