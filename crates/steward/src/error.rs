// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use icecodec::CodecError;
use pitlog::RepositoryError;
use thiserror::Error;

/// Coarse classification of a failure, for callers that branch on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ScopeMismatch,
    ConcurrentModification,
    TableUnavailable,
    Catalog,
    Codec,
    ChecksumMismatch,
    PartialFailure,
    PitNotFound,
    PartialRestore,
    TargetNotEmpty,
    DeadlineExceeded,
    Configuration,
    Storage,
    Repository,
}

#[derive(Error, Debug)]
pub enum StewardError {
    #[error("Table {table} is unavailable: {reason}")]
    TableUnavailable { table: String, reason: String },

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Cannot rewrite {path}: {source}")]
    Codec {
        path: String,
        #[source]
        source: CodecError,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Copy aborted after {completed} of {total} files: {source}")]
    PartialFailure {
        completed: usize,
        total: usize,
        #[source]
        source: Box<StewardError>,
    },

    #[error("Restore of PIT {pit_id} incomplete, {written} of {total} files written: {source}")]
    PartialRestore {
        pit_id: String,
        written: usize,
        total: usize,
        #[source]
        source: Box<StewardError>,
    },

    #[error("Restore target {0} is not empty")]
    TargetNotEmpty(String),

    #[error("Invalid location '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("No object store configured for {0}")]
    UnknownStore(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StewardError {
    pub(crate) fn codec(path: impl Into<String>, source: CodecError) -> Self {
        Self::Codec {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn unavailable(table: impl ToString, reason: impl ToString) -> Self {
        Self::TableUnavailable {
            table: table.to_string(),
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TableUnavailable { .. } => ErrorKind::TableUnavailable,
            Self::Catalog(_) => ErrorKind::Catalog,
            Self::Codec { .. } => ErrorKind::Codec,
            Self::Repository(e) => match e {
                RepositoryError::ScopeMismatch { .. } => ErrorKind::ScopeMismatch,
                RepositoryError::ConcurrentModification { .. } => ErrorKind::ConcurrentModification,
                RepositoryError::PitNotFound(_) | RepositoryError::InvalidPitId(_) => ErrorKind::PitNotFound,
                RepositoryError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
                RepositoryError::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
                RepositoryError::ObjectStore(_) => ErrorKind::Storage,
                _ => ErrorKind::Repository,
            },
            Self::PartialFailure { .. } => ErrorKind::PartialFailure,
            Self::PartialRestore { .. } => ErrorKind::PartialRestore,
            Self::TargetNotEmpty(_) => ErrorKind::TargetNotEmpty,
            Self::InvalidUrl { .. } | Self::UnknownStore(_) | Self::Config(_) | Self::Yaml(_) => {
                ErrorKind::Configuration
            }
            Self::ObjectStore(_) | Self::Io(_) => ErrorKind::Storage,
            Self::Json(_) => ErrorKind::Repository,
        }
    }

    /// The failure underneath any partial-copy wrapper
    #[must_use]
    pub fn root(&self) -> &StewardError {
        match self {
            Self::PartialFailure { source, .. } | Self::PartialRestore { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, StewardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_sees_through_repository_errors() {
        let err = StewardError::from(RepositoryError::ConcurrentModification {
            expected: "a".to_string(),
            actual: "b".to_string(),
        });
        assert_eq!(err.kind(), ErrorKind::ConcurrentModification);

        let wrapped = StewardError::PartialFailure {
            completed: 1,
            total: 3,
            source: Box::new(StewardError::from(RepositoryError::ChecksumMismatch {
                path: "data/a.parquet".to_string(),
                expected: "x".to_string(),
                actual: "y".to_string(),
            })),
        };
        assert_eq!(wrapped.kind(), ErrorKind::PartialFailure);
        assert_eq!(wrapped.root().kind(), ErrorKind::ChecksumMismatch);
        assert!(std::error::Error::source(&wrapped).is_some());
    }
}
