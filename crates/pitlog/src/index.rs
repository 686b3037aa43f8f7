// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! The repository index: scope lock, PIT summaries and the last-PIT pointer
//!
//! Each change writes a new generation `index/<generation>.json` with
//! create-if-absent; the highest generation is current. Two writers that
//! start from the same generation race for the same object name and only
//! one create succeeds.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::RepositoryError;
use crate::pit::{PitCounts, PitId, PitManifest};
use crate::scope::Scope;

pub const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitSummary {
    pub pit_id: PitId,
    pub parent: Option<PitId>,
    pub created_at: i64,
    #[serde(flatten)]
    pub counts: PitCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryIndex {
    pub format_version: u32,
    pub repository_id: String,
    pub scope: Scope,
    pub generation: u64,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_pit: Option<PitId>,
    /// In append order, root first
    pub pits: Vec<PitSummary>,
}

impl RepositoryIndex {
    #[must_use]
    pub fn new(repository_id: &str, scope: Scope) -> Self {
        let now = chrono::Utc::now().timestamp_micros();
        Self {
            format_version: INDEX_FORMAT_VERSION,
            repository_id: repository_id.to_string(),
            scope,
            generation: 0,
            created_at: now,
            updated_at: now,
            last_pit: None,
            pits: Vec::new(),
        }
    }

    #[must_use]
    pub fn summary(&self, pit_id: &PitId) -> Option<&PitSummary> {
        self.pits.iter().find(|p| &p.pit_id == pit_id)
    }

    /// The generation that records `manifest` as the new last PIT
    #[must_use]
    pub fn next(&self, manifest: &PitManifest) -> Self {
        let mut next = self.clone();
        next.generation += 1;
        next.updated_at = chrono::Utc::now().timestamp_micros();
        next.last_pit = Some(manifest.pit_id.clone());
        next.pits.push(PitSummary {
            pit_id: manifest.pit_id.clone(),
            parent: manifest.parent.clone(),
            created_at: manifest.created_at,
            counts: manifest.counts(),
        });
        next
    }

    /// PIT ids from the chain root to `pit_id`
    pub fn chain(&self, pit_id: &PitId) -> Result<Vec<PitId>, RepositoryError> {
        let by_id: HashMap<&PitId, &PitSummary> =
            self.pits.iter().map(|p| (&p.pit_id, p)).collect();

        let mut chain = Vec::new();
        let mut cursor = Some(pit_id);
        while let Some(id) = cursor {
            let summary = by_id.get(id).ok_or_else(|| {
                if chain.is_empty() {
                    RepositoryError::PitNotFound(id.to_string())
                } else {
                    RepositoryError::chain(id, "parent missing from index")
                }
            })?;
            chain.push(summary.pit_id.clone());
            if chain.len() > self.pits.len() {
                return Err(RepositoryError::chain(pit_id, "parent links form a cycle"));
            }
            cursor = summary.parent.as_ref();
        }
        chain.reverse();
        Ok(chain)
    }
}

pub(crate) fn index_file_name(generation: u64) -> String {
    format!("{generation:020}.json")
}

pub(crate) fn parse_index_file_name(name: &str) -> Option<u64> {
    let digits = name.strip_suffix(".json")?;
    if digits.len() != 20 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::TableIdent;

    fn scope() -> Scope {
        Scope::table("c", &TableIdent::new("n", "t"))
    }

    #[test]
    fn test_chain_root_to_tip() -> Result<(), RepositoryError> {
        let index = RepositoryIndex::new("repo", scope());
        let first = PitManifest::new(None, scope());
        let index = index.next(&first);
        let second = PitManifest::new(Some(first.pit_id.clone()), scope());
        let index = index.next(&second);

        assert_eq!(index.generation, 2);
        assert_eq!(index.last_pit.as_ref(), Some(&second.pit_id));
        assert_eq!(
            index.chain(&second.pit_id)?,
            vec![first.pit_id.clone(), second.pit_id.clone()]
        );
        assert_eq!(index.chain(&first.pit_id)?, vec![first.pit_id]);
        Ok(())
    }

    #[test]
    fn test_unknown_pit() {
        let index = RepositoryIndex::new("repo", scope());
        assert!(matches!(
            index.chain(&PitId::generate()),
            Err(RepositoryError::PitNotFound(_))
        ));
    }

    #[test]
    fn test_index_file_names() {
        assert_eq!(index_file_name(7), "00000000000000000007.json");
        assert_eq!(parse_index_file_name("00000000000000000007.json"), Some(7));
        assert_eq!(parse_index_file_name("7.json"), None);
        assert_eq!(parse_index_file_name("00000000000000000007.json.tmp"), None);
    }
}
