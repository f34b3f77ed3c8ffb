//! Query-time roster: which enrolled identities a recognition call may match.

use rollcall_index::{IndexError, SimilarityIndex};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    members: HashSet<String>,
    unenrolled: Vec<String>,
    dimension: Option<usize>,
}

impl Roster {
    /// Join the caller's membership list with embedding existence.
    ///
    /// Candidates without an active reference are reported as unenrolled, in
    /// input order, and are never matched.
    pub fn resolve<S: AsRef<str>>(
        index: &dyn SimilarityIndex,
        candidate_ids: impl IntoIterator<Item = S>,
    ) -> Result<Self, IndexError> {
        let mut members = HashSet::new();
        let mut unenrolled = Vec::new();
        let mut seen = HashSet::new();

        for id in candidate_ids {
            let id = id.as_ref();
            if !seen.insert(id.to_string()) {
                continue;
            }
            match index.fetch(id)? {
                Some(_) => {
                    members.insert(id.to_string());
                }
                None => unenrolled.push(id.to_string()),
            }
        }

        if !unenrolled.is_empty() {
            tracing::debug!(unenrolled = unenrolled.len(), "roster members without reference embedding");
        }

        Ok(Self {
            members,
            unenrolled,
            dimension: index.stats()?.dimension,
        })
    }

    /// Every active identity in the index.
    pub fn all(index: &dyn SimilarityIndex) -> Result<Self, IndexError> {
        Ok(Self {
            members: index.identities()?.into_iter().collect(),
            unenrolled: Vec::new(),
            dimension: index.stats()?.dimension,
        })
    }

    pub fn members(&self) -> &HashSet<String> {
        &self.members
    }

    pub fn unenrolled(&self) -> &[String] {
        &self.unenrolled
    }

    /// Embedding dimension of the index the roster was resolved against.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, identity_id: &str) -> bool {
        self.members.contains(identity_id)
    }
}
