//! Per-round proposal anonymization
//!
//! Tokens are keyed BLAKE3 digests of the author id under a key derived
//! from the round salt. The map lives only as long as the round.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ticket::{PatchSet, Proposal, ReviewerId};

const TOKEN_CONTEXT: &str = "hardening-coordination 2024 consensus proposal token";
const TOKEN_PREFIX: &str = "P-";

/// What peers see of a proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymousProposal {
    pub token: String,
    pub rationale: String,
    pub patch: PatchSet,
    pub complexity: u8,
}

/// Bidirectional token ↔ author mapping for one round
#[derive(Debug, Clone, Default)]
pub struct AnonymizationMap {
    by_token: BTreeMap<String, ReviewerId>,
    by_author: BTreeMap<ReviewerId, String>,
}

impl AnonymizationMap {
    pub fn build<'a>(salt: &[u8], authors: impl IntoIterator<Item = &'a ReviewerId>) -> Self {
        let key = blake3::derive_key(TOKEN_CONTEXT, salt);
        let mut map = Self::default();
        for author in authors {
            if map.by_author.contains_key(author) {
                continue;
            }
            let digest = blake3::keyed_hash(&key, author.as_str().as_bytes()).to_hex();
            let mut len = 12;
            let token = loop {
                let candidate = format!("{TOKEN_PREFIX}{}", &digest[..len]);
                if !map.by_token.contains_key(&candidate) || len == digest.len() {
                    break candidate;
                }
                len = (len + 4).min(digest.len());
            };
            map.by_token.insert(token.clone(), author.clone());
            map.by_author.insert(author.clone(), token);
        }
        map
    }

    pub fn token_for(&self, author: &ReviewerId) -> Option<&str> {
        self.by_author.get(author).map(String::as_str)
    }

    pub fn author_of(&self, token: &str) -> Option<&ReviewerId> {
        self.by_token.get(token)
    }

    /// Tokens in sorted order
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.by_token.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    /// Strip authorship from `proposals`, sorted by token.
    pub fn anonymize<'a>(
        &self,
        proposals: impl IntoIterator<Item = &'a Proposal>,
    ) -> Vec<AnonymousProposal> {
        let mut out: Vec<AnonymousProposal> = proposals
            .into_iter()
            .filter_map(|p| {
                self.token_for(&p.author).map(|token| AnonymousProposal {
                    token: token.to_string(),
                    rationale: p.rationale.clone(),
                    patch: p.patch.clone(),
                    complexity: p.complexity,
                })
            })
            .collect();
        out.sort_by(|a, b| a.token.cmp(&b.token));
        out
    }
}
