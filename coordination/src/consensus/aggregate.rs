//! Borda-count aggregation

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

/// Ordering facts for a surviving proposal
#[derive(Debug, Clone)]
pub struct Candidate {
    pub token: String,
    /// Objective fix score, 0 when unscored
    pub score: f64,
    pub complexity: u8,
    pub created_at: DateTime<Utc>,
}

/// Reject rankings that are not a permutation of `tokens`.
pub fn check_ranking(ranking: &[String], tokens: &BTreeSet<String>) -> Result<(), String> {
    let mut seen = BTreeSet::new();
    for token in ranking {
        if !tokens.contains(token) {
            return Err(format!("unknown token {token}"));
        }
        if !seen.insert(token) {
            return Err(format!("duplicate token {token}"));
        }
    }
    if seen.len() != tokens.len() {
        let missing: Vec<&str> = tokens
            .iter()
            .filter(|t| !seen.contains(t))
            .map(String::as_str)
            .collect();
        return Err(format!("missing tokens {}", missing.join(", ")));
    }
    Ok(())
}

/// Borda points per token. First of k gets k-1, last gets 0.
pub fn borda<'a>(
    tokens: &BTreeSet<String>,
    rankings: impl IntoIterator<Item = &'a [String]>,
) -> BTreeMap<String, u32> {
    let mut tally: BTreeMap<String, u32> = tokens.iter().map(|t| (t.clone(), 0)).collect();
    let k = tokens.len() as u32;
    for ranking in rankings {
        for (position, token) in ranking.iter().enumerate() {
            if let Some(points) = tally.get_mut(token) {
                *points += k.saturating_sub(1 + position as u32);
            }
        }
    }
    tally
}

/// Candidates best first: points desc, then fix score desc, complexity,
/// age, token.
pub fn order(candidates: &[Candidate], tally: &BTreeMap<String, u32>) -> Vec<String> {
    let mut sorted: Vec<&Candidate> = candidates.iter().collect();
    sorted.sort_by(|a, b| {
        let pa = tally.get(&a.token).copied().unwrap_or(0);
        let pb = tally.get(&b.token).copied().unwrap_or(0);
        pb.cmp(&pa)
            .then_with(|| b.score.total_cmp(&a.score))
            .then_with(|| a.complexity.cmp(&b.complexity))
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.token.cmp(&b.token))
    });
    sorted.into_iter().map(|c| c.token.clone()).collect()
}
