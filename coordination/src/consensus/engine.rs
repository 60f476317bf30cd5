//! Fix selection: gates, anonymized peer review, Borda aggregation

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::aggregate::{self, Candidate};
use super::anonymize::AnonymizationMap;
use crate::error::{FailureKind, Gate, GateFailure};
use crate::fanout::fan_out;
use crate::provider::{
    invoke_guarded, response, PromptContext, ProviderError, SharedProvider, Task,
};
use crate::telemetry;
use crate::ticket::{
    ConsensusSummary, Exclusion, ExclusionGate, Finding, Hypothesis, PocContract, Proposal,
    ReviewerId, ValidationRecord, Vote,
};

/// Inputs for one selection round
pub struct ConsensusRequest<'a> {
    pub ticket_id: &'a str,
    pub finding: &'a Finding,
    pub poc: Option<&'a PocContract>,
    pub hypothesis: Option<&'a Hypothesis>,
    pub proposals: &'a BTreeMap<ReviewerId, Proposal>,
    pub validations: &'a BTreeMap<ReviewerId, ValidationRecord>,
    /// Peer reviewers, in council order
    pub council: &'a [SharedProvider],
    pub cancel: CancellationToken,
}

/// Outcome of a selection round
#[derive(Debug, Clone)]
pub enum ConsensusDecision {
    Selected {
        proposal: Proposal,
        summary: ConsensusSummary,
        votes: Vec<Vote>,
        failures: Vec<GateFailure>,
    },
    /// No proposal survived the correctness and regression gates
    NoAcceptableFix {
        summary: ConsensusSummary,
        failures: Vec<GateFailure>,
    },
}

impl ConsensusDecision {
    pub fn summary(&self) -> &ConsensusSummary {
        match self {
            Self::Selected { summary, .. } | Self::NoAcceptableFix { summary, .. } => summary,
        }
    }
}

/// Proposals passing both gates, plus why the rest were excluded.
///
/// A proposal without a validation record counts as failing the PoC gate.
pub fn apply_gates<'a>(
    proposals: &'a BTreeMap<ReviewerId, Proposal>,
    validations: &BTreeMap<ReviewerId, ValidationRecord>,
) -> (Vec<&'a Proposal>, Vec<Exclusion>) {
    let mut survivors = Vec::new();
    let mut exclusions = Vec::new();
    for (author, proposal) in proposals {
        let Some(record) = validations.get(author) else {
            exclusions.push(Exclusion {
                reviewer: author.clone(),
                gate: ExclusionGate::PocStillFails,
                detail: "no validation record".to_string(),
            });
            continue;
        };
        if !record.poc_passed {
            exclusions.push(Exclusion {
                reviewer: author.clone(),
                gate: ExclusionGate::PocStillFails,
                detail: record.poc.describe(),
            });
        } else if !record.regression_passed {
            exclusions.push(Exclusion {
                reviewer: author.clone(),
                gate: ExclusionGate::RegressionFailed,
                detail: record.regression.describe(),
            });
        } else {
            survivors.push(proposal);
        }
    }
    (survivors, exclusions)
}

/// Selects a winning fix among validated proposals
#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    salt: Option<Vec<u8>>,
    max_concurrency: usize,
    provider_timeout: Duration,
}

impl ConsensusEngine {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            salt: None,
            max_concurrency,
            provider_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// Fix the anonymization salt so rounds can be replayed.
    pub fn with_salt(mut self, salt: impl Into<Vec<u8>>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub async fn select(&self, request: ConsensusRequest<'_>) -> ConsensusDecision {
        let span = telemetry::consensus_span(
            request.ticket_id,
            request.proposals.len(),
            request.council.len(),
        );
        self.select_inner(request).instrument(span).await
    }

    async fn select_inner(&self, request: ConsensusRequest<'_>) -> ConsensusDecision {
        let (survivors, exclusions) = apply_gates(request.proposals, request.validations);
        for exclusion in &exclusions {
            debug!(reviewer = %exclusion.reviewer, gate = %exclusion.gate, "proposal excluded");
        }

        if survivors.is_empty() {
            info!(excluded = exclusions.len(), "no acceptable fix");
            tracing::Span::current().record("hardening.outcome", "no_acceptable_fix");
            return ConsensusDecision::NoAcceptableFix {
                summary: ConsensusSummary {
                    winning_token: None,
                    winner: None,
                    tally: BTreeMap::new(),
                    exclusions,
                    votes_counted: 0,
                    decided_at: Utc::now(),
                },
                failures: Vec::new(),
            };
        }

        let salt = self
            .salt
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().as_bytes().to_vec());
        let map = AnonymizationMap::build(&salt, survivors.iter().map(|p| &p.author));
        let anonymized = map.anonymize(survivors.iter().copied());
        let tokens: BTreeSet<String> = map.tokens().map(String::from).collect();

        let (votes, failures) = if survivors.len() > 1 {
            self.peer_review(&request, anonymized, &tokens).await
        } else {
            (Vec::new(), Vec::new())
        };

        let tally = aggregate::borda(&tokens, votes.iter().map(|v| v.ranking.as_slice()));
        let candidates: Vec<Candidate> = survivors
            .iter()
            .filter_map(|p| {
                map.token_for(&p.author).map(|token| Candidate {
                    token: token.to_string(),
                    score: request
                        .validations
                        .get(&p.author)
                        .and_then(|v| v.score)
                        .map_or(0.0, |s| s.total),
                    complexity: p.complexity,
                    created_at: p.created_at,
                })
            })
            .collect();
        let ordered = aggregate::order(&candidates, &tally);

        let winner = ordered
            .first()
            .and_then(|token| map.author_of(token).map(|author| (token.clone(), author.clone())));
        let Some((winning_token, author)) = winner else {
            // Unreachable with at least one survivor; treated as a deadlock.
            warn!("winning token could not be mapped back to a proposal");
            return ConsensusDecision::NoAcceptableFix {
                summary: ConsensusSummary {
                    winning_token: None,
                    winner: None,
                    tally,
                    exclusions,
                    votes_counted: votes.len(),
                    decided_at: Utc::now(),
                },
                failures,
            };
        };
        let proposal = survivors
            .iter()
            .find(|p| p.author == author)
            .map(|p| (*p).clone());
        drop(map);

        info!(
            winning_token = %winning_token,
            votes = votes.len(),
            survivors = survivors.len(),
            "fix selected"
        );
        tracing::Span::current().record("hardening.outcome", "selected");

        let summary = ConsensusSummary {
            winning_token: Some(winning_token),
            winner: Some(author),
            tally,
            exclusions,
            votes_counted: votes.len(),
            decided_at: Utc::now(),
        };
        match proposal {
            Some(proposal) => ConsensusDecision::Selected {
                proposal,
                summary,
                votes,
                failures,
            },
            None => ConsensusDecision::NoAcceptableFix { summary, failures },
        }
    }

    /// Ask every council member for a ranking; malformed votes do not count.
    async fn peer_review(
        &self,
        request: &ConsensusRequest<'_>,
        anonymized: Vec<super::AnonymousProposal>,
        tokens: &BTreeSet<String>,
    ) -> (Vec<Vote>, Vec<GateFailure>) {
        let jobs: Vec<(SharedProvider, PromptContext)> = request
            .council
            .iter()
            .map(|provider| {
                let ctx = PromptContext::new(
                    request.ticket_id,
                    Task::Vote,
                    provider.reviewer_id(),
                    request.finding.clone(),
                )
                .with_poc(request.poc.cloned())
                .with_hypothesis(request.hypothesis.cloned())
                .with_proposals(anonymized.clone());
                (provider.clone(), ctx)
            })
            .collect();
        let voters: Vec<ReviewerId> = jobs.iter().map(|(p, _)| p.reviewer_id()).collect();
        let timeout = self.provider_timeout;

        let responses = fan_out(jobs, self.max_concurrency, |(provider, ctx)| {
            let cancel = request.cancel.clone();
            async move {
                let voter = provider.reviewer_id();
                let raw = invoke_guarded(provider.as_ref(), &ctx, timeout, &cancel).await?;
                Ok::<Vote, ProviderError>(response::parse_vote(&raw, &voter)?)
            }
        })
        .await;

        let mut votes = Vec::new();
        let mut failures = Vec::new();
        for (voter, outcome) in voters.iter().zip(responses) {
            match outcome {
                Some(Ok(vote)) => match aggregate::check_ranking(&vote.ranking, tokens) {
                    Ok(()) => votes.push(vote),
                    Err(reason) => failures.push(GateFailure::for_reviewer(
                        voter,
                        Gate::PeerReview,
                        FailureKind::MalformedProviderResponse,
                        reason,
                    )),
                },
                Some(Err(e)) => failures.push(GateFailure::for_reviewer(
                    voter,
                    Gate::PeerReview,
                    e.failure_kind(),
                    e.to_string(),
                )),
                None => failures.push(GateFailure::for_reviewer(
                    voter,
                    Gate::PeerReview,
                    FailureKind::ProviderUnavailable,
                    "reviewer task panicked",
                )),
            }
        }
        for failure in &failures {
            warn!(%failure, "vote not counted");
        }
        (votes, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderGateway;
    use crate::runner::{ExecutionResult, Outcome};
    use crate::scoring::FixScore;
    use crate::ticket::{CodeLocation, PatchSet, Severity, ValidationRun};
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Ranks proposals by a preference list over rationales.
    struct Ranker {
        id: &'static str,
        prefer: Vec<&'static str>,
    }

    #[async_trait]
    impl ProviderGateway for Ranker {
        fn reviewer_id(&self) -> ReviewerId {
            ReviewerId::new(self.id)
        }

        async fn invoke(&self, ctx: &PromptContext) -> Result<String, ProviderError> {
            let mut proposals = ctx.proposals.clone();
            proposals.sort_by_key(|p| {
                self.prefer
                    .iter()
                    .position(|r| *r == p.rationale)
                    .unwrap_or(usize::MAX)
            });
            let ranking: Vec<&str> = proposals.iter().map(|p| p.token.as_str()).collect();
            Ok(serde_json::json!({ "ranking": ranking }).to_string())
        }
    }

    struct Garbage;

    #[async_trait]
    impl ProviderGateway for Garbage {
        fn reviewer_id(&self) -> ReviewerId {
            ReviewerId::new("garbage")
        }

        async fn invoke(&self, _ctx: &PromptContext) -> Result<String, ProviderError> {
            Ok(r#"{"ranking": ["P-000000000000"]}"#.to_string())
        }
    }

    fn finding() -> Finding {
        Finding {
            location: CodeLocation::new("a.c", 1),
            category: "overflow".into(),
            severity: Severity::High,
            description: "d".into(),
            cwe: None,
            code_snippet: None,
            tool: None,
        }
    }

    fn run(exit: i32) -> ValidationRun {
        ValidationRun::Executed {
            result: ExecutionResult {
                argv: vec!["sh".into()],
                exit_code: Some(exit),
                stdout: String::new(),
                stderr: String::new(),
                stdout_truncated: false,
                stderr_truncated: false,
                duration_ms: 1,
                outcome: Outcome::Completed,
                termination: None,
                started_at: Utc::now(),
            },
        }
    }

    fn proposal(author: &str, rationale: &str, complexity: u8) -> Proposal {
        Proposal {
            author: ReviewerId::new(author),
            patch: PatchSet::UnifiedDiff {
                diff: format!("diff from {author}"),
            },
            rationale: rationale.into(),
            complexity,
            created_at: Utc::now(),
        }
    }

    fn validation(author: &str, poc_passed: bool, regression_passed: bool) -> ValidationRecord {
        ValidationRecord {
            reviewer: ReviewerId::new(author),
            poc: run(if poc_passed { 0 } else { 1 }),
            regression: run(if regression_passed { 0 } else { 1 }),
            poc_passed,
            regression_passed,
            score: None,
        }
    }

    fn inputs(
        entries: &[(&str, &str, u8, bool, bool)],
    ) -> (BTreeMap<ReviewerId, Proposal>, BTreeMap<ReviewerId, ValidationRecord>) {
        let mut proposals = BTreeMap::new();
        let mut validations = BTreeMap::new();
        for (author, rationale, complexity, poc, regression) in entries {
            proposals.insert(ReviewerId::new(*author), proposal(author, rationale, *complexity));
            validations.insert(ReviewerId::new(*author), validation(author, *poc, *regression));
        }
        (proposals, validations)
    }

    #[tokio::test]
    async fn test_failing_poc_excluded_even_if_top_voted() {
        let (proposals, validations) = inputs(&[
            ("a", "popular but wrong", 1, false, true),
            ("b", "correct", 3, true, true),
            ("c", "also correct", 4, true, true),
        ]);
        let council: Vec<SharedProvider> = ["r1", "r2", "r3"]
            .into_iter()
            .map(|id| {
                Arc::new(Ranker {
                    id,
                    prefer: vec!["popular but wrong", "also correct", "correct"],
                }) as SharedProvider
            })
            .collect();
        let f = finding();
        let decision = ConsensusEngine::new(4)
            .with_salt(b"audit".to_vec())
            .select(ConsensusRequest {
                ticket_id: "t",
                finding: &f,
                poc: None,
                hypothesis: None,
                proposals: &proposals,
                validations: &validations,
                council: &council,
                cancel: CancellationToken::new(),
            })
            .await;

        match decision {
            ConsensusDecision::Selected { proposal, summary, votes, .. } => {
                assert_eq!(proposal.author, ReviewerId::new("c"));
                assert_eq!(votes.len(), 3);
                assert_eq!(summary.exclusions.len(), 1);
                assert_eq!(summary.exclusions[0].reviewer, ReviewerId::new("a"));
                assert_eq!(summary.tally.len(), 2);
            }
            other => panic!("expected selection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_regression_gate_beats_votes() {
        // Scenario A/B: B is preferred by every voter but breaks the suite.
        let (proposals, validations) = inputs(&[
            ("author-a", "A", 5, true, true),
            ("author-b", "B", 1, true, false),
        ]);
        let council: Vec<SharedProvider> = vec![Arc::new(Ranker {
            id: "voter",
            prefer: vec!["B", "A"],
        })];
        let f = finding();
        let decision = ConsensusEngine::new(2)
            .select(ConsensusRequest {
                ticket_id: "t",
                finding: &f,
                poc: None,
                hypothesis: None,
                proposals: &proposals,
                validations: &validations,
                council: &council,
                cancel: CancellationToken::new(),
            })
            .await;
        match decision {
            ConsensusDecision::Selected { proposal, summary, .. } => {
                assert_eq!(proposal.rationale, "A");
                assert_eq!(summary.exclusions[0].gate, ExclusionGate::RegressionFailed);
            }
            other => panic!("expected A, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_survivors_is_no_acceptable_fix() {
        let (proposals, validations) = inputs(&[
            ("a", "x", 1, false, true),
            ("b", "y", 1, true, false),
        ]);
        let f = finding();
        let decision = ConsensusEngine::new(2)
            .select(ConsensusRequest {
                ticket_id: "t",
                finding: &f,
                poc: None,
                hypothesis: None,
                proposals: &proposals,
                validations: &validations,
                council: &[],
                cancel: CancellationToken::new(),
            })
            .await;
        match decision {
            ConsensusDecision::NoAcceptableFix { summary, .. } => {
                assert_eq!(summary.exclusions.len(), 2);
                assert!(summary.winning_token.is_none());
            }
            other => panic!("expected no fix, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_votes_are_non_participation() {
        let (proposals, validations) = inputs(&[
            ("a", "simple", 2, true, true),
            ("b", "complex", 7, true, true),
        ]);
        let council: Vec<SharedProvider> = vec![Arc::new(Garbage)];
        let f = finding();
        let decision = ConsensusEngine::new(2)
            .select(ConsensusRequest {
                ticket_id: "t",
                finding: &f,
                poc: None,
                hypothesis: None,
                proposals: &proposals,
                validations: &validations,
                council: &council,
                cancel: CancellationToken::new(),
            })
            .await;
        match decision {
            ConsensusDecision::Selected { proposal, votes, failures, summary } => {
                assert!(votes.is_empty());
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].gate, Gate::PeerReview);
                assert_eq!(summary.votes_counted, 0);
                // All-zero tally falls through to the complexity tie-break.
                assert_eq!(proposal.author, ReviewerId::new("a"));
            }
            other => panic!("expected selection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fix_score_decides_an_even_vote() {
        let (proposals, mut validations) = inputs(&[
            ("a", "simple", 2, true, true),
            ("b", "complex", 7, true, true),
        ]);
        for (author, total) in [("a", 55.0), ("b", 91.5)] {
            if let Some(record) = validations.get_mut(&ReviewerId::new(author)) {
                record.score = Some(FixScore {
                    total,
                    complexity: total,
                    dependencies: total,
                    loc_delta: total,
                    test_coverage: total,
                    beauty: total,
                    passed: total >= 70.0,
                });
            }
        }
        let council: Vec<SharedProvider> = vec![Arc::new(Garbage)];
        let f = finding();
        let decision = ConsensusEngine::new(2)
            .select(ConsensusRequest {
                ticket_id: "t",
                finding: &f,
                poc: None,
                hypothesis: None,
                proposals: &proposals,
                validations: &validations,
                council: &council,
                cancel: CancellationToken::new(),
            })
            .await;
        match decision {
            ConsensusDecision::Selected { proposal, summary, .. } => {
                assert_eq!(summary.votes_counted, 0);
                assert_eq!(proposal.author, ReviewerId::new("b"));
            }
            other => panic!("expected selection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deterministic_with_fixed_salt() {
        let (proposals, validations) = inputs(&[
            ("a", "one", 3, true, true),
            ("b", "two", 3, true, true),
            ("c", "three", 3, true, true),
        ]);
        let council: Vec<SharedProvider> = vec![
            Arc::new(Ranker { id: "r1", prefer: vec!["two", "one", "three"] }),
            Arc::new(Ranker { id: "r2", prefer: vec!["one", "two", "three"] }),
        ];
        let f = finding();
        let engine = ConsensusEngine::new(2).with_salt(b"replay".to_vec());
        let mut outcomes = Vec::new();
        for _ in 0..2 {
            let decision = engine
                .select(ConsensusRequest {
                    ticket_id: "t",
                    finding: &f,
                    poc: None,
                    hypothesis: None,
                    proposals: &proposals,
                    validations: &validations,
                    council: &council,
                    cancel: CancellationToken::new(),
                })
                .await;
            let summary = decision.summary().clone();
            outcomes.push((summary.winning_token, summary.winner, summary.tally));
        }
        assert_eq!(outcomes[0], outcomes[1]);
    }
}
