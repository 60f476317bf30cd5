//! Phase handlers
//!
//! Each handler reads the ticket snapshot, does its work in fresh
//! workspaces and returns a [`StepOutcome`]. Per-reviewer failures become
//! [`GateFailure`]s on the outcome; nothing here returns an error.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::step::{Change, StepOutcome};
use super::Orchestrator;
use crate::consensus::{ConsensusDecision, ConsensusRequest};
use crate::error::{FailureKind, Gate, GateFailure};
use crate::fanout::fan_out;
use crate::provider::{
    invoke_guarded, response, PromptContext, ProviderError, SharedProvider, Task,
};
use crate::runner::{CommandRunner, ExecutionResult, Outcome};
use crate::scoring::{self, ScoringPolicy};
use crate::telemetry;
use crate::ticket::{
    EscalationState, Phase, PocContract, Proposal, ReasonCode, ReproductionRecord, ReviewerId,
    Ticket, ValidationRecord, ValidationRun,
};
use crate::workspace::{WorkspaceError, WorkspaceKey, WorkspaceLease, WorkspaceManager};

/// Failure classification for a command that did not do what was asked.
fn run_failure(result: &ExecutionResult) -> FailureKind {
    match result.outcome {
        Outcome::TimedOut => FailureKind::ExecutionTimeout,
        Outcome::Crashed if result.was_cancelled() => FailureKind::Cancelled,
        Outcome::Crashed => FailureKind::ExecutionCrash,
        Outcome::Completed => FailureKind::ReproductionFailure,
    }
}

/// Workspace and runner handles for one ticket, cheap to clone into
/// fan-out tasks.
#[derive(Clone)]
struct Sandbox {
    workspaces: Arc<WorkspaceManager>,
    runner: Arc<CommandRunner>,
    source_ref: String,
    ticket_id: String,
    cancel: CancellationToken,
}

impl Sandbox {
    async fn acquire(
        &self,
        reviewer: &ReviewerId,
        step: &str,
    ) -> Result<WorkspaceLease, WorkspaceError> {
        let key = WorkspaceKey::new(self.ticket_id.clone(), reviewer, step);
        self.workspaces.acquire(key, &self.source_ref).await
    }

    async fn release(&self, lease: WorkspaceLease) {
        let key = lease.key().to_string();
        if let Err(e) = self.workspaces.release(lease).await {
            warn!(workspace = %key, error = %e, "workspace release failed");
        }
    }

    async fn run(
        &self,
        lease: &WorkspaceLease,
        reviewer: &ReviewerId,
        purpose: &str,
        argv: &[String],
        timeout: Duration,
    ) -> ExecutionResult {
        let span = telemetry::command_span(&self.ticket_id, reviewer.as_str(), purpose);
        let result = self
            .runner
            .run(lease.root(), argv, timeout, &self.cancel)
            .instrument(span.clone())
            .await;
        telemetry::record_command_result(&span, &result.outcome.to_string(), result.duration_ms);
        result
    }

    /// Run `argv` once in a workspace that lives only for this call.
    async fn run_fresh(
        &self,
        reviewer: &ReviewerId,
        step: &str,
        argv: &[String],
        timeout: Duration,
    ) -> Result<ExecutionResult, WorkspaceError> {
        let lease = self.acquire(reviewer, step).await?;
        let result = self.run(&lease, reviewer, step, argv, timeout).await;
        self.release(lease).await;
        Ok(result)
    }
}

impl Orchestrator {
    /// Perform the work of the ticket's current phase.
    pub(super) async fn run_step(
        &self,
        ticket: &Ticket,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        match ticket.phase {
            Phase::Discovered => StepOutcome::to(Phase::PocPending, "finding accepted"),
            Phase::PocPending => self.generate_poc(ticket, cancel).await,
            Phase::PocConfirmed => self.form_hypothesis(ticket, cancel).await,
            Phase::HypothesisFormed => self.convene_council(),
            Phase::CouncilReproducing => self.reproduce(ticket, cancel).await,
            Phase::FixProposed => self.collect_proposals(ticket, cancel).await,
            Phase::FixValidating => self.validate_proposals(ticket, cancel).await,
            Phase::ConsensusSelecting => self.select_fix(ticket, cancel).await,
            // Callers reject terminal tickets; the commit refuses this edge.
            Phase::Resolved | Phase::Abandoned => StepOutcome::to(ticket.phase, "terminal"),
        }
    }

    fn sandbox(&self, ticket: &Ticket, cancel: &CancellationToken) -> Sandbox {
        Sandbox {
            workspaces: self.workspaces.clone(),
            runner: self.runner.clone(),
            source_ref: self.config.source_ref.clone(),
            ticket_id: ticket.id.clone(),
            cancel: cancel.clone(),
        }
    }

    fn provider(&self, id: &ReviewerId) -> Option<&SharedProvider> {
        self.reviewers.iter().find(|p| &p.reviewer_id() == id)
    }

    /// The first `size` configured reviewers.
    fn roster(&self, size: usize) -> Vec<ReviewerId> {
        self.reviewers
            .iter()
            .take(size)
            .map(|p| p.reviewer_id())
            .collect()
    }

    /// Providers for the persisted council; members no longer configured
    /// are reported against `gate`.
    fn council_providers(
        &self,
        ticket: &Ticket,
        gate: Gate,
    ) -> (Vec<SharedProvider>, Vec<GateFailure>) {
        let mut providers = Vec::with_capacity(ticket.council.len());
        let mut failures = Vec::new();
        for member in &ticket.council {
            match self.provider(member) {
                Some(provider) => providers.push(provider.clone()),
                None => failures.push(GateFailure::for_reviewer(
                    member,
                    gate,
                    FailureKind::ProviderUnavailable,
                    "reviewer is not configured on this engine",
                )),
            }
        }
        (providers, failures)
    }

    fn poc_timeout(&self, poc: &PocContract) -> Duration {
        self.config.poc_timeout(poc.timeout_secs)
    }

    async fn ask(
        &self,
        provider: &dyn crate::provider::ProviderGateway,
        ctx: &PromptContext,
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError> {
        invoke_guarded(provider, ctx, self.config.provider_timeout(), cancel).await
    }

    /// The flagged code with context, taken from a short-lived workspace.
    async fn excerpt(&self, sandbox: &Sandbox, ticket: &Ticket, reviewer: &ReviewerId) -> Option<String> {
        let lease = match sandbox.acquire(reviewer, "context").await {
            Ok(lease) => lease,
            Err(e) => {
                debug!(error = %e, "no workspace for code excerpt");
                return None;
            }
        };
        let excerpt = self
            .workspaces
            .code_excerpt(&lease, &ticket.finding.location, self.config.excerpt_radius)
            .await;
        sandbox.release(lease).await;
        match excerpt {
            Ok(text) => Some(text),
            Err(e) => {
                debug!(error = %e, "code excerpt unavailable");
                None
            }
        }
    }

    // ── PocPending ───────────────────────────────────────────────────

    async fn generate_poc(&self, ticket: &Ticket, cancel: &CancellationToken) -> StepOutcome {
        let Some(primary) = self.reviewers.first().cloned() else {
            return StepOutcome::abandon(ReasonCode::PocNotReproduced, "no reviewers configured");
        };
        let author = primary.reviewer_id();
        let sandbox = self.sandbox(ticket, cancel);
        let excerpt = self.excerpt(&sandbox, ticket, &author).await;

        let mut failures = Vec::new();
        let mut feedback = Vec::new();
        let attempts = self.config.poc_attempts;

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                break;
            }
            let ctx = PromptContext::new(
                ticket.id.clone(),
                Task::ProofOfConcept,
                author.clone(),
                ticket.finding.clone(),
            )
            .with_excerpt(excerpt.clone())
            .with_attempt(attempt, feedback.clone());

            let poc = match self.ask(primary.as_ref(), &ctx, cancel).await.and_then(|raw| {
                response::parse_poc(&raw, &author).map_err(ProviderError::from)
            }) {
                Ok(poc) => poc,
                Err(e) => {
                    debug!(attempt, error = %e, "PoC response rejected");
                    feedback.push(format!("attempt {attempt}: {e}"));
                    failures.push(GateFailure::for_reviewer(
                        &author,
                        Gate::PocGeneration,
                        e.failure_kind(),
                        e.to_string(),
                    ));
                    continue;
                }
            };

            let result = match sandbox
                .run_fresh(&author, "poc", &poc.argv, self.poc_timeout(&poc))
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    feedback.push(format!("attempt {attempt}: workspace unavailable"));
                    failures.push(GateFailure::for_reviewer(
                        &author,
                        Gate::PocGeneration,
                        FailureKind::ProvisioningError,
                        e.to_string(),
                    ));
                    continue;
                }
            };

            if poc.demonstrates(&result) {
                let score = ticket.finding.exploitability_score(true);
                info!(attempt, exploitability = score, "PoC demonstrated the finding");
                return StepOutcome::to(
                    Phase::PocConfirmed,
                    format!("PoC demonstrated the failure on attempt {attempt}"),
                )
                .with(Change::Poc(poc))
                .with(Change::PocAttempts(attempt))
                .with(Change::Exploitability(score))
                .with_failures(failures);
            }

            feedback.push(format!(
                "attempt {attempt}: the PoC ran but did not show the declared failure ({})",
                result.summary()
            ));
            failures.push(GateFailure::for_reviewer(
                &author,
                Gate::PocGeneration,
                run_failure(&result),
                format!("PoC did not demonstrate the failure: {}", result.summary()),
            ));
        }

        StepOutcome::abandon(
            ReasonCode::PocNotReproduced,
            format!("no PoC demonstrated the finding in {attempts} attempt(s)"),
        )
        .with(Change::PocAttempts(attempts))
        .with_failures(failures)
    }

    // ── PocConfirmed ─────────────────────────────────────────────────

    async fn form_hypothesis(&self, ticket: &Ticket, cancel: &CancellationToken) -> StepOutcome {
        let Some(primary) = self.reviewers.first().cloned() else {
            return StepOutcome::abandon(
                ReasonCode::HypothesisUnavailable,
                "no reviewers configured",
            );
        };
        let author = primary.reviewer_id();
        let sandbox = self.sandbox(ticket, cancel);
        let excerpt = self.excerpt(&sandbox, ticket, &author).await;

        let mut failures = Vec::new();
        let mut feedback = Vec::new();
        let attempts = self.config.hypothesis_attempts;

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                break;
            }
            let ctx = PromptContext::new(
                ticket.id.clone(),
                Task::Hypothesis,
                author.clone(),
                ticket.finding.clone(),
            )
            .with_excerpt(excerpt.clone())
            .with_poc(ticket.poc.clone())
            .with_attempt(attempt, feedback.clone());

            match self.ask(primary.as_ref(), &ctx, cancel).await.and_then(|raw| {
                response::parse_hypothesis(&raw, &author).map_err(ProviderError::from)
            }) {
                Ok(hypothesis) => {
                    return StepOutcome::to(
                        Phase::HypothesisFormed,
                        format!("root cause identified on attempt {attempt}"),
                    )
                    .with(Change::Hypothesis(hypothesis))
                    .with_failures(failures);
                }
                Err(e) => {
                    feedback.push(format!("attempt {attempt}: {e}"));
                    failures.push(GateFailure::for_reviewer(
                        &author,
                        Gate::Hypothesis,
                        e.failure_kind(),
                        e.to_string(),
                    ));
                }
            }
        }

        StepOutcome::abandon(
            ReasonCode::HypothesisUnavailable,
            format!("no usable root-cause hypothesis in {attempts} attempt(s)"),
        )
        .with_failures(failures)
    }

    // ── HypothesisFormed ─────────────────────────────────────────────

    fn convene_council(&self) -> StepOutcome {
        let size = self
            .config
            .escalation
            .council_size
            .min(self.reviewers.len());
        let council = self.roster(size);
        StepOutcome::to(
            Phase::CouncilReproducing,
            format!("council of {} convened", council.len()),
        )
        .with(Change::Council(council))
        .with(Change::Escalation(EscalationState {
            level: 0,
            council_size: size,
        }))
    }

    // ── CouncilReproducing ───────────────────────────────────────────

    async fn reproduce(&self, ticket: &Ticket, cancel: &CancellationToken) -> StepOutcome {
        let Some(poc) = ticket.poc.clone() else {
            return StepOutcome::abandon(ReasonCode::PocNotReproduced, "no confirmed PoC on record");
        };
        let level = ticket.escalation.level;
        let timeout = self.poc_timeout(&poc);
        let sandbox = self.sandbox(ticket, cancel);
        let step = format!("reproduce-l{level}");
        let members = ticket.council.clone();

        let slots = fan_out(members.clone(), self.config.max_concurrency, |member| {
            let sandbox = sandbox.clone();
            let argv = poc.argv.clone();
            let step = step.clone();
            async move { sandbox.run_fresh(&member, &step, &argv, timeout).await }
        })
        .await;

        let mut changes = Vec::with_capacity(members.len());
        let mut failures = Vec::new();
        let mut reproduced = 0usize;
        for (member, slot) in members.iter().zip(slots) {
            let record = match slot {
                Some(Ok(result)) => {
                    let ok = poc.demonstrates(&result);
                    if !ok {
                        failures.push(GateFailure::for_reviewer(
                            member,
                            Gate::Reproduction,
                            run_failure(&result),
                            format!("PoC not reproduced: {}", result.summary()),
                        ));
                    }
                    ReproductionRecord {
                        reviewer: member.clone(),
                        level,
                        result: Some(result),
                        reproduced: ok,
                        note: None,
                    }
                }
                Some(Err(e)) => {
                    failures.push(GateFailure::for_reviewer(
                        member,
                        Gate::Reproduction,
                        FailureKind::ProvisioningError,
                        e.to_string(),
                    ));
                    ReproductionRecord {
                        reviewer: member.clone(),
                        level,
                        result: None,
                        reproduced: false,
                        note: Some(e.to_string()),
                    }
                }
                None => {
                    failures.push(GateFailure::for_reviewer(
                        member,
                        Gate::Reproduction,
                        FailureKind::ExecutionCrash,
                        "reproduction task panicked",
                    ));
                    ReproductionRecord {
                        reviewer: member.clone(),
                        level,
                        result: None,
                        reproduced: false,
                        note: Some("reproduction task panicked".to_string()),
                    }
                }
            };
            if record.reproduced {
                reproduced += 1;
            }
            changes.push(Change::Reproduction(record));
        }

        let total = members.len();
        if total > 0 && reproduced == total {
            return StepOutcome::to(
                Phase::FixProposed,
                format!("all {total} council members reproduced the PoC"),
            )
            .with_all(changes);
        }

        let policy = &self.config.escalation;
        if level >= policy.max_escalations {
            warn!(level, reproduced, total, "unanimity failed; escalation exhausted");
            return StepOutcome::abandon(
                ReasonCode::EscalationExhausted,
                format!(
                    "unanimity failed at level {level} ({reproduced}/{total} reproduced) and no escalations remain"
                ),
            )
            .with_all(changes)
            .with_failures(failures);
        }

        let size = (total + policy.council_growth).min(self.reviewers.len());
        let next = level + 1;
        info!(level = next, council = size, reproduced, total, "escalating council");
        StepOutcome::to(
            Phase::CouncilReproducing,
            format!(
                "unanimity failed ({reproduced}/{total} reproduced); escalating to level {next} with {size} reviewers"
            ),
        )
        .with_all(changes)
        .with_failures(failures)
        .with(Change::Council(self.roster(size)))
        .with(Change::Escalation(EscalationState {
            level: next,
            council_size: size,
        }))
    }

    // ── FixProposed ──────────────────────────────────────────────────

    async fn collect_proposals(&self, ticket: &Ticket, cancel: &CancellationToken) -> StepOutcome {
        let (council, mut failures) = self.council_providers(ticket, Gate::Proposal);
        let sandbox = self.sandbox(ticket, cancel);
        let excerpt = match council.first() {
            Some(lead) => self.excerpt(&sandbox, ticket, &lead.reviewer_id()).await,
            None => None,
        };

        let jobs: Vec<(SharedProvider, PromptContext)> = council
            .iter()
            .map(|provider| {
                let ctx = PromptContext::new(
                    ticket.id.clone(),
                    Task::Proposal,
                    provider.reviewer_id(),
                    ticket.finding.clone(),
                )
                .with_excerpt(excerpt.clone())
                .with_poc(ticket.poc.clone())
                .with_hypothesis(ticket.hypothesis.clone());
                (provider.clone(), ctx)
            })
            .collect();
        let authors: Vec<ReviewerId> = council.iter().map(|p| p.reviewer_id()).collect();
        let timeout = self.config.provider_timeout();

        let slots = fan_out(jobs, self.config.max_concurrency, |(provider, ctx)| {
            let cancel = cancel.clone();
            async move {
                let author = provider.reviewer_id();
                let raw = invoke_guarded(provider.as_ref(), &ctx, timeout, &cancel).await?;
                Ok::<Proposal, ProviderError>(response::parse_proposal(&raw, &author)?)
            }
        })
        .await;

        let mut proposals = Vec::new();
        for (author, slot) in authors.iter().zip(slots) {
            match slot {
                Some(Ok(proposal)) => proposals.push(proposal),
                Some(Err(e)) => failures.push(GateFailure::for_reviewer(
                    author,
                    Gate::Proposal,
                    e.failure_kind(),
                    e.to_string(),
                )),
                None => failures.push(GateFailure::for_reviewer(
                    author,
                    Gate::Proposal,
                    FailureKind::MalformedProviderResponse,
                    "proposal task panicked",
                )),
            }
        }

        if proposals.is_empty() {
            failures.push(GateFailure::new(
                None,
                Gate::Proposal,
                FailureKind::ConsensusDeadlock,
                "no council member produced a valid proposal",
            ));
            return StepOutcome::abandon(
                ReasonCode::NoProposals,
                format!("none of {} council members proposed a usable fix", authors.len()),
            )
            .with_failures(failures);
        }

        let received = proposals.len();
        StepOutcome::to(
            Phase::FixValidating,
            format!("{received} of {} council members proposed a fix", authors.len()),
        )
        .with_all(proposals.into_iter().map(Change::Proposal))
        .with_failures(failures)
    }

    // ── FixValidating ────────────────────────────────────────────────

    async fn validate_proposals(&self, ticket: &Ticket, cancel: &CancellationToken) -> StepOutcome {
        let Some(poc) = ticket.poc.clone() else {
            return StepOutcome::abandon(ReasonCode::PocNotReproduced, "no confirmed PoC on record");
        };
        let sandbox = self.sandbox(ticket, cancel);
        let poc_timeout = self.poc_timeout(&poc);
        let regression_timeout = self.config.command_timeout();
        let regression = self.config.regression_argv.clone();
        let policy = self.config.scoring;
        let proposals: Vec<Proposal> = ticket.proposals.values().cloned().collect();
        let authors: Vec<ReviewerId> = proposals.iter().map(|p| p.author.clone()).collect();

        let slots = fan_out(proposals, self.config.max_concurrency, |proposal| {
            let sandbox = sandbox.clone();
            let poc = poc.clone();
            let regression = regression.clone();
            async move {
                validate_one(
                    &sandbox,
                    &proposal,
                    &poc,
                    &regression,
                    poc_timeout,
                    regression_timeout,
                    &policy,
                )
                .await
            }
        })
        .await;

        let mut changes = Vec::with_capacity(authors.len());
        let mut failures = Vec::new();
        let mut passing = 0usize;
        for (author, slot) in authors.iter().zip(slots) {
            let record = slot.unwrap_or_else(|| {
                not_run(author, "validation task panicked".to_string())
            });
            if record.poc_passed && record.regression_passed {
                passing += 1;
            }
            failures.extend(validation_failures(&record));
            changes.push(Change::Validation(record));
        }

        StepOutcome::to(
            Phase::ConsensusSelecting,
            format!("{passing} of {} proposals passed both checks", authors.len()),
        )
        .with_all(changes)
        .with_failures(failures)
    }

    // ── ConsensusSelecting ───────────────────────────────────────────

    async fn select_fix(&self, ticket: &Ticket, cancel: &CancellationToken) -> StepOutcome {
        let (council, mut failures) = self.council_providers(ticket, Gate::PeerReview);
        let decision = self
            .consensus
            .select(ConsensusRequest {
                ticket_id: &ticket.id,
                finding: &ticket.finding,
                poc: ticket.poc.as_ref(),
                hypothesis: ticket.hypothesis.as_ref(),
                proposals: &ticket.proposals,
                validations: &ticket.validations,
                council: &council,
                cancel: cancel.clone(),
            })
            .await;

        match decision {
            ConsensusDecision::Selected {
                proposal,
                summary,
                votes,
                failures: review_failures,
            } => {
                failures.extend(review_failures);
                let score = ticket.validations.get(&proposal.author).and_then(|v| v.score);
                if let Some(score) = score.filter(|s| !s.passed) {
                    warn!(
                        author = %proposal.author,
                        score = score.total,
                        threshold = self.config.scoring.acceptance_threshold,
                        "selected fix scores below the acceptance threshold"
                    );
                }
                let reason = format!(
                    "fix by {} selected with {} vote(s)",
                    proposal.author, summary.votes_counted
                );
                StepOutcome::to(Phase::Resolved, reason)
                    .with(Change::Selected(proposal))
                    .with(Change::Consensus(summary))
                    .with_all(votes.into_iter().map(Change::Vote))
                    .with_failures(failures)
            }
            ConsensusDecision::NoAcceptableFix {
                summary,
                failures: review_failures,
            } => {
                failures.extend(review_failures);
                failures.push(GateFailure::new(
                    None,
                    Gate::Consensus,
                    FailureKind::ConsensusDeadlock,
                    "no proposal passed both the PoC and regression checks",
                ));
                let reason = format!(
                    "all {} proposal(s) were excluded before peer review",
                    summary.exclusions.len()
                );
                StepOutcome::abandon(ReasonCode::NoAcceptableFix, reason)
                    .with(Change::Consensus(summary))
                    .with_failures(failures)
            }
        }
    }
}

fn not_run(reviewer: &ReviewerId, reason: String) -> ValidationRecord {
    ValidationRecord {
        reviewer: reviewer.clone(),
        poc: ValidationRun::NotRun {
            reason: reason.clone(),
        },
        regression: ValidationRun::NotRun { reason },
        poc_passed: false,
        regression_passed: false,
        score: None,
    }
}

/// Apply one proposal in its own workspace, then run the PoC and the
/// regression suite against it.
async fn validate_one(
    sandbox: &Sandbox,
    proposal: &Proposal,
    poc: &PocContract,
    regression: &[String],
    poc_timeout: Duration,
    regression_timeout: Duration,
    policy: &ScoringPolicy,
) -> ValidationRecord {
    let author = &proposal.author;
    let lease = match sandbox.acquire(author, "validate").await {
        Ok(lease) => lease,
        Err(e) => return not_run(author, format!("workspace unavailable: {e}")),
    };
    let sides = match sandbox.workspaces.apply_patch(&lease, &proposal.patch).await {
        Ok(sides) => sides,
        Err(e) => {
            sandbox.release(lease).await;
            return not_run(author, format!("patch did not apply: {e}"));
        }
    };
    let score = scoring::score_fix(&sides, policy);
    debug!(reviewer = %author, score = score.total, passed = score.passed, "scored proposal");

    let poc_result = sandbox
        .run(&lease, author, "validate-poc", &poc.argv, poc_timeout)
        .await;
    let regression_result = sandbox
        .run(&lease, author, "regression", regression, regression_timeout)
        .await;
    sandbox.release(lease).await;

    ValidationRecord {
        reviewer: author.clone(),
        poc_passed: poc.passes(&poc_result),
        regression_passed: regression_result.succeeded(),
        poc: ValidationRun::Executed { result: poc_result },
        regression: ValidationRun::Executed {
            result: regression_result,
        },
        score: Some(score),
    }
}

fn validation_failures(record: &ValidationRecord) -> Vec<GateFailure> {
    [
        ("PoC", &record.poc, record.poc_passed),
        ("regression suite", &record.regression, record.regression_passed),
    ]
    .into_iter()
    .filter(|(_, _, passed)| !passed)
    .map(|(label, run, _)| {
        let kind = run
            .result()
            .map_or(FailureKind::ProvisioningError, run_failure);
        GateFailure::for_reviewer(
            &record.reviewer,
            Gate::FixValidation,
            kind,
            format!("{label} check failed: {}", run.describe()),
        )
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn result(outcome: Outcome, exit_code: Option<i32>) -> ExecutionResult {
        ExecutionResult {
            argv: vec!["true".into()],
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            duration_ms: 1,
            outcome,
            termination: None,
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_run_failure_kinds() {
        assert_eq!(
            run_failure(&result(Outcome::TimedOut, None)),
            FailureKind::ExecutionTimeout
        );
        assert_eq!(
            run_failure(&result(Outcome::Crashed, None)),
            FailureKind::ExecutionCrash
        );
        assert_eq!(
            run_failure(&result(Outcome::Completed, Some(0))),
            FailureKind::ReproductionFailure
        );
    }

    #[test]
    fn test_validation_failures_cover_each_failed_run() {
        let reviewer = ReviewerId::new("r1");
        let record = not_run(&reviewer, "patch did not apply".into());
        let failures = validation_failures(&record);
        assert_eq!(failures.len(), 2);
        assert!(failures
            .iter()
            .all(|f| f.kind == FailureKind::ProvisioningError && f.gate == Gate::FixValidation));

        let record = ValidationRecord {
            reviewer: reviewer.clone(),
            poc: ValidationRun::Executed {
                result: result(Outcome::Completed, Some(0)),
            },
            regression: ValidationRun::Executed {
                result: result(Outcome::TimedOut, None),
            },
            poc_passed: true,
            regression_passed: false,
            score: None,
        };
        let failures = validation_failures(&record);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::ExecutionTimeout);
        assert!(failures[0].detail.starts_with("regression suite"));
    }
}
