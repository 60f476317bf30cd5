//! The result of running one step, applied to a freshly loaded ticket
//!
//! Steps never touch the persisted ticket directly. They describe what they
//! learned as a list of [`Change`]s plus the phase to move to, so that the
//! commit loop can re-apply the same outcome after reloading on a stale write.

use crate::error::GateFailure;
use crate::ticket::{
    ConsensusSummary, EscalationState, Hypothesis, Phase, PocContract, Proposal, ReasonCode,
    ReproductionRecord, ReviewerId, Ticket, TransitionError, ValidationRecord, Vote,
};

#[derive(Debug, Clone)]
pub(crate) enum Change {
    Poc(PocContract),
    PocAttempts(u32),
    Exploitability(f64),
    Hypothesis(Hypothesis),
    Council(Vec<ReviewerId>),
    Escalation(EscalationState),
    Reproduction(ReproductionRecord),
    Proposal(Proposal),
    Validation(ValidationRecord),
    Vote(Vote),
    Consensus(ConsensusSummary),
    Selected(Proposal),
    GateFailure(GateFailure),
}

impl Change {
    fn apply(&self, ticket: &mut Ticket) {
        match self {
            Self::Poc(poc) => ticket.poc = Some(poc.clone()),
            Self::PocAttempts(n) => ticket.poc_attempts = *n,
            Self::Exploitability(score) => ticket.exploitability = Some(*score),
            Self::Hypothesis(h) => ticket.hypothesis = Some(h.clone()),
            Self::Council(members) => ticket.council = members.clone(),
            Self::Escalation(state) => ticket.escalation = *state,
            Self::Reproduction(record) => {
                ticket
                    .reproductions
                    .insert(record.reviewer.clone(), record.clone());
            }
            Self::Proposal(p) => {
                ticket.proposals.insert(p.author.clone(), p.clone());
            }
            Self::Validation(v) => {
                ticket.validations.insert(v.reviewer.clone(), v.clone());
            }
            Self::Vote(v) => {
                ticket.votes.insert(v.voter.clone(), v.clone());
            }
            Self::Consensus(summary) => ticket.consensus = Some(summary.clone()),
            Self::Selected(p) => ticket.selected = Some(p.clone()),
            Self::GateFailure(f) => ticket.record_gate_failure(f.clone()),
        }
    }
}

#[derive(Debug, Clone)]
enum Target {
    Phase(Phase),
    Abandon(ReasonCode),
}

/// Where a step leaves the ticket, and what it recorded on the way
#[derive(Debug, Clone)]
pub(crate) struct StepOutcome {
    target: Target,
    reason: String,
    changes: Vec<Change>,
}

impl StepOutcome {
    pub(crate) fn to(phase: Phase, reason: impl Into<String>) -> Self {
        Self {
            target: Target::Phase(phase),
            reason: reason.into(),
            changes: Vec::new(),
        }
    }

    pub(crate) fn abandon(code: ReasonCode, summary: impl Into<String>) -> Self {
        Self {
            target: Target::Abandon(code),
            reason: summary.into(),
            changes: Vec::new(),
        }
    }

    pub(crate) fn cancelled() -> Self {
        Self::abandon(ReasonCode::Cancelled, "cancelled while in flight")
    }

    pub(crate) fn with(mut self, change: Change) -> Self {
        self.changes.push(change);
        self
    }

    pub(crate) fn with_all(mut self, changes: impl IntoIterator<Item = Change>) -> Self {
        self.changes.extend(changes);
        self
    }

    pub(crate) fn with_failures(self, failures: impl IntoIterator<Item = GateFailure>) -> Self {
        self.with_all(failures.into_iter().map(Change::GateFailure))
    }

    pub(crate) fn next_phase(&self) -> Phase {
        match self.target {
            Target::Phase(phase) => phase,
            Target::Abandon(_) => Phase::Abandoned,
        }
    }

    /// Apply to `ticket`: the transition first, so an illegal edge
    /// rejects before any recorded artifact lands.
    pub(crate) fn apply(&self, ticket: &mut Ticket) -> Result<(), TransitionError> {
        match self.target {
            Target::Phase(phase) => ticket.transition(phase, self.reason.clone())?,
            Target::Abandon(code) => ticket.abandon(code, self.reason.clone())?,
        }
        for change in &self.changes {
            change.apply(ticket);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, Gate};
    use crate::ticket::{CodeLocation, Finding, Severity};

    fn ticket() -> Ticket {
        Ticket::new(Finding {
            location: CodeLocation::new("src/a.c", 4),
            category: "overflow".into(),
            severity: Severity::High,
            description: "heap overflow".into(),
            cwe: None,
            code_snippet: None,
            tool: None,
        })
    }

    #[test]
    fn test_apply_transitions_and_records() {
        let mut t = ticket();
        let outcome = StepOutcome::to(Phase::PocPending, "accepted").with_failures([
            GateFailure::new(None, Gate::PocGeneration, FailureKind::ExecutionTimeout, "slow"),
        ]);
        outcome.apply(&mut t).unwrap();
        assert_eq!(t.phase, Phase::PocPending);
        assert_eq!(t.gate_failures.len(), 1);
        assert_eq!(outcome.next_phase(), Phase::PocPending);
    }

    #[test]
    fn test_illegal_edge_records_nothing() {
        let mut t = ticket();
        let outcome = StepOutcome::to(Phase::Resolved, "skip ahead").with(Change::PocAttempts(3));
        assert!(outcome.apply(&mut t).is_err());
        assert_eq!(t.phase, Phase::Discovered);
        assert_eq!(t.poc_attempts, 0);
    }

    #[test]
    fn test_abandon_sets_reason() {
        let mut t = ticket();
        StepOutcome::cancelled().apply(&mut t).unwrap();
        assert_eq!(t.phase, Phase::Abandoned);
        assert_eq!(
            t.abandonment.as_ref().map(|a| a.code),
            Some(ReasonCode::Cancelled)
        );
    }
}
