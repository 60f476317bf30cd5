//! The persisted ticket record

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::phase::{Phase, TransitionError, TransitionRecord};
use super::types::{
    Abandonment, ConsensusSummary, EscalationState, Finding, Hypothesis, PocContract, Proposal,
    ReasonCode, ReproductionRecord, ReviewerId, TicketId, ValidationRecord, Vote,
};
use crate::error::GateFailure;

/// Current on-disk schema version of [`Ticket`]
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Unit of work tracking one finding through the hardening lifecycle
///
/// Mutated only by the orchestrator. Every persisted mutation bumps
/// `revision` by exactly one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub id: TicketId,
    pub phase: Phase,
    pub finding: Finding,
    #[serde(default)]
    pub poc: Option<PocContract>,
    /// PoC generation attempts consumed so far
    #[serde(default)]
    pub poc_attempts: u32,
    #[serde(default)]
    pub hypothesis: Option<Hypothesis>,
    /// Ordered roster of the current council
    #[serde(default)]
    pub council: Vec<ReviewerId>,
    #[serde(default)]
    pub reproductions: BTreeMap<ReviewerId, ReproductionRecord>,
    #[serde(default)]
    pub proposals: BTreeMap<ReviewerId, Proposal>,
    #[serde(default)]
    pub validations: BTreeMap<ReviewerId, ValidationRecord>,
    #[serde(default)]
    pub votes: BTreeMap<ReviewerId, Vote>,
    #[serde(default)]
    pub consensus: Option<ConsensusSummary>,
    #[serde(default)]
    pub selected: Option<Proposal>,
    #[serde(default)]
    pub escalation: EscalationState,
    /// Exploitability estimate recorded once the PoC is confirmed
    #[serde(default)]
    pub exploitability: Option<f64>,
    #[serde(default)]
    pub gate_failures: Vec<GateFailure>,
    #[serde(default)]
    pub abandonment: Option<Abandonment>,
    #[serde(default)]
    pub history: Vec<TransitionRecord>,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// Fresh ticket in `Discovered`, not yet persisted (revision 0).
    pub fn new(finding: Finding) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            phase: Phase::Discovered,
            finding,
            poc: None,
            poc_attempts: 0,
            hypothesis: None,
            council: Vec::new(),
            reproductions: BTreeMap::new(),
            proposals: BTreeMap::new(),
            validations: BTreeMap::new(),
            votes: BTreeMap::new(),
            consensus: None,
            selected: None,
            escalation: EscalationState::default(),
            exploitability: None,
            gate_failures: Vec::new(),
            abandonment: None,
            history: Vec::new(),
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Move to `to`. Leaves the ticket untouched when the edge is illegal.
    pub fn transition(&mut self, to: Phase, reason: impl Into<String>) -> Result<(), TransitionError> {
        let reason = reason.into();
        if !self.phase.can_transition_to(to) {
            return Err(TransitionError {
                from: self.phase,
                to,
                reason,
            });
        }
        self.history.push(TransitionRecord {
            from: self.phase,
            to,
            timestamp: Utc::now(),
            reason,
            revision: self.revision + 1,
        });
        self.phase = to;
        Ok(())
    }

    /// Transition to `Abandoned` and record why.
    pub fn abandon(&mut self, code: ReasonCode, summary: impl Into<String>) -> Result<(), TransitionError> {
        let summary = summary.into();
        self.transition(Phase::Abandoned, format!("{code}: {summary}"))?;
        self.abandonment = Some(Abandonment {
            code,
            summary,
            at: Utc::now(),
        });
        Ok(())
    }

    pub fn record_gate_failure(&mut self, failure: GateFailure) {
        self.gate_failures.push(failure);
    }

    /// Human-readable account of which reviewer failed which gate and why.
    pub fn reason_chain(&self) -> String {
        let mut lines = Vec::with_capacity(self.gate_failures.len() + 1);
        if let Some(abandonment) = &self.abandonment {
            lines.push(format!("{}: {}", abandonment.code, abandonment.summary));
        }
        for failure in &self.gate_failures {
            lines.push(format!("  - {failure}"));
        }
        lines.join("\n")
    }

    /// Every council member reproduced the PoC at the current level.
    pub fn unanimous_reproduction(&self) -> bool {
        !self.council.is_empty()
            && self.council.iter().all(|member| {
                self.reproductions
                    .get(member)
                    .is_some_and(|r| r.level == self.escalation.level && r.reproduced)
            })
    }

    /// Every proposal carries a validation record.
    pub fn validation_complete(&self) -> bool {
        self.proposals
            .keys()
            .all(|author| self.validations.contains_key(author))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, Gate};
    use crate::ticket::types::{CodeLocation, Severity};

    fn finding() -> Finding {
        Finding {
            location: CodeLocation::new("src/parse.c", 10),
            category: "buffer-overflow".into(),
            severity: Severity::High,
            description: "unchecked memcpy".into(),
            cwe: None,
            code_snippet: None,
            tool: Some("semgrep".into()),
        }
    }

    #[test]
    fn test_new_ticket_is_discovered() {
        let ticket = Ticket::new(finding());
        assert_eq!(ticket.phase, Phase::Discovered);
        assert_eq!(ticket.revision, 0);
        assert_eq!(ticket.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_illegal_transition_does_not_mutate() {
        let mut ticket = Ticket::new(finding());
        let err = ticket.transition(Phase::Resolved, "skip").unwrap_err();
        assert_eq!(err.from, Phase::Discovered);
        assert_eq!(ticket.phase, Phase::Discovered);
        assert!(ticket.history.is_empty());
    }

    #[test]
    fn test_transition_records_history() {
        let mut ticket = Ticket::new(finding());
        ticket.transition(Phase::PocPending, "submitted").unwrap();
        assert_eq!(ticket.phase, Phase::PocPending);
        assert_eq!(ticket.history.len(), 1);
        assert_eq!(ticket.history[0].revision, 1);
    }

    #[test]
    fn test_abandon_sets_reason() {
        let mut ticket = Ticket::new(finding());
        ticket.record_gate_failure(GateFailure::for_reviewer(
            &ReviewerId::new("r2"),
            Gate::Reproduction,
            FailureKind::ReproductionFailure,
            "exit 0",
        ));
        ticket
            .abandon(ReasonCode::EscalationExhausted, "council never agreed")
            .unwrap();
        assert!(ticket.is_terminal());
        let chain = ticket.reason_chain();
        assert!(chain.starts_with("ESCALATION_EXHAUSTED"));
        assert!(chain.contains("r2 failed reproduction"));
        assert!(ticket.abandon(ReasonCode::Operator, "again").is_err());
    }

    #[test]
    fn test_unanimity_requires_every_member_at_current_level() {
        let mut ticket = Ticket::new(finding());
        let a = ReviewerId::new("a");
        let b = ReviewerId::new("b");
        ticket.council = vec![a.clone(), b.clone()];
        let record = |reviewer: &ReviewerId, level, reproduced| ReproductionRecord {
            reviewer: reviewer.clone(),
            level,
            result: None,
            reproduced,
            note: None,
        };
        ticket.reproductions.insert(a.clone(), record(&a, 0, true));
        assert!(!ticket.unanimous_reproduction());
        ticket.reproductions.insert(b.clone(), record(&b, 0, true));
        assert!(ticket.unanimous_reproduction());

        ticket.escalation.level = 1;
        assert!(!ticket.unanimous_reproduction(), "stale level must not count");
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let ticket = Ticket::new(finding());
        let mut value = serde_json::to_value(&ticket).unwrap();
        value["added_in_a_later_version"] = serde_json::json!({"x": 1});
        value.as_object_mut().unwrap().remove("schema_version");
        let back: Ticket = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, ticket.id);
        assert_eq!(back.schema_version, SCHEMA_VERSION);
    }
}
