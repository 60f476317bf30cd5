//! Ticket events and decision records

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GateFailure;
use crate::scoring::FixScore;
use crate::ticket::{Phase, PocContract, ReasonCode, ReviewerId, Ticket, TicketId};

/// The selected fix as handed to the publishing layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedFix {
    pub author: ReviewerId,
    /// Rendered patch (diff or file replacements)
    pub diff: String,
    pub rationale: String,
    pub complexity: u8,
    /// Objective score from fix validation
    pub score: Option<FixScore>,
}

/// Final outcome of a ticket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub ticket_id: TicketId,
    /// `Resolved` or `Abandoned`
    pub phase: Phase,
    pub selected: Option<SelectedFix>,
    pub poc: Option<PocContract>,
    /// Borda points by anonymized token
    pub tally: BTreeMap<String, u32>,
    pub winning_token: Option<String>,
    pub exploitability: Option<f64>,
    /// Set when abandoned
    pub reason_code: Option<ReasonCode>,
    /// Set when abandoned
    pub reason_chain: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl DecisionRecord {
    /// `None` unless the ticket is terminal.
    pub fn from_ticket(ticket: &Ticket) -> Option<Self> {
        if !ticket.is_terminal() {
            return None;
        }
        let (tally, winning_token) = ticket
            .consensus
            .as_ref()
            .map(|c| (c.tally.clone(), c.winning_token.clone()))
            .unwrap_or_default();
        let abandoned = ticket.phase == Phase::Abandoned;
        Some(Self {
            ticket_id: ticket.id.clone(),
            phase: ticket.phase,
            selected: ticket.selected.as_ref().map(|p| SelectedFix {
                author: p.author.clone(),
                diff: p.patch.render(),
                rationale: p.rationale.clone(),
                complexity: p.complexity,
                score: ticket.validations.get(&p.author).and_then(|v| v.score),
            }),
            poc: ticket.poc.clone(),
            tally,
            winning_token,
            exploitability: ticket.exploitability,
            reason_code: ticket.abandonment.as_ref().map(|a| a.code),
            reason_chain: abandoned.then(|| ticket.reason_chain()),
            decided_at: ticket.updated_at,
        })
    }
}

/// Everything published on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TicketEvent {
    /// A transition was committed
    PhaseChanged {
        ticket_id: TicketId,
        from: Phase,
        to: Phase,
        revision: u64,
        timestamp: DateTime<Utc>,
    },
    /// A reviewer failed a gate
    GateFailed {
        ticket_id: TicketId,
        failure: GateFailure,
    },
    /// The ticket reached a terminal phase
    Decision(DecisionRecord),
}

impl TicketEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PhaseChanged { .. } => "phase_changed",
            Self::GateFailed { .. } => "gate_failed",
            Self::Decision(_) => "decision",
        }
    }

    pub fn ticket_id(&self) -> &str {
        match self {
            Self::PhaseChanged { ticket_id, .. } | Self::GateFailed { ticket_id, .. } => ticket_id,
            Self::Decision(record) => &record.ticket_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::PhaseChanged { timestamp, .. } => *timestamp,
            Self::GateFailed { failure, .. } => failure.at,
            Self::Decision(record) => record.decided_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::{CodeLocation, Finding, Severity};

    fn ticket() -> Ticket {
        Ticket::new(Finding {
            location: CodeLocation::new("a.c", 1),
            category: "c".into(),
            severity: Severity::Medium,
            description: "d".into(),
            cwe: None,
            code_snippet: None,
            tool: None,
        })
    }

    #[test]
    fn test_no_decision_for_live_ticket() {
        assert!(DecisionRecord::from_ticket(&ticket()).is_none());
    }

    #[test]
    fn test_abandoned_decision_carries_reason() {
        let mut t = ticket();
        t.abandon(ReasonCode::Operator, "not worth fixing").unwrap();
        let record = DecisionRecord::from_ticket(&t).unwrap();
        assert_eq!(record.phase, Phase::Abandoned);
        assert_eq!(record.reason_code, Some(ReasonCode::Operator));
        assert!(record.reason_chain.unwrap().contains("not worth fixing"));
        assert!(record.selected.is_none());
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = TicketEvent::PhaseChanged {
            ticket_id: "t".into(),
            from: Phase::Discovered,
            to: Phase::PocPending,
            revision: 2,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "phase_changed");
        assert_eq!(event.ticket_id(), "t");
    }
}
