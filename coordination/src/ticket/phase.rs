//! Ticket phase machine: phases, legal edges and transition records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of a hardening ticket.
///
/// The happy path is strictly linear; `Abandoned` is reachable from every
/// non-terminal phase. `CouncilReproducing` may re-enter itself when the
/// unanimity gate fails and the council is escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Finding received, nothing done yet.
    Discovered,
    /// Waiting for a proof-of-concept that demonstrates the failure.
    PocPending,
    /// PoC demonstrated the claimed failure under controlled conditions.
    PocConfirmed,
    /// A single root-cause hypothesis with code locations is on record.
    HypothesisFormed,
    /// Every council member is independently re-running the PoC.
    CouncilReproducing,
    /// Council reproduced unanimously; collecting candidate fixes.
    FixProposed,
    /// Each proposal is being applied and re-validated in its own workspace.
    FixValidating,
    /// Anonymized peer review and aggregation.
    ConsensusSelecting,
    /// A winning fix was selected.
    Resolved,
    /// The ticket cannot progress.
    Abandoned,
}

impl Phase {
    /// Whether this is a terminal phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Abandoned)
    }

    /// Valid transitions from this phase.
    pub fn valid_transitions(self) -> &'static [Phase] {
        match self {
            Self::Discovered => &[Self::PocPending, Self::Abandoned],
            Self::PocPending => &[Self::PocConfirmed, Self::Abandoned],
            Self::PocConfirmed => &[Self::HypothesisFormed, Self::Abandoned],
            Self::HypothesisFormed => &[Self::CouncilReproducing, Self::Abandoned],
            Self::CouncilReproducing => &[
                Self::FixProposed,
                Self::CouncilReproducing,
                Self::Abandoned,
            ],
            Self::FixProposed => &[Self::FixValidating, Self::Abandoned],
            Self::FixValidating => &[Self::ConsensusSelecting, Self::Abandoned],
            Self::ConsensusSelecting => &[Self::Resolved, Self::Abandoned],
            Self::Resolved | Self::Abandoned => &[],
        }
    }

    /// Whether `to` is a legal edge from this phase.
    pub fn can_transition_to(self, to: Phase) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// All phases in lifecycle order.
    pub fn all() -> &'static [Phase] {
        &[
            Self::Discovered,
            Self::PocPending,
            Self::PocConfirmed,
            Self::HypothesisFormed,
            Self::CouncilReproducing,
            Self::FixProposed,
            Self::FixValidating,
            Self::ConsensusSelecting,
            Self::Resolved,
            Self::Abandoned,
        ]
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovered => write!(f, "discovered"),
            Self::PocPending => write!(f, "poc_pending"),
            Self::PocConfirmed => write!(f, "poc_confirmed"),
            Self::HypothesisFormed => write!(f, "hypothesis_formed"),
            Self::CouncilReproducing => write!(f, "council_reproducing"),
            Self::FixProposed => write!(f, "fix_proposed"),
            Self::FixValidating => write!(f, "fix_validating"),
            Self::ConsensusSelecting => write!(f, "consensus_selecting"),
            Self::Resolved => write!(f, "resolved"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// A phase transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Previous phase.
    pub from: Phase,
    /// New phase.
    pub to: Phase,
    /// When the transition occurred.
    pub timestamp: DateTime<Utc>,
    /// Reason for the transition.
    pub reason: String,
    /// Ticket revision that persisted this transition.
    pub revision: u64,
}

/// Error for invalid state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: Phase,
    pub to: Phase,
    pub reason: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} → {}: {}",
            self.from, self.to, self.reason
        )
    }
}

impl std::error::Error for TransitionError {}
