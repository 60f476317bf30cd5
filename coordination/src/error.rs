//! Engine error types
//!
//! Two layers: per-reviewer [`GateFailure`]s, which are recorded on the
//! ticket and folded into a step's gate, and [`EngineError`], which is
//! reserved for engine-level faults that escape an operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::state::StoreError;
use crate::ticket::{Phase, ReviewerId, Severity, TicketId, TransitionError};

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

// ============================================================================
// Failure taxonomy
// ============================================================================

/// Classification of everything that can go wrong inside a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A PoC run did not demonstrate the declared failure
    ReproductionFailure,
    /// A workspace could not be created or populated
    ProvisioningError,
    /// A command hit its hard timeout
    ExecutionTimeout,
    /// A command could not start, died from a signal, or was cancelled
    ExecutionCrash,
    /// A reviewer response failed schema validation
    MalformedProviderResponse,
    /// A concurrent writer won the revision race
    StaleTicket,
    /// No proposal could be selected
    ConsensusDeadlock,
    /// Ticket-level cancellation
    Cancelled,
    /// The reviewer backend could not be reached
    ProviderUnavailable,
}

impl FailureKind {
    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::ReproductionFailure => "REPRODUCTION_FAILURE",
            Self::ProvisioningError => "PROVISIONING_ERROR",
            Self::ExecutionTimeout => "EXECUTION_TIMEOUT",
            Self::ExecutionCrash => "EXECUTION_CRASH",
            Self::MalformedProviderResponse => "MALFORMED_PROVIDER_RESPONSE",
            Self::StaleTicket => "STALE_TICKET",
            Self::ConsensusDeadlock => "CONSENSUS_DEADLOCK",
            Self::Cancelled => "CANCELLED",
            Self::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Gate a per-reviewer failure was folded into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    PocGeneration,
    Hypothesis,
    Reproduction,
    Proposal,
    FixValidation,
    PeerReview,
    Consensus,
}

impl std::fmt::Display for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PocGeneration => write!(f, "poc_generation"),
            Self::Hypothesis => write!(f, "hypothesis"),
            Self::Reproduction => write!(f, "reproduction"),
            Self::Proposal => write!(f, "proposal"),
            Self::FixValidation => write!(f, "fix_validation"),
            Self::PeerReview => write!(f, "peer_review"),
            Self::Consensus => write!(f, "consensus"),
        }
    }
}

/// One reviewer failing one gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateFailure {
    /// `None` for failures that are not attributable to a reviewer
    pub reviewer: Option<ReviewerId>,
    pub gate: Gate,
    pub kind: FailureKind,
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl GateFailure {
    pub fn new(
        reviewer: Option<ReviewerId>,
        gate: Gate,
        kind: FailureKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            reviewer,
            gate,
            kind,
            detail: detail.into(),
            at: Utc::now(),
        }
    }

    pub fn for_reviewer(
        reviewer: &ReviewerId,
        gate: Gate,
        kind: FailureKind,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(Some(reviewer.clone()), gate, kind, detail)
    }
}

impl std::fmt::Display for GateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reviewer {
            Some(reviewer) => write!(
                f,
                "{} failed {} [{}]: {}",
                reviewer, self.gate, self.kind, self.detail
            ),
            None => write!(f, "{} [{}]: {}", self.gate, self.kind, self.detail),
        }
    }
}

// ============================================================================
// Engine errors
// ============================================================================

/// Errors that escape an orchestrator operation
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("ticket not found: {0}")]
    TicketNotFound(TicketId),

    #[error(transparent)]
    IllegalTransition(#[from] TransitionError),

    /// The persisted phase moved while a step was running
    #[error("ticket {ticket} is in phase {found}, expected {expected}")]
    PhaseConflict {
        ticket: TicketId,
        expected: Phase,
        found: Phase,
    },

    #[error("ticket {ticket}: gave up after {attempts} stale writes")]
    ConcurrencyExhausted { ticket: TicketId, attempts: u32 },

    #[error("ticket {ticket} is terminal ({phase})")]
    TicketTerminal { ticket: TicketId, phase: Phase },

    #[error("finding severity {severity} is below the intake threshold {minimum}")]
    FindingFiltered { severity: Severity, minimum: Severity },

    #[error("no reviewers configured")]
    NoReviewers,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Store(StoreError::StaleTicket { .. }) => FailureKind::StaleTicket.code(),
            Self::Store(_) => "STORE_ERROR",
            Self::TicketNotFound(_) => "TICKET_NOT_FOUND",
            Self::IllegalTransition(_) => "ILLEGAL_TRANSITION",
            Self::PhaseConflict { .. } => "PHASE_CONFLICT",
            Self::ConcurrencyExhausted { .. } => "CONCURRENCY_EXHAUSTED",
            Self::TicketTerminal { .. } => "TICKET_TERMINAL",
            Self::FindingFiltered { .. } => "FINDING_FILTERED",
            Self::NoReviewers => "NO_REVIEWERS",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_failure_display_names_reviewer_and_gate() {
        let failure = GateFailure::for_reviewer(
            &ReviewerId::new("reviewer-b"),
            Gate::Reproduction,
            FailureKind::ExecutionTimeout,
            "poc timed out after 30000ms",
        );
        let text = failure.to_string();
        assert!(text.contains("reviewer-b"));
        assert!(text.contains("reproduction"));
        assert!(text.contains("EXECUTION_TIMEOUT"));
    }

    #[test]
    fn test_engine_error_codes() {
        let stale = EngineError::Store(StoreError::StaleTicket {
            id: "t".into(),
            expected: 3,
            found: 5,
        });
        assert_eq!(stale.code(), "STALE_TICKET");
        assert_eq!(EngineError::NoReviewers.code(), "NO_REVIEWERS");
    }
}
