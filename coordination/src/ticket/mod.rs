//! Ticket data model and lifecycle phases

pub mod phase;
pub mod record;
pub mod types;

pub use phase::{Phase, TransitionError, TransitionRecord};
pub use record::{Ticket, SCHEMA_VERSION};
pub use types::{
    Abandonment, CodeLocation, ConsensusSummary, EscalationState, Exclusion, ExclusionGate,
    ExpectedFailure, Finding, Hypothesis, PatchSet, PocContract, Proposal, ReasonCode,
    ReproductionRecord, ReviewerId, Severity, TicketId, ValidationRecord, ValidationRun, Vote,
};
