//! Tracing span helpers
//!
//! ```text
//! hardening.ticket            (one per advance of a ticket)
//!   └─ hardening.step         (the phase handler)
//!       ├─ hardening.command  (one CommandRunner invocation)
//!       └─ hardening.consensus (one selection round)
//! ```

use tracing::Span;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::ticket::Phase;

// ── Span Name Constants ──────────────────────────────────────────────

pub const SPAN_TICKET: &str = "hardening.ticket";
pub const SPAN_STEP: &str = "hardening.step";
pub const SPAN_COMMAND: &str = "hardening.command";
pub const SPAN_CONSENSUS: &str = "hardening.consensus";

// ── Field Name Constants ─────────────────────────────────────────────

pub const FIELD_TICKET_ID: &str = "ticket.id";
pub const FIELD_PHASE: &str = "ticket.phase";
pub const FIELD_REVIEWER: &str = "hardening.reviewer";
pub const FIELD_OUTCOME: &str = "hardening.outcome";
pub const FIELD_DURATION_MS: &str = "hardening.duration_ms";

/// Default filter directive when `RUST_LOG` does not mention the engine.
pub const DEFAULT_DIRECTIVE: &str = "hardening_coordination=info";

// ── Span Builders ────────────────────────────────────────────────────

/// Root span for one ticket operation.
pub fn ticket_span(ticket_id: &str) -> Span {
    tracing::info_span!(
        "hardening.ticket",
        "ticket.id" = %ticket_id,
        "ticket.phase" = tracing::field::Empty,
    )
}

/// Span for one phase handler.
///
/// `hardening.outcome` is filled in via [`record_step_outcome`].
pub fn step_span(ticket_id: &str, phase: Phase) -> Span {
    tracing::info_span!(
        "hardening.step",
        "ticket.id" = %ticket_id,
        "ticket.phase" = %phase,
        "hardening.outcome" = tracing::field::Empty,
    )
}

pub fn record_step_outcome(span: &Span, next: Phase) {
    span.record("hardening.outcome", tracing::field::display(next));
}

/// Span for one command invocation on behalf of a reviewer.
pub fn command_span(ticket_id: &str, reviewer: &str, purpose: &str) -> Span {
    tracing::debug_span!(
        "hardening.command",
        "ticket.id" = %ticket_id,
        "hardening.reviewer" = %reviewer,
        "hardening.purpose" = %purpose,
        "hardening.outcome" = tracing::field::Empty,
        "hardening.duration_ms" = tracing::field::Empty,
    )
}

pub fn record_command_result(span: &Span, outcome: &str, duration_ms: u64) {
    span.record("hardening.outcome", outcome);
    span.record("hardening.duration_ms", duration_ms);
}

/// Span for one consensus round.
pub fn consensus_span(ticket_id: &str, proposals: usize, reviewers: usize) -> Span {
    tracing::info_span!(
        "hardening.consensus",
        "ticket.id" = %ticket_id,
        "hardening.proposal_count" = proposals,
        "hardening.reviewer_count" = reviewers,
        "hardening.outcome" = tracing::field::Empty,
    )
}

// ── Subscriber ───────────────────────────────────────────────────────

/// Filter from `RUST_LOG`, always including [`DEFAULT_DIRECTIVE`].
pub fn env_filter() -> EnvFilter {
    let filter = EnvFilter::from_default_env();
    match DEFAULT_DIRECTIVE.parse::<Directive>() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

/// Install a stderr `fmt` subscriber for embedding binaries.
///
/// Fails if a global subscriber is already set.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init()
}
