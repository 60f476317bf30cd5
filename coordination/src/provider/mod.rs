//! Reviewer gateway
//!
//! Reviewers are opaque async backends behind [`ProviderGateway`]. The
//! engine never trusts what comes back: every response goes through
//! [`response`] before it touches a ticket.

pub mod response;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::consensus::AnonymousProposal;
use crate::error::FailureKind;
use crate::ticket::{Finding, Hypothesis, PocContract, TicketId};

pub use crate::ticket::ReviewerId;
pub use response::ResponseError;

/// Errors from reviewer backends
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("rate limited: retry after {0:?}")]
    RateLimited(Duration),

    #[error("malformed response: {0}")]
    Malformed(#[from] ResponseError),

    #[error("request cancelled")]
    Cancelled,
}

impl ProviderError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Malformed(_) => FailureKind::MalformedProviderResponse,
            Self::Cancelled => FailureKind::Cancelled,
            Self::Unavailable(_) | Self::RequestFailed(_) | Self::RateLimited(_) => {
                FailureKind::ProviderUnavailable
            }
        }
    }
}

/// What the reviewer is being asked to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    ProofOfConcept,
    Hypothesis,
    Proposal,
    Vote,
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProofOfConcept => write!(f, "proof_of_concept"),
            Self::Hypothesis => write!(f, "hypothesis"),
            Self::Proposal => write!(f, "proposal"),
            Self::Vote => write!(f, "vote"),
        }
    }
}

/// Everything a reviewer gets to see for one request
///
/// Proposals are only ever shown anonymized.
#[derive(Debug, Clone, Serialize)]
pub struct PromptContext {
    pub ticket_id: TicketId,
    pub task: Task,
    pub reviewer: ReviewerId,
    pub finding: Finding,
    /// Flagged section with surrounding lines
    pub code_excerpt: Option<String>,
    pub poc: Option<PocContract>,
    pub hypothesis: Option<Hypothesis>,
    /// Anonymized survivors, sorted by token
    pub proposals: Vec<AnonymousProposal>,
    /// 1-based attempt number for retried tasks
    pub attempt: u32,
    /// Why earlier attempts by this reviewer were rejected
    pub feedback: Vec<String>,
    /// JSON schema the response must satisfy
    pub response_schema: serde_json::Value,
}

impl PromptContext {
    pub fn new(ticket_id: impl Into<TicketId>, task: Task, reviewer: ReviewerId, finding: Finding) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            task,
            reviewer,
            finding,
            code_excerpt: None,
            poc: None,
            hypothesis: None,
            proposals: Vec::new(),
            attempt: 1,
            feedback: Vec::new(),
            response_schema: response::schema_for_task(task),
        }
    }

    pub fn with_excerpt(mut self, excerpt: Option<String>) -> Self {
        self.code_excerpt = excerpt;
        self
    }

    pub fn with_poc(mut self, poc: Option<PocContract>) -> Self {
        self.poc = poc;
        self
    }

    pub fn with_hypothesis(mut self, hypothesis: Option<Hypothesis>) -> Self {
        self.hypothesis = hypothesis;
        self
    }

    pub fn with_proposals(mut self, proposals: Vec<AnonymousProposal>) -> Self {
        self.proposals = proposals;
        self
    }

    pub fn with_attempt(mut self, attempt: u32, feedback: Vec<String>) -> Self {
        self.attempt = attempt;
        self.feedback = feedback;
        self
    }
}

/// A council member backend
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Stable identity of this reviewer
    fn reviewer_id(&self) -> ReviewerId;

    /// Send `ctx` and return the raw response text
    async fn invoke(&self, ctx: &PromptContext) -> Result<String, ProviderError>;
}

/// Shared handle to a reviewer
pub type SharedProvider = Arc<dyn ProviderGateway>;

/// Invoke `provider` with a deadline, giving up early on cancellation.
pub async fn invoke_guarded(
    provider: &dyn ProviderGateway,
    ctx: &PromptContext,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String, ProviderError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        outcome = tokio::time::timeout(timeout, provider.invoke(ctx)) => match outcome {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Unavailable(format!(
                "no response within {}s",
                timeout.as_secs()
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::{CodeLocation, Severity};

    #[test]
    fn test_context_carries_schema_for_task() {
        let finding = Finding {
            location: CodeLocation::new("a.c", 3),
            category: "uaf".into(),
            severity: Severity::High,
            description: "use after free".into(),
            cwe: Some("CWE-416".into()),
            code_snippet: None,
            tool: None,
        };
        let ctx = PromptContext::new("t-1", Task::Vote, ReviewerId::new("r"), finding);
        let schema = ctx.response_schema.to_string();
        assert!(schema.contains("ranking"));
        assert_eq!(ctx.attempt, 1);
    }

    struct Stalled;

    #[async_trait]
    impl ProviderGateway for Stalled {
        fn reviewer_id(&self) -> ReviewerId {
            ReviewerId::new("stalled")
        }

        async fn invoke(&self, _ctx: &PromptContext) -> Result<String, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    fn context() -> PromptContext {
        let finding = Finding {
            location: CodeLocation::new("a.c", 3),
            category: "uaf".into(),
            severity: Severity::High,
            description: "use after free".into(),
            cwe: None,
            code_snippet: None,
            tool: None,
        };
        PromptContext::new("t-1", Task::Proposal, ReviewerId::new("stalled"), finding)
    }

    #[tokio::test(start_paused = true)]
    async fn test_guarded_invoke_times_out() {
        let err = invoke_guarded(
            &Stalled,
            &context(),
            Duration::from_secs(300),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::ProviderUnavailable);
    }

    #[tokio::test]
    async fn test_guarded_invoke_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = invoke_guarded(&Stalled, &context(), Duration::from_secs(60), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
    }

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            ProviderError::Unavailable("down".into()).failure_kind(),
            FailureKind::ProviderUnavailable
        );
        assert_eq!(
            ProviderError::Malformed(ResponseError::NoJson).failure_kind(),
            FailureKind::MalformedProviderResponse
        );
    }
}
