//! Hardening Coordination Library
//!
//! Drives a security finding to a validated, peer-selected fix:
//! - A primary reviewer writes a proof-of-concept that demonstrates the finding
//! - A council of reviewers must each reproduce it in an isolated workspace
//! - Every council member proposes a fix; each fix is applied to its own
//!   workspace and checked against the PoC and the existing test suite
//! - Surviving fixes are anonymized, peer-ranked and selected by Borda count
//!
//! # Components
//!
//! - [`orchestrator`]: the ticket state machine, the only writer of phases
//! - [`workspace`]: per-(ticket, reviewer, step) git worktrees or directory copies
//! - [`runner`]: sandboxed command execution with hard timeouts
//! - [`consensus`]: correctness gates, anonymization and vote aggregation
//! - [`scoring`]: objective per-fix scores used to break vote ties
//! - [`state`]: ticket persistence with optimistic concurrency
//! - [`events`]: broadcast of phase changes, gate failures and decisions
//!
//! # Usage
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use hardening_coordination::*;
//! # async fn demo(reviewers: Vec<provider::SharedProvider>, finding: ticket::Finding) -> anyhow::Result<()> {
//! telemetry::init_tracing().ok();
//! let config = EngineConfig::from_env()?;
//! let store: state::SharedTicketStore = Arc::new(state::FileTicketStore::open("./tickets")?);
//! let workspaces = workspace::WorkspaceManager::new(
//!     "./workspaces",
//!     workspace::WorkspaceSource::GitWorktree { repo_root: ".".into() },
//! )?;
//! let runner = runner::CommandRunner::new(config.runner_config());
//! let engine = Orchestrator::new(store, workspaces, runner, reviewers, config)?;
//!
//! let ticket = engine.submit_finding(finding).await?;
//! let done = engine.drive(&ticket.id).await?;
//! println!("{}: {}", done.id, done.phase);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consensus;
pub mod error;
pub mod events;
pub mod fanout;
pub mod orchestrator;
pub mod provider;
pub mod runner;
pub mod scoring;
pub mod state;
pub mod telemetry;
pub mod ticket;
pub mod workspace;

pub use config::{ConfigError, EngineConfig, EscalationPolicy};
pub use error::{EngineError, EngineResult, FailureKind, Gate, GateFailure};
pub use events::{DecisionRecord, EventBus, EventFilter, SharedEventBus, TicketEvent};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use provider::{PromptContext, ProviderError, ProviderGateway, SharedProvider, Task};
pub use runner::{CommandRunner, ExecutionResult, Outcome, RunnerConfig, Termination};
pub use scoring::{FixScore, ScoringPolicy};
pub use state::{
    FileTicketStore, MemoryTicketStore, SharedTicketStore, StoreError, TicketFilter, TicketStore,
};
pub use ticket::{Finding, Phase, ReasonCode, ReviewerId, Severity, Ticket};
pub use workspace::{WorkspaceError, WorkspaceKey, WorkspaceLease, WorkspaceManager, WorkspaceSource};
