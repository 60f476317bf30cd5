//! Ticket lifecycle driver
//!
//! The [`Orchestrator`] is the only component that changes a ticket's phase.
//! It walks a finding from `Discovered` through PoC confirmation, council
//! reproduction, fix proposal, fix validation and consensus selection to
//! `Resolved`, or to `Abandoned` with a reason code.
//!
//! Every step runs under a per-ticket lock and persists its results together
//! with the phase change in a single save. A crash mid-step leaves the
//! previous phase on disk, and [`Orchestrator::resume_all`] re-runs the step
//! with fresh workspaces.

mod engine;
mod locks;
mod step;
mod steps;

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::consensus::ConsensusEngine;
use crate::error::{EngineError, EngineResult};
use crate::events::{EventBus, SharedEventBus};
use crate::provider::SharedProvider;
use crate::runner::CommandRunner;
use crate::state::SharedTicketStore;
use crate::workspace::WorkspaceManager;

use locks::{CancelRegistry, TicketLocks};

pub struct Orchestrator {
    store: SharedTicketStore,
    workspaces: Arc<WorkspaceManager>,
    runner: Arc<CommandRunner>,
    /// Ordered; the first reviewer is the primary
    reviewers: Vec<SharedProvider>,
    config: EngineConfig,
    events: SharedEventBus,
    consensus: ConsensusEngine,
    locks: TicketLocks,
    cancels: CancelRegistry,
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    store: SharedTicketStore,
    workspaces: WorkspaceManager,
    runner: CommandRunner,
    reviewers: Vec<SharedProvider>,
    config: EngineConfig,
    events: Option<SharedEventBus>,
    consensus_salt: Option<Vec<u8>>,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn events(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Fix the anonymization salt so consensus rounds can be replayed.
    pub fn consensus_salt(mut self, salt: impl Into<Vec<u8>>) -> Self {
        self.consensus_salt = Some(salt.into());
        self
    }

    pub fn build(self) -> EngineResult<Orchestrator> {
        self.config.validate()?;
        if self.reviewers.is_empty() {
            return Err(EngineError::NoReviewers);
        }
        let mut consensus = ConsensusEngine::new(self.config.max_concurrency)
            .with_provider_timeout(self.config.provider_timeout());
        if let Some(salt) = self.consensus_salt {
            consensus = consensus.with_salt(salt);
        }
        Ok(Orchestrator {
            store: self.store,
            workspaces: Arc::new(self.workspaces),
            runner: Arc::new(self.runner),
            reviewers: self.reviewers,
            config: self.config,
            events: self.events.unwrap_or_else(|| EventBus::new().shared()),
            consensus,
            locks: TicketLocks::default(),
            cancels: CancelRegistry::default(),
        })
    }
}

impl Orchestrator {
    pub fn builder(
        store: SharedTicketStore,
        workspaces: WorkspaceManager,
        runner: CommandRunner,
        reviewers: Vec<SharedProvider>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            store,
            workspaces,
            runner,
            reviewers,
            config: EngineConfig::default(),
            events: None,
            consensus_salt: None,
        }
    }

    pub fn new(
        store: SharedTicketStore,
        workspaces: WorkspaceManager,
        runner: CommandRunner,
        reviewers: Vec<SharedProvider>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        Self::builder(store, workspaces, runner, reviewers)
            .config(config)
            .build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }
}
