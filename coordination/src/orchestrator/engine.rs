//! Public operations: intake, stepping, recovery, cancellation

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, error, info, warn, Instrument};

use super::step::StepOutcome;
use super::Orchestrator;
use crate::error::{EngineError, EngineResult};
use crate::events::{DecisionRecord, TicketEvent};
use crate::state::{StoreError, TicketFilter};
use crate::telemetry;
use crate::ticket::{Finding, Phase, ReasonCode, Ticket};

impl Orchestrator {
    /// Accept a finding: persist it in `Discovered` (revision 1), then move
    /// it to `PocPending` (revision 2).
    pub async fn submit_finding(&self, finding: Finding) -> EngineResult<Ticket> {
        if finding.severity < self.config.min_severity {
            return Err(EngineError::FindingFiltered {
                severity: finding.severity,
                minimum: self.config.min_severity,
            });
        }

        let mut ticket = Ticket::new(finding);
        ticket.revision = 1;
        self.store.save(&ticket)?;
        let span = telemetry::ticket_span(&ticket.id);
        span.in_scope(|| {
            info!(
                file = %ticket.finding.location.file,
                line = ticket.finding.location.start_line,
                severity = %ticket.finding.severity,
                category = %ticket.finding.category,
                "ticket created"
            )
        });

        let lock = self.locks.lock_for(&ticket.id);
        let _guard = lock.lock().await;
        self.commit(&ticket.id, Phase::Discovered, &StepOutcome::to(
            Phase::PocPending,
            "finding accepted",
        ))
        .instrument(span)
        .await
    }

    /// Run exactly one step from the persisted phase and persist its result.
    pub async fn advance(&self, ticket_id: &str) -> EngineResult<Ticket> {
        let lock = self.locks.lock_for(ticket_id);
        let _guard = lock.lock().await;

        let ticket = self.load(ticket_id)?;
        if ticket.is_terminal() {
            return Err(EngineError::TicketTerminal {
                ticket: ticket.id,
                phase: ticket.phase,
            });
        }

        let cancel = self.cancels.token_for(ticket_id);
        let span = telemetry::step_span(ticket_id, ticket.phase);
        let outcome = if cancel.is_cancelled() {
            StepOutcome::cancelled()
        } else {
            let outcome = self
                .run_step(&ticket, &cancel)
                .instrument(span.clone())
                .await;
            if cancel.is_cancelled() {
                StepOutcome::cancelled()
            } else {
                outcome
            }
        };
        telemetry::record_step_outcome(&span, outcome.next_phase());

        let committed = self
            .commit(ticket_id, ticket.phase, &outcome)
            .instrument(span)
            .await?;
        if committed.is_terminal() {
            self.retire(ticket_id);
        }
        Ok(committed)
    }

    /// Advance until the ticket is terminal.
    pub async fn drive(&self, ticket_id: &str) -> EngineResult<Ticket> {
        loop {
            let ticket = self.load(ticket_id)?;
            if ticket.is_terminal() {
                return Ok(ticket);
            }
            match self.advance(ticket_id).await {
                Ok(ticket) if ticket.is_terminal() => return Ok(ticket),
                Ok(_) => {}
                // Someone else finished it between our load and the lock.
                Err(EngineError::TicketTerminal { .. }) => return self.load(ticket_id),
                Err(e) => return Err(e),
            }
        }
    }

    /// Crash recovery: drive every non-terminal ticket in the store.
    ///
    /// A ticket whose drive fails is logged and reported in whatever state
    /// was last persisted.
    pub async fn resume_all(&self) -> EngineResult<Vec<Ticket>> {
        let live = self.store.list(&TicketFilter::live())?;
        info!(tickets = live.len(), "resuming non-terminal tickets");

        let drives = live.iter().map(|ticket| async move {
            match self.drive(&ticket.id).await {
                Ok(done) => done,
                Err(e) => {
                    error!(ticket_id = %ticket.id, error = %e, code = e.code(), "resume failed");
                    self.load(&ticket.id).unwrap_or_else(|_| ticket.clone())
                }
            }
        });
        Ok(join_all(drives).await)
    }

    /// Cancel a ticket: in-flight commands are killed, the running step
    /// resolves, and the ticket is committed as `Abandoned` (`Cancelled`).
    pub async fn cancel(&self, ticket_id: &str) -> EngineResult<Ticket> {
        let ticket = self.load(ticket_id)?;
        if ticket.is_terminal() {
            return Ok(ticket);
        }
        self.cancels.cancel(ticket_id);
        info!(ticket_id, phase = %ticket.phase, "cancellation requested");

        let lock = self.locks.lock_for(ticket_id);
        let _guard = lock.lock().await;
        let current = self.load(ticket_id)?;
        if current.is_terminal() {
            self.retire(ticket_id);
            return Ok(current);
        }
        let committed = self
            .commit(ticket_id, current.phase, &StepOutcome::cancelled())
            .await?;
        self.retire(ticket_id);
        Ok(committed)
    }

    /// Operator abandonment.
    pub async fn abandon(&self, ticket_id: &str, reason: &str) -> EngineResult<Ticket> {
        let lock = self.locks.lock_for(ticket_id);
        let _guard = lock.lock().await;
        let ticket = self.load(ticket_id)?;
        if ticket.is_terminal() {
            return Err(EngineError::TicketTerminal {
                ticket: ticket.id,
                phase: ticket.phase,
            });
        }
        let committed = self
            .commit(
                ticket_id,
                ticket.phase,
                &StepOutcome::abandon(ReasonCode::Operator, reason),
            )
            .await?;
        self.retire(ticket_id);
        Ok(committed)
    }

    /// Forget per-ticket handles once a ticket is terminal.
    fn retire(&self, ticket_id: &str) {
        self.cancels.remove(ticket_id);
        self.locks.remove(ticket_id);
    }

    pub fn load(&self, ticket_id: &str) -> EngineResult<Ticket> {
        match self.store.load(ticket_id) {
            Ok(ticket) => Ok(ticket),
            Err(StoreError::NotFound(_)) => Err(EngineError::TicketNotFound(ticket_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list(&self, filter: &TicketFilter) -> EngineResult<Vec<Ticket>> {
        Ok(self.store.list(filter)?)
    }

    /// Persist `outcome` on top of the stored ticket.
    ///
    /// Reloads, re-checks the phase and re-applies on every attempt, so a
    /// concurrent writer costs a retry rather than a lost update.
    async fn commit(
        &self,
        ticket_id: &str,
        expected: Phase,
        outcome: &StepOutcome,
    ) -> EngineResult<Ticket> {
        let mut stale = 0u32;
        loop {
            let mut ticket = self.load(ticket_id)?;
            if ticket.phase != expected {
                return Err(EngineError::PhaseConflict {
                    ticket: ticket.id,
                    expected,
                    found: ticket.phase,
                });
            }
            let failures_before = ticket.gate_failures.len();
            outcome.apply(&mut ticket)?;
            ticket.revision += 1;
            ticket.updated_at = Utc::now();

            match self.store.save(&ticket) {
                Ok(()) => {
                    debug!(
                        ticket_id,
                        from = %expected,
                        to = %ticket.phase,
                        revision = ticket.revision,
                        "step committed"
                    );
                    self.publish_commit(&ticket, failures_before);
                    return Ok(ticket);
                }
                Err(StoreError::StaleTicket {
                    expected: wanted,
                    found,
                    ..
                }) => {
                    stale += 1;
                    if stale > self.config.max_stale_retries {
                        return Err(EngineError::ConcurrencyExhausted {
                            ticket: ticket_id.to_string(),
                            attempts: stale,
                        });
                    }
                    warn!(ticket_id, expected = wanted, found, attempt = stale, "stale write; reloading");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn publish_commit(&self, ticket: &Ticket, failures_before: usize) {
        for record in ticket
            .history
            .iter()
            .filter(|r| r.revision == ticket.revision)
        {
            self.events.publish(TicketEvent::PhaseChanged {
                ticket_id: ticket.id.clone(),
                from: record.from,
                to: record.to,
                revision: record.revision,
                timestamp: record.timestamp,
            });
        }
        for failure in ticket.gate_failures.iter().skip(failures_before) {
            self.events.publish(TicketEvent::GateFailed {
                ticket_id: ticket.id.clone(),
                failure: failure.clone(),
            });
        }
        if let Some(record) = DecisionRecord::from_ticket(ticket) {
            info!(
                ticket_id = %ticket.id,
                phase = %ticket.phase,
                reason_code = ?record.reason_code,
                "ticket decided"
            );
            self.events.publish(TicketEvent::Decision(record));
        }
    }
}
