//! The façade that runs one remediation request end to end.
//!
//! Order is fixed: incident claim, tier gate, access check, cooldown
//! reservation, abort check, execution. A gate failure goes straight to
//! `Denied`; only a real attempt can end in `Failed`. Whatever the path,
//! the request produces exactly one `ExecutionRecord` and exactly one
//! report.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::access::{self, AccessMap};
use crate::audit::ExecutionRecord;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, Playbook};
use crate::cooldown::{CooldownDenied, CooldownTracker, Reservation, WindowUpdate};
use crate::error::{RemedyError, Result};
use crate::escalation::{Diagnostics, EscalationManager, EscalationTicket};
use crate::executor::{self, Driver, ExecutionContext};
use crate::notify::{NotificationSink, Report, SuccessReport};
use crate::paths;
use crate::policy::{ActionPolicy, PolicyTable, RetryPolicy};
use crate::tier;
use crate::types::{Denial, FailureKind, Outcome, Tier};

use super::db::StateDb;
use super::state::{IncidentEntry, Remediation, RemediationState};

const RECOVERED: &str = "recovered from restart";

// ---------------------------------------------------------------------------
// Request / report
// ---------------------------------------------------------------------------

/// Shared flag an operator raises to supersede a request.
///
/// Honored up to the moment execution starts. After that only the
/// executor's timeouts bound the run.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct RemediationRequest {
    pub incident_id: String,
    pub service: String,
    pub host: String,
    pub playbook: String,
    /// `None` when the caller's tier is unknown; always denied.
    pub agent_tier: Option<Tier>,
    /// Opaque recent log tail, forwarded into any escalation.
    pub log_tail: String,
    /// Free-text diagnosis, forwarded into any escalation.
    pub diagnosis: Option<String>,
    pub abort: AbortSignal,
}

impl RemediationRequest {
    pub fn new(
        incident_id: impl Into<String>,
        service: impl Into<String>,
        host: impl Into<String>,
        playbook: impl Into<String>,
        agent_tier: Option<Tier>,
    ) -> Self {
        Self {
            incident_id: incident_id.into(),
            service: service.into(),
            host: host.into(),
            playbook: playbook.into(),
            agent_tier,
            log_tail: String::new(),
            diagnosis: None,
            abort: AbortSignal::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemediationReport {
    pub state: RemediationState,
    pub record: ExecutionRecord,
    /// Present for every `Denied` or `Failed` outcome.
    pub ticket: Option<EscalationTicket>,
}

impl RemediationReport {
    pub fn outcome(&self) -> Outcome {
        self.record.outcome
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

/// One request in flight, carried from the gates into the execution task.
struct Attempt {
    entry: IncidentEntry,
    machine: Remediation,
    tier: Option<Tier>,
    retry: RetryPolicy,
    started_at: DateTime<Utc>,
    log_tail: String,
    diagnosis: Option<String>,
}

/// How an attempt ended.
struct Ending {
    outcome: Outcome,
    detail: String,
    denial: Option<Denial>,
    failure: Option<FailureKind>,
    backend_output: String,
    verification_output: String,
    /// Cooldown window charged by the attempt, saved with its record.
    window: Option<WindowUpdate>,
}

impl Ending {
    fn denied(denial: Denial) -> Self {
        Self {
            outcome: Outcome::Denied,
            detail: denial.to_string(),
            denial: Some(denial),
            failure: None,
            backend_output: String::new(),
            verification_output: String::new(),
            window: None,
        }
    }
}

/// The parts of the orchestrator an execution task needs to own.
#[derive(Clone)]
struct Core {
    db: Arc<StateDb>,
    cooldown: Arc<CooldownTracker>,
    escalations: EscalationManager,
    sinks: Vec<Arc<dyn NotificationSink>>,
    clock: Arc<dyn Clock>,
}

impl Core {
    async fn deny(&self, attempt: Attempt, denial: Denial) -> Result<RemediationReport> {
        tracing::warn!(
            incident = %attempt.entry.incident_id,
            service = %attempt.entry.service,
            action = %attempt.entry.action,
            policy = denial.policy(),
            "remediation denied: {denial}"
        );
        self.finish(attempt, Ending::denied(denial)).await
    }

    async fn execute(
        self,
        attempt: Attempt,
        ctx: ExecutionContext,
        policy: ActionPolicy,
        driver: Driver,
        reservation: Reservation,
    ) -> Result<RemediationReport> {
        let execution = executor::execute(&ctx, &policy, &driver, self.clock.as_ref()).await;
        let window = self.cooldown.commit(reservation, execution.outcome);
        let ending = Ending {
            outcome: execution.outcome,
            detail: execution.detail(),
            denial: None,
            failure: execution.failure,
            backend_output: execution.backend_detail,
            verification_output: execution.verification_detail,
            window,
        };
        self.finish(attempt, ending).await
    }

    /// Record the terminal state, escalate if needed, and deliver the report.
    ///
    /// The record, any ticket, the ledger entry and the charged cooldown
    /// window are stored in one transaction. If that fails nothing is
    /// stored, the entry stays in flight, and startup recovery closes it.
    async fn finish(&self, mut attempt: Attempt, ending: Ending) -> Result<RemediationReport> {
        let state = match ending.outcome {
            Outcome::Success => RemediationState::Succeeded,
            Outcome::Failed => RemediationState::Failed,
            Outcome::Denied => RemediationState::Denied,
        };
        attempt.machine.advance(state)?;

        let record = ExecutionRecord {
            id: 0,
            incident_id: attempt.entry.incident_id.clone(),
            service: attempt.entry.service.clone(),
            host: attempt.entry.host.clone(),
            action: attempt.entry.action,
            playbook: attempt.entry.playbook.clone(),
            tier: attempt.tier,
            started_at: attempt.started_at,
            ended_at: self.clock.now(),
            outcome: ending.outcome,
            detail: ending.detail,
            denial: ending.denial,
            failure: ending.failure,
        };
        let draft = if record.outcome == Outcome::Success {
            None
        } else {
            let diagnostics = Diagnostics {
                backend_output: ending.backend_output,
                verification_output: ending.verification_output,
                log_tail: attempt.log_tail,
                diagnosis: attempt.diagnosis,
            };
            Some(self.escalations.draft(&record, diagnostics, attempt.retry)?)
        };

        attempt.entry.state = state;
        let (record, ticket) = self
            .db
            .close_incident(&mut attempt.entry, record, draft, ending.window.as_ref())
            .map_err(|e| {
                tracing::error!(
                    incident = %attempt.entry.incident_id,
                    service = %attempt.entry.service,
                    action = %attempt.entry.action,
                    error = %e,
                    "failed to record remediation outcome; left for startup recovery"
                );
                e
            })?;

        let report = match &ticket {
            None => {
                tracing::info!(
                    incident = %record.incident_id,
                    service = %record.service,
                    action = %record.action,
                    record = record.id,
                    "remediation succeeded"
                );
                Report::Success(SuccessReport::from_record(&record))
            }
            Some(ticket) => {
                tracing::warn!(
                    ticket = %ticket.id,
                    incident = %ticket.incident_id,
                    service = %ticket.service,
                    action = %ticket.action,
                    policy = ticket.policy(),
                    "escalated: {}",
                    ticket.reason
                );
                Report::Escalation(ticket.clone())
            }
        };

        self.notify(&report).await;
        Ok(RemediationReport {
            state,
            record,
            ticket,
        })
    }

    async fn notify(&self, report: &Report) {
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(report).await {
                tracing::warn!(incident = report.incident_id(), error = %e, "report delivery failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    playbooks: BTreeMap<String, Playbook>,
    policies: PolicyTable,
    core: Core,
}

impl Orchestrator {
    /// Build from a loaded config over `db`. Committed cooldown windows are
    /// restored from the store.
    pub fn new(config: &Config, db: Arc<StateDb>) -> Result<Self> {
        let policies = config.policy_table();
        let cooldown = Arc::new(CooldownTracker::open(policies.clone(), &db)?);
        let playbooks = config
            .playbooks
            .iter()
            .map(|p| (p.name.clone(), p.clone()))
            .collect();
        Ok(Self {
            playbooks,
            policies,
            core: Core {
                escalations: EscalationManager::new(Arc::clone(&db)),
                db,
                cooldown,
                sinks: Vec::new(),
                clock: Arc::new(SystemClock),
            },
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.core.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.core.sinks.push(sink);
        self
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.core.cooldown
    }

    pub fn escalations(&self) -> &EscalationManager {
        &self.core.escalations
    }

    pub fn db(&self) -> &StateDb {
        &self.core.db
    }

    pub fn playbook(&self, name: &str) -> Result<&Playbook> {
        self.playbooks
            .get(name)
            .ok_or_else(|| RemedyError::PlaybookNotFound(name.to_string()))
    }

    /// Run one request through the gates and, if admitted, the driver.
    ///
    /// Denials and failures are returned as data in the report. `Err` means
    /// the request could not be processed at all: bad input, a second
    /// request for a closed incident, or a store failure.
    ///
    /// Execution runs on its own task; dropping the returned future after
    /// execution started does not cancel it.
    pub async fn remediate(
        &self,
        req: &RemediationRequest,
        hosts: &AccessMap,
        driver: &Driver,
    ) -> Result<RemediationReport> {
        paths::validate_incident_id(&req.incident_id)?;
        paths::validate_name(&req.service)?;
        let playbook = self.playbook(&req.playbook)?;
        let policy = playbook.effective_policy(&self.policies);
        let action = playbook.action;
        let now = self.core.clock.now();

        let entry = IncidentEntry {
            incident_id: req.incident_id.clone(),
            service: req.service.clone(),
            action,
            host: req.host.clone(),
            playbook: playbook.name.clone(),
            state: RemediationState::Requested,
            record_id: None,
            claimed_at: now,
            updated_at: now,
        };
        self.core.db.claim_incident(&entry)?;

        let mut attempt = Attempt {
            entry,
            machine: Remediation::new(&req.incident_id, action),
            tier: req.agent_tier,
            retry: policy.retry,
            started_at: now,
            log_tail: req.log_tail.clone(),
            diagnosis: req.diagnosis.clone(),
        };

        // 1. Tier
        if let Err(denial) = tier::check(req.agent_tier, policy.min_tier) {
            return self.core.deny(attempt, denial).await;
        }
        attempt.machine.advance(RemediationState::Gated)?;

        // 2. Access
        let resolved = match hosts.resolve(&req.host) {
            Ok(resolved) => resolved,
            Err(RemedyError::NoAccessMapEntry(host)) => {
                let denial = Denial::Access {
                    reason: format!("no access map entry for host '{host}'"),
                };
                return self.core.deny(attempt, denial).await;
            }
            Err(e) => return Err(e),
        };
        if let Err(denial) = access::check(&resolved, &policy) {
            return self.core.deny(attempt, denial).await;
        }
        attempt.machine.advance(RemediationState::AccessChecked)?;

        // 3. Cooldown
        let reservation = match self
            .core
            .cooldown
            .try_reserve_with(&req.service, action, policy.cooldown, now)
        {
            Ok(reservation) => reservation,
            Err(CooldownDenied { retry_after }) => {
                return self.core.deny(attempt, Denial::Cooldown { retry_after }).await;
            }
        };
        attempt.machine.advance(RemediationState::Reserved)?;

        // 4. Last chance to abort
        if req.abort.is_aborted() {
            self.core.cooldown.rollback(reservation);
            return self.core.deny(attempt, Denial::Aborted).await;
        }
        attempt.machine.advance(RemediationState::Executing)?;
        attempt.entry.state = RemediationState::Executing;
        attempt.entry.updated_at = self.core.clock.now();
        self.core.db.update_incident(&attempt.entry)?;

        tracing::info!(
            incident = %req.incident_id,
            service = %req.service,
            host = %req.host,
            %action,
            playbook = %req.playbook,
            "executing remediation"
        );

        let ctx = ExecutionContext {
            incident_id: req.incident_id.clone(),
            service: req.service.clone(),
            action,
            access: resolved,
        };
        let task = tokio::spawn(self.core.clone().execute(
            attempt,
            ctx,
            policy,
            driver.clone(),
            reservation,
        ));
        task.await
            .map_err(|e| RemedyError::Interrupted(e.to_string()))?
    }

    /// Close incidents left non-terminal for longer than `max_age` by a
    /// crashed process. Each gets a synthetic record and a ticket so the
    /// incident is never silently reopened for retry.
    pub async fn startup_recovery(&self, max_age: Duration) -> Result<Vec<RemediationReport>> {
        let max_age =
            chrono::Duration::from_std(max_age).map_err(|e| RemedyError::StateDb(e.to_string()))?;
        let cutoff = self.core.clock.now() - max_age;

        let mut reports = Vec::new();
        for entry in self.core.db.stale_incidents(cutoff)? {
            let ending = if entry.state == RemediationState::Executing {
                Ending {
                    outcome: Outcome::Failed,
                    detail: RECOVERED.to_string(),
                    denial: None,
                    failure: Some(FailureKind::Interrupted),
                    backend_output: String::new(),
                    verification_output: String::new(),
                    window: None,
                }
            } else {
                Ending {
                    detail: RECOVERED.to_string(),
                    ..Ending::denied(Denial::Aborted)
                }
            };
            let attempt = Attempt {
                machine: Remediation::resume(&entry.incident_id, entry.action, entry.state),
                tier: None,
                retry: self.policies.get(entry.action).retry,
                started_at: entry.claimed_at,
                log_tail: String::new(),
                diagnosis: None,
                entry,
            };
            reports.push(self.core.finish(attempt, ending).await?);
        }
        if !reports.is_empty() {
            tracing::warn!(count = reports.len(), "recovered stale remediations");
        }
        Ok(reports)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
