//! Escalation tickets: handover of a denied or failed remediation to a human.
//!
//! IDs are sequential: E1, E2, E3, …
//! Tickets are terminal from the core's point of view: they are drafted
//! here, numbered and persisted together with the record they are about,
//! and delivered through a notification sink. Resolving them happens
//! outside this crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::audit::ExecutionRecord;
use crate::error::{RemedyError, Result};
use crate::orchestrator::db::StateDb;
use crate::policy::RetryPolicy;
use crate::types::{ActionKind, Denial, FailureKind, Outcome};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Everything a human needs to pick the incident up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backend_output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub verification_output: String,
    /// Opaque recent log tail supplied by the caller.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_tail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationTicket {
    pub id: String,
    pub incident_id: String,
    pub service: String,
    pub host: String,
    pub action: ActionKind,
    /// Execution records this ticket is about.
    pub record_ids: Vec<u64>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial: Option<Denial>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub reason: String,
    /// The action's policy asks the human for a root-cause diagnosis.
    pub diagnosis_requested: bool,
    pub diagnostics: Diagnostics,
    pub created_at: DateTime<Utc>,
}

impl EscalationTicket {
    /// Which policy family produced this ticket: tier, access, cooldown,
    /// aborted, or execution.
    pub fn policy(&self) -> &'static str {
        match &self.denial {
            Some(d) => d.policy(),
            None => "execution",
        }
    }
}

// ---------------------------------------------------------------------------
// EscalationManager
// ---------------------------------------------------------------------------

/// Sole creator of escalation tickets.
#[derive(Clone)]
pub struct EscalationManager {
    db: Arc<StateDb>,
}

impl EscalationManager {
    pub fn new(db: Arc<StateDb>) -> Self {
        Self { db }
    }

    /// Draft the ticket for a `Failed` or `Denied` record.
    ///
    /// The ticket has no id yet; [`StateDb::close_incident`] assigns it
    /// and links the record in the transaction that stores both.
    pub fn draft(
        &self,
        record: &ExecutionRecord,
        diagnostics: Diagnostics,
        retry: RetryPolicy,
    ) -> Result<EscalationTicket> {
        if record.outcome == Outcome::Success {
            return Err(RemedyError::InvalidTransition {
                from: Outcome::Success.to_string(),
                to: "escalated".to_string(),
            });
        }

        let reason = match (&record.denial, record.failure) {
            (Some(denial), _) => denial.to_string(),
            (None, Some(failure)) => format!("{} failed: {failure}", record.action),
            (None, None) => format!("{} failed", record.action),
        };

        Ok(EscalationTicket {
            id: String::new(),
            incident_id: record.incident_id.clone(),
            service: record.service.clone(),
            host: record.host.clone(),
            action: record.action,
            record_ids: Vec::new(),
            outcome: record.outcome,
            denial: record.denial.clone(),
            failure: record.failure,
            reason,
            diagnosis_requested: record.outcome == Outcome::Failed && retry.wants_diagnosis(),
            diagnostics,
            created_at: record.ended_at,
        })
    }

    pub fn list(&self, incident: Option<&str>) -> Result<Vec<EscalationTicket>> {
        let tickets = self.db.list_tickets()?;
        Ok(match incident {
            Some(id) => tickets.into_iter().filter(|t| t.incident_id == id).collect(),
            None => tickets,
        })
    }

    pub fn get(&self, id: &str) -> Result<EscalationTicket> {
        self.db
            .list_tickets()?
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| RemedyError::TicketNotFound(id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::state::{IncidentEntry, RemediationState};
    use crate::types::Tier;

    fn record(outcome: Outcome) -> ExecutionRecord {
        let now = Utc::now();
        ExecutionRecord {
            id: 3,
            incident_id: "inc-9".to_string(),
            service: "api".to_string(),
            host: "web-01".to_string(),
            action: ActionKind::Restart,
            playbook: "restart-api".to_string(),
            tier: Some(Tier::Tier1),
            started_at: now,
            ended_at: now,
            outcome,
            detail: String::new(),
            denial: None,
            failure: None,
        }
    }

    fn manager() -> EscalationManager {
        EscalationManager::new(Arc::new(StateDb::in_memory().unwrap()))
    }

    /// Close `record`'s incident with a drafted ticket, as the orchestrator does.
    fn file(m: &EscalationManager, record: &ExecutionRecord) -> EscalationTicket {
        let mut entry = IncidentEntry {
            incident_id: record.incident_id.clone(),
            service: record.service.clone(),
            action: record.action,
            host: record.host.clone(),
            playbook: record.playbook.clone(),
            state: RemediationState::Failed,
            record_id: None,
            claimed_at: record.started_at,
            updated_at: record.started_at,
        };
        m.db.claim_incident(&entry).unwrap();
        let ticket = m
            .draft(record, Diagnostics::default(), RetryPolicy::Never)
            .unwrap();
        let (_, ticket) = m
            .db
            .close_incident(&mut entry, record.clone(), Some(ticket), None)
            .unwrap();
        ticket.unwrap()
    }

    #[test]
    fn sequential_ids() {
        let m = manager();
        let mut a = record(Outcome::Failed);
        a.failure = Some(FailureKind::Backend);
        let mut b = a.clone();
        b.incident_id = "inc-10".to_string();
        assert_eq!(file(&m, &a).id, "E1");
        assert_eq!(file(&m, &b).id, "E2");
        assert_eq!(m.list(None).unwrap().len(), 2);
        assert_eq!(m.get("E2").unwrap().incident_id, "inc-10");
    }

    #[test]
    fn failed_restart_requests_diagnosis() {
        let m = manager();
        let mut r = record(Outcome::Failed);
        r.failure = Some(FailureKind::VerificationTimeout);
        let diagnostics = Diagnostics {
            backend_output: "container restarted".to_string(),
            verification_output: "probe timed out after 120s".to_string(),
            log_tail: "panic: config missing".to_string(),
            diagnosis: Some("bad config push".to_string()),
        };
        let t = m
            .draft(&r, diagnostics.clone(), RetryPolicy::EscalateWithDiagnosis)
            .unwrap();
        assert!(t.diagnosis_requested);
        assert_eq!(t.policy(), "execution");
        assert_eq!(t.reason, "restart failed: verification_timeout");
        assert_eq!(t.diagnostics, diagnostics);
        assert!(t.id.is_empty());
    }

    #[test]
    fn denial_reason_names_policy() {
        let m = manager();
        let mut r = record(Outcome::Denied);
        r.denial = Some(Denial::Access {
            reason: "insufficient host access".to_string(),
        });
        let t = m
            .draft(&r, Diagnostics::default(), RetryPolicy::EscalateWithDiagnosis)
            .unwrap();
        assert_eq!(t.policy(), "access");
        assert!(t.reason.contains("insufficient host access"));
        assert!(!t.diagnosis_requested);
    }

    #[test]
    fn success_cannot_be_escalated() {
        let m = manager();
        let err = m
            .draft(&record(Outcome::Success), Diagnostics::default(), RetryPolicy::Never)
            .unwrap_err();
        assert!(matches!(err, RemedyError::InvalidTransition { .. }));
    }

    #[test]
    fn get_missing_returns_not_found() {
        let m = manager();
        let err = m.get("E99").unwrap_err();
        assert!(matches!(err, RemedyError::TicketNotFound(_)));
    }

    #[test]
    fn list_filters_by_incident() {
        let m = manager();
        let mut a = record(Outcome::Failed);
        a.failure = Some(FailureKind::Backend);
        let mut b = a.clone();
        b.incident_id = "inc-10".to_string();
        file(&m, &a);
        file(&m, &b);
        let only = m.list(Some("inc-10")).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].incident_id, "inc-10");
        assert_eq!(only[0].record_ids.len(), 1);
    }
}
