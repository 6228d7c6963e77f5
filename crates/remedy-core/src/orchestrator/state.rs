//! Per-request remediation state machine and the incident ledger entry.
//!
//! Transitions: `Requested → Gated → AccessChecked → Reserved → Executing →
//! Succeeded | Failed`, with `Denied` reachable from every pre-execution
//! state. Nothing leaves a terminal state and nothing returns to
//! `Requested`; a re-run is a new request under a new incident id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RemedyError, Result};
use crate::types::ActionKind;

// ---------------------------------------------------------------------------
// RemediationState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationState {
    Requested,
    Gated,
    AccessChecked,
    Reserved,
    Executing,
    Succeeded,
    Failed,
    Denied,
}

impl RemediationState {
    pub fn as_str(self) -> &'static str {
        match self {
            RemediationState::Requested => "requested",
            RemediationState::Gated => "gated",
            RemediationState::AccessChecked => "access_checked",
            RemediationState::Reserved => "reserved",
            RemediationState::Executing => "executing",
            RemediationState::Succeeded => "succeeded",
            RemediationState::Failed => "failed",
            RemediationState::Denied => "denied",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RemediationState::Succeeded | RemediationState::Failed | RemediationState::Denied
        )
    }

    pub fn can_transition_to(self, to: RemediationState) -> bool {
        use RemediationState::*;
        matches!(
            (self, to),
            (Requested, Gated)
                | (Gated, AccessChecked)
                | (AccessChecked, Reserved)
                | (Reserved, Executing)
                | (Executing, Succeeded)
                | (Executing, Failed)
                | (Requested | Gated | AccessChecked | Reserved, Denied)
        )
    }
}

impl fmt::Display for RemediationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Remediation
// ---------------------------------------------------------------------------

/// Tracks one request through the machine.
#[derive(Debug)]
pub struct Remediation {
    incident_id: String,
    action: ActionKind,
    state: RemediationState,
}

impl Remediation {
    pub fn new(incident_id: impl Into<String>, action: ActionKind) -> Self {
        Self {
            incident_id: incident_id.into(),
            action,
            state: RemediationState::Requested,
        }
    }

    /// Pick up a request persisted in `state`, e.g. during startup recovery.
    pub fn resume(incident_id: impl Into<String>, action: ActionKind, state: RemediationState) -> Self {
        Self {
            incident_id: incident_id.into(),
            action,
            state,
        }
    }

    pub fn state(&self) -> RemediationState {
        self.state
    }

    pub fn advance(&mut self, to: RemediationState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(RemedyError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        tracing::debug!(
            incident = %self.incident_id,
            action = %self.action,
            from = %self.state,
            %to,
            "remediation transition"
        );
        self.state = to;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// IncidentEntry
// ---------------------------------------------------------------------------

/// Ledger row claiming `(incident, service, action)`.
///
/// Created in `Requested` before any gate runs, so a second request for the
/// same key is refused even while the first is still in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentEntry {
    pub incident_id: String,
    pub service: String,
    pub action: ActionKind,
    pub host: String,
    pub playbook: String,
    pub state: RemediationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<u64>,
    pub claimed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IncidentEntry {
    /// `incident\0service\0action`.
    pub fn storage_key(&self) -> String {
        incident_key(&self.incident_id, &self.service, self.action)
    }
}

pub fn incident_key(incident_id: &str, service: &str, action: ActionKind) -> String {
    format!("{incident_id}\0{service}\0{action}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
