//! Append-only audit trail of remediation attempts.
//!
//! Every request that got past its incident claim produces exactly one
//! `ExecutionRecord`. Records are written once by `StateDb` and never
//! updated; ids come from a persisted monotonic sequence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ActionKind, Denial, FailureKind, Outcome, Tier};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Assigned on append; `0` before that.
    pub id: u64,
    pub incident_id: String,
    pub service: String,
    pub host: String,
    pub action: ActionKind,
    pub playbook: String,
    pub tier: Option<Tier>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: Outcome,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial: Option<Denial>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl ExecutionRecord {
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }

    /// One-line summary for tables and log lines.
    pub fn summary(&self) -> String {
        let why = match (&self.denial, self.failure) {
            (Some(d), _) => format!(" ({d})"),
            (None, Some(f)) => format!(" ({f})"),
            (None, None) => String::new(),
        };
        format!(
            "#{} {} {} on {}@{}: {}{}",
            self.id, self.incident_id, self.action, self.service, self.host, self.outcome, why
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(outcome: Outcome) -> ExecutionRecord {
        let now = Utc::now();
        ExecutionRecord {
            id: 7,
            incident_id: "inc-1".to_string(),
            service: "api".to_string(),
            host: "web-01".to_string(),
            action: ActionKind::Restart,
            playbook: "restart-api".to_string(),
            tier: Some(Tier::Tier1),
            started_at: now,
            ended_at: now + chrono::Duration::seconds(12),
            outcome,
            detail: "container restarted".to_string(),
            denial: None,
            failure: None,
        }
    }

    #[test]
    fn summary_names_failure_kind() {
        let mut r = record(Outcome::Failed);
        r.failure = Some(FailureKind::VerificationTimeout);
        let s = r.summary();
        assert!(s.starts_with("#7 inc-1 restart on api@web-01: failed"));
        assert!(s.contains("verification_timeout"));
    }

    #[test]
    fn success_json_omits_empty_reasons() {
        let r = record(Outcome::Success);
        let json = serde_json::to_string(&r).unwrap();
        assert!(!json.contains("denial"));
        assert!(!json.contains("failure"));
        assert_eq!(r.duration(), chrono::Duration::seconds(12));
    }
}
