//! Terminal reports and the sinks that deliver them.
//!
//! Every terminal outcome produces exactly one [`Report`]. Delivery is best
//! effort: a sink error is logged by the caller and never changes the
//! outcome that was already recorded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use crate::audit::ExecutionRecord;
use crate::error::Result;
use crate::escalation::EscalationTicket;
use crate::io::atomic_write;
use crate::types::ActionKind;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessReport {
    pub incident_id: String,
    pub service: String,
    pub host: String,
    pub action: ActionKind,
    pub record_id: u64,
    pub summary: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl SuccessReport {
    pub fn from_record(record: &ExecutionRecord) -> Self {
        Self {
            incident_id: record.incident_id.clone(),
            service: record.service.clone(),
            host: record.host.clone(),
            action: record.action,
            record_id: record.id,
            summary: record.summary(),
            detail: record.detail.clone(),
            created_at: record.ended_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Report {
    Success(SuccessReport),
    Escalation(EscalationTicket),
}

impl Report {
    pub fn incident_id(&self) -> &str {
        match self {
            Report::Success(r) => &r.incident_id,
            Report::Escalation(t) => &t.incident_id,
        }
    }

    pub fn is_escalation(&self) -> bool {
        matches!(self, Report::Escalation(_))
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, report: &Report) -> Result<()>;
}

/// Emits reports as tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, report: &Report) -> Result<()> {
        match report {
            Report::Success(r) => tracing::info!(
                incident = %r.incident_id,
                service = %r.service,
                action = %r.action,
                record = r.record_id,
                "remediation succeeded"
            ),
            Report::Escalation(t) => tracing::warn!(
                ticket = %t.id,
                incident = %t.incident_id,
                service = %t.service,
                action = %t.action,
                policy = t.policy(),
                diagnosis_requested = t.diagnosis_requested,
                "escalation raised: {}",
                t.reason
            ),
        }
        Ok(())
    }
}

/// Appends reports to a YAML list on disk, e.g. `.remedy/outbox.yaml`,
/// for an external channel to pick up.
#[derive(Debug)]
pub struct OutboxSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl OutboxSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn read(&self) -> Result<Vec<Report>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_yaml::from_str(&data)?)
    }
}

#[async_trait]
impl NotificationSink for OutboxSink {
    async fn deliver(&self, report: &Report) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut reports = self.read()?;
        reports.push(report.clone());
        let data = serde_yaml::to_string(&reports)?;
        atomic_write(&self.path, data.as_bytes())
    }
}

/// Keeps delivered reports in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<Report>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn deliver(&self, report: &Report) -> Result<()> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
