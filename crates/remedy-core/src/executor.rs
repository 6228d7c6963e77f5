//! Action execution: one backend call followed by one verification probe.
//!
//! The core never knows how a restart or a key rotation is physically
//! performed. A [`Backend`] reports success plus a free-form detail, and a
//! [`VerificationProbe`] independently decides whether the service is
//! actually healthy afterwards. Both run under the action's timeouts; the
//! outcome is `Success` only when both pass.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::access::ResolvedAccess;
use crate::clock::Clock;
use crate::policy::ActionPolicy;
use crate::types::{ActionKind, FailureKind, Outcome};

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Everything a driver needs to act on one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub incident_id: String,
    pub service: String,
    pub action: ActionKind,
    pub access: ResolvedAccess,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendReport {
    pub success: bool,
    pub detail: String,
}

impl BackendReport {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

/// Transport or infrastructure trouble, as opposed to a remediation that
/// ran and did not work.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<BackendReport, BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub passed: bool,
    pub detail: String,
}

impl ProbeReport {
    pub fn pass(detail: impl Into<String>) -> Self {
        Self {
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Health check or rollout-status probe run after every backend call.
#[async_trait]
pub trait VerificationProbe: Send + Sync {
    async fn verify(&self, ctx: &ExecutionContext) -> ProbeReport;
}

/// The concrete driver for one request: a backend and its probe.
#[derive(Clone)]
pub struct Driver {
    pub backend: Arc<dyn Backend>,
    pub probe: Arc<dyn VerificationProbe>,
}

impl Driver {
    pub fn new(backend: impl Backend + 'static, probe: impl VerificationProbe + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
            probe: Arc::new(probe),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub outcome: Outcome,
    pub failure: Option<FailureKind>,
    pub backend_detail: String,
    pub verification_detail: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl Execution {
    /// Combined detail for the execution record.
    pub fn detail(&self) -> String {
        match (self.backend_detail.is_empty(), self.verification_detail.is_empty()) {
            (_, true) => self.backend_detail.clone(),
            (true, false) => format!("verification: {}", self.verification_detail),
            (false, false) => format!(
                "{}; verification: {}",
                self.backend_detail, self.verification_detail
            ),
        }
    }
}

/// Run the backend and then the probe, each under its policy bound.
///
/// Verification always runs, even after a failed backend call, so the
/// escalation carries the service's observed state. When both fail the
/// backend's failure is the one reported.
pub async fn execute(
    ctx: &ExecutionContext,
    policy: &ActionPolicy,
    driver: &Driver,
    clock: &dyn Clock,
) -> Execution {
    let started_at = clock.now();

    let (backend_failure, backend_detail) =
        match tokio::time::timeout(policy.exec_timeout(), driver.backend.execute(ctx)).await {
            Ok(Ok(report)) if report.success => (None, report.detail),
            Ok(Ok(report)) => (Some(FailureKind::Backend), report.detail),
            Ok(Err(e)) => (Some(FailureKind::BackendUnavailable), e.to_string()),
            Err(_) => (
                Some(FailureKind::BackendTimeout),
                format!(
                    "backend did not finish within {}s",
                    policy.exec_timeout_seconds
                ),
            ),
        };

    let (verify_failure, verification_detail) =
        match tokio::time::timeout(policy.verify_timeout(), driver.probe.verify(ctx)).await {
            Ok(report) if report.passed => (None, report.detail),
            Ok(report) => (Some(FailureKind::Verification), report.detail),
            Err(_) => (
                Some(FailureKind::VerificationTimeout),
                format!(
                    "probe timed out after {}s",
                    policy.verify_timeout_seconds
                ),
            ),
        };

    let failure = backend_failure.or(verify_failure);
    let outcome = if failure.is_none() {
        Outcome::Success
    } else {
        Outcome::Failed
    };

    let execution = Execution {
        outcome,
        failure,
        backend_detail,
        verification_detail,
        started_at,
        ended_at: clock.now(),
    };
    tracing::debug!(
        incident = %ctx.incident_id,
        service = %ctx.service,
        action = %ctx.action,
        %outcome,
        failure = ?failure,
        "execution finished"
    );
    execution
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
