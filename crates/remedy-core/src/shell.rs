//! Shell driver: runs a playbook's `command` and `verify` strings with `sh -c`.
//!
//! Connection parameters reach the script through the environment:
//!
//! ```text
//! REMEDY_HOST  REMEDY_ADDRESS  REMEDY_USER  REMEDY_PREFIX
//! REMEDY_SERVICE  REMEDY_ACTION  REMEDY_INCIDENT
//! ```
//!
//! A child left running by a timeout is not killed: remote remediation
//! commands cannot be safely interrupted mid-flight.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

use crate::config::Playbook;
use crate::error::{RemedyError, Result};
use crate::executor::{
    Backend, BackendError, BackendReport, Driver, ExecutionContext, ProbeReport, VerificationProbe,
};
use crate::policy::{default_policy, ActionPolicy};

/// Output kept in a detail string, from the end.
const DETAIL_TAIL_BYTES: usize = 4096;

fn command(script: &str, ctx: &ExecutionContext) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(script)
        .env("REMEDY_HOST", &ctx.access.host)
        .env("REMEDY_ADDRESS", &ctx.access.address)
        .env("REMEDY_USER", &ctx.access.user)
        .env("REMEDY_PREFIX", &ctx.access.prefix)
        .env("REMEDY_SERVICE", &ctx.service)
        .env("REMEDY_ACTION", ctx.action.as_str())
        .env("REMEDY_INCIDENT", &ctx.incident_id)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

/// Trimmed stdout followed by stderr, cut to the last few KiB.
fn tail(stdout: &[u8], stderr: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(stdout).trim().to_string();
    let err = String::from_utf8_lossy(stderr);
    let err = err.trim();
    if !err.is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(err);
    }
    if text.len() <= DETAIL_TAIL_BYTES {
        return text;
    }
    let mut cut = text.len() - DETAIL_TAIL_BYTES;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    text[cut..].to_string()
}

// ---------------------------------------------------------------------------
// ShellBackend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ShellBackend {
    script: String,
}

impl ShellBackend {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

#[async_trait]
impl Backend for ShellBackend {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
    ) -> std::result::Result<BackendReport, BackendError> {
        let output = command(&self.script, ctx)
            .output()
            .await
            .map_err(|e| BackendError::Unavailable(format!("failed to spawn sh: {e}")))?;
        let detail = tail(&output.stdout, &output.stderr);
        if output.status.success() {
            Ok(BackendReport::ok(detail))
        } else {
            Ok(BackendReport::failed(if detail.is_empty() {
                output.status.to_string()
            } else {
                detail
            }))
        }
    }
}

// ---------------------------------------------------------------------------
// ShellProbe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellProbe {
    /// Exit status 0 means the service is healthy.
    Script(String),
    /// Nothing to run. Passes for read-only actions and fails for any
    /// action that changes the host.
    ReadOnly,
}

impl ShellProbe {
    pub fn script(script: impl Into<String>) -> Self {
        Self::Script(script.into())
    }

    pub fn read_only() -> Self {
        Self::ReadOnly
    }
}

#[async_trait]
impl VerificationProbe for ShellProbe {
    async fn verify(&self, ctx: &ExecutionContext) -> ProbeReport {
        let script = match self {
            Self::Script(script) => script,
            Self::ReadOnly if default_policy(ctx.action).requires_write => {
                return ProbeReport::fail(format!(
                    "no verification configured for {}; a change cannot be confirmed",
                    ctx.action
                ));
            }
            Self::ReadOnly => return ProbeReport::pass("read-only action; nothing to verify"),
        };
        match command(script, ctx).output().await {
            Ok(output) if output.status.success() => {
                ProbeReport::pass(tail(&output.stdout, &output.stderr))
            }
            Ok(output) => {
                let detail = tail(&output.stdout, &output.stderr);
                ProbeReport::fail(if detail.is_empty() {
                    output.status.to_string()
                } else {
                    detail
                })
            }
            Err(e) => ProbeReport::fail(format!("failed to spawn sh: {e}")),
        }
    }
}

/// Build the driver for a playbook's shell scripts.
///
/// Refuses a playbook with no command, and a write-class playbook with no
/// `verify` script: its success could never be confirmed.
pub fn driver(playbook: &Playbook, policy: &ActionPolicy) -> Result<Driver> {
    let not_runnable = |reason: String| RemedyError::PlaybookNotRunnable {
        playbook: playbook.name.clone(),
        reason,
    };
    if playbook.command.trim().is_empty() {
        return Err(not_runnable("no command to run".to_string()));
    }
    let probe = match playbook.verify.as_deref().map(str::trim) {
        Some(script) if !script.is_empty() => ShellProbe::script(script),
        _ if policy.requires_write => {
            return Err(not_runnable(format!(
                "{} changes the host and needs a verify script",
                playbook.action
            )));
        }
        _ => ShellProbe::read_only(),
    };
    Ok(Driver::new(ShellBackend::new(&playbook.command), probe))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::ResolvedAccess;
    use crate::clock::SystemClock;
    use crate::executor;
    use crate::policy::PolicyTable;
    use crate::types::{AccessMethod, ActionKind, FailureKind, Outcome, Tier};

    fn playbook(action: ActionKind, command: &str, verify: Option<&str>) -> Playbook {
        Playbook {
            name: "pb".to_string(),
            action,
            min_tier: Tier::Tier3,
            cooldown: None,
            verify_timeout_seconds: None,
            command: command.to_string(),
            verify: verify.map(str::to_string),
            description: None,
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            incident_id: "inc-42".to_string(),
            service: "api".to_string(),
            action: ActionKind::Restart,
            access: ResolvedAccess {
                host: "web-01".to_string(),
                address: "10.0.0.4".to_string(),
                user: "deploy".to_string(),
                prefix: "sudo -n".to_string(),
                method: AccessMethod::Sudo,
                executable: true,
            },
        }
    }

    #[tokio::test]
    async fn exports_connection_env() {
        let backend = ShellBackend::new(
            "echo $REMEDY_INCIDENT $REMEDY_SERVICE $REMEDY_ACTION $REMEDY_USER@$REMEDY_ADDRESS \"$REMEDY_PREFIX\"",
        );
        let report = backend.execute(&ctx()).await.unwrap();
        assert!(report.success);
        assert_eq!(report.detail, "inc-42 api restart deploy@10.0.0.4 sudo -n");
    }

    #[tokio::test]
    async fn nonzero_exit_is_backend_failure() {
        let backend = ShellBackend::new("echo boom >&2; exit 3");
        let report = backend.execute(&ctx()).await.unwrap();
        assert!(!report.success);
        assert_eq!(report.detail, "boom");
    }

    #[tokio::test]
    async fn read_only_verification_passes_only_read_only_actions() {
        let mut inspect = ctx();
        inspect.action = ActionKind::InspectLogs;
        assert!(ShellProbe::read_only().verify(&inspect).await.passed);

        let report = ShellProbe::read_only().verify(&ctx()).await;
        assert!(!report.passed);
        assert!(report.detail.contains("no verification configured for restart"));
    }

    #[tokio::test]
    async fn unverified_restart_is_not_a_success() {
        let driver = Driver::new(ShellBackend::new("true"), ShellProbe::read_only());
        let policy = default_policy(ActionKind::Restart);
        let e = executor::execute(&ctx(), &policy, &driver, &SystemClock).await;
        assert_eq!(e.outcome, Outcome::Failed);
        assert_eq!(e.failure, Some(FailureKind::Verification));
    }

    #[test]
    fn driver_refuses_unverifiable_playbooks() {
        let table = PolicyTable::default();
        let mut pb = playbook(ActionKind::Restart, "systemctl restart api", None);
        let err = driver(&pb, &pb.effective_policy(&table)).err().unwrap();
        assert!(matches!(err, RemedyError::PlaybookNotRunnable { .. }));
        assert!(err.to_string().contains("needs a verify script"));

        pb.verify = Some("  ".to_string());
        assert!(driver(&pb, &pb.effective_policy(&table)).is_err());

        pb.verify = Some("curl -fsS localhost/health".to_string());
        assert!(driver(&pb, &pb.effective_policy(&table)).is_ok());

        pb.command = String::new();
        let err = driver(&pb, &pb.effective_policy(&table)).err().unwrap();
        assert!(err.to_string().contains("no command to run"));
    }

    #[test]
    fn read_only_playbook_needs_no_verify() {
        let pb = playbook(ActionKind::InspectLogs, "journalctl -u api", None);
        assert!(driver(&pb, &pb.effective_policy(&PolicyTable::default())).is_ok());
    }

    #[tokio::test]
    async fn verify_script_reports_failure_output() {
        let report = ShellProbe::script("echo unhealthy; false")
            .verify(&ctx())
            .await;
        assert!(!report.passed);
        assert_eq!(report.detail, "unhealthy");
    }

    #[test]
    fn tail_keeps_the_end() {
        let long = "x".repeat(DETAIL_TAIL_BYTES + 10) + "END";
        let t = tail(long.as_bytes(), b"");
        assert!(t.ends_with("END"));
        assert_eq!(t.len(), DETAIL_TAIL_BYTES);
    }
}
