use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RemedyError;

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// Authority level of an invoking agent. Ordered: `Tier1 < Tier2 < Tier3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Tier1,
    Tier2,
    Tier3,
}

impl Tier {
    pub fn all() -> &'static [Tier] {
        &[Tier::Tier1, Tier::Tier2, Tier::Tier3]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Tier1 => "tier1",
            Tier::Tier2 => "tier2",
            Tier::Tier3 => "tier3",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = RemedyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tier1" | "1" => Ok(Tier::Tier1),
            "tier2" | "2" => Ok(Tier::Tier2),
            "tier3" | "3" => Ok(Tier::Tier3),
            _ => Err(RemedyError::UnknownTier(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// AccessMethod
// ---------------------------------------------------------------------------

/// Permission level available on a target host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMethod {
    Root,
    Sudo,
    Limited,
}

impl AccessMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessMethod::Root => "root",
            AccessMethod::Sudo => "sudo",
            AccessMethod::Limited => "limited",
        }
    }

    /// Whether commands run through this method may change host state.
    pub fn can_write(self) -> bool {
        !matches!(self, AccessMethod::Limited)
    }
}

impl fmt::Display for AccessMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AccessMethod {
    type Err = RemedyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(AccessMethod::Root),
            "sudo" => Ok(AccessMethod::Sudo),
            "limited" => Ok(AccessMethod::Limited),
            _ => Err(RemedyError::UnknownAccessMethod(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Restart,
    Redeploy,
    RotateKey,
    InspectLogs,
}

impl ActionKind {
    pub fn all() -> &'static [ActionKind] {
        &[
            ActionKind::Restart,
            ActionKind::Redeploy,
            ActionKind::RotateKey,
            ActionKind::InspectLogs,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Restart => "restart",
            ActionKind::Redeploy => "redeploy",
            ActionKind::RotateKey => "rotate_key",
            ActionKind::InspectLogs => "inspect_logs",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = RemedyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restart" => Ok(ActionKind::Restart),
            "redeploy" => Ok(ActionKind::Redeploy),
            "rotate_key" => Ok(ActionKind::RotateKey),
            "inspect_logs" => Ok(ActionKind::InspectLogs),
            _ => Err(RemedyError::UnknownActionKind(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
    Denied,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failed => "failed",
            Outcome::Denied => "denied",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Denial
// ---------------------------------------------------------------------------

/// The policy that rejected a request before anything was executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum Denial {
    Tier {
        agent: Option<Tier>,
        required: Tier,
    },
    Access {
        reason: String,
    },
    Cooldown {
        retry_after: DateTime<Utc>,
    },
    /// Superseded by an operator before execution started.
    Aborted,
}

impl Denial {
    pub fn policy(&self) -> &'static str {
        match self {
            Denial::Tier { .. } => "tier",
            Denial::Access { .. } => "access",
            Denial::Cooldown { .. } => "cooldown",
            Denial::Aborted => "aborted",
        }
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::Tier {
                agent: Some(agent),
                required,
            } => write!(f, "tier denied: {agent} is below required {required}"),
            Denial::Tier {
                agent: None,
                required,
            } => write!(f, "tier denied: unknown agent tier (requires {required})"),
            Denial::Access { reason } => write!(f, "access denied: {reason}"),
            Denial::Cooldown { retry_after } => write!(
                f,
                "cooldown denied: retry after {}",
                retry_after.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            Denial::Aborted => f.write_str("aborted before execution"),
        }
    }
}

// ---------------------------------------------------------------------------
// FailureKind
// ---------------------------------------------------------------------------

/// Why a real execution attempt ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The backend ran and reported failure.
    Backend,
    /// The backend did not answer within the action's execution bound.
    BackendTimeout,
    /// Transport or infrastructure error reaching the backend.
    BackendUnavailable,
    /// The backend succeeded but the verification probe failed.
    Verification,
    /// The verification probe did not answer within its bound.
    VerificationTimeout,
    /// The process stopped while the action was in flight.
    Interrupted,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Backend => "backend",
            FailureKind::BackendTimeout => "backend_timeout",
            FailureKind::BackendUnavailable => "backend_unavailable",
            FailureKind::Verification => "verification",
            FailureKind::VerificationTimeout => "verification_timeout",
            FailureKind::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_ordered() {
        assert!(Tier::Tier1 < Tier::Tier2);
        assert!(Tier::Tier2 < Tier::Tier3);
    }

    #[test]
    fn tier_parses_short_and_long_forms() {
        assert_eq!("tier2".parse::<Tier>().unwrap(), Tier::Tier2);
        assert_eq!("3".parse::<Tier>().unwrap(), Tier::Tier3);
        assert!(matches!(
            "admin".parse::<Tier>(),
            Err(RemedyError::UnknownTier(_))
        ));
    }

    #[test]
    fn action_kind_str_matches_serde() {
        for kind in ActionKind::all() {
            let json = serde_json::to_string(kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(kind.as_str().parse::<ActionKind>().unwrap(), *kind);
        }
    }

    #[test]
    fn limited_access_cannot_write() {
        assert!(AccessMethod::Root.can_write());
        assert!(AccessMethod::Sudo.can_write());
        assert!(!AccessMethod::Limited.can_write());
    }

    #[test]
    fn denial_json_is_tagged_by_policy() {
        let denial = Denial::Access {
            reason: "insufficient host access".to_string(),
        };
        let json = serde_json::to_string(&denial).unwrap();
        assert!(json.contains("\"policy\":\"access\""));
        assert_eq!(denial.policy(), "access");
    }
}
