//! Declarative per-ActionKind policy.
//!
//! One table answers every "may this run, how often, with what authority"
//! question: the tier gate reads `min_tier`, the access check reads
//! `requires_write`, the cooldown tracker reads `cooldown`, and the executor
//! reads the two timeouts. Changing policy is a data edit in `config.yaml`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{ActionKind, Tier};

// ---------------------------------------------------------------------------
// CooldownPolicy
// ---------------------------------------------------------------------------

/// Longest cooldown window honored: ten years. Longer windows are clamped.
pub const MAX_WINDOW_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// Fixed-window rate limit: at most `max_per_window` actions per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CooldownPolicy {
    pub window_seconds: u64,
    pub max_per_window: u32,
}

impl CooldownPolicy {
    pub fn new(window: Duration, max_per_window: u32) -> Self {
        Self {
            window_seconds: window.as_secs(),
            max_per_window,
        }
    }

    /// Window length, clamped to [`MAX_WINDOW_SECONDS`].
    pub fn window(&self) -> chrono::Duration {
        let secs = self.window_seconds.min(MAX_WINDOW_SECONDS);
        i64::try_from(secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// End of a window opened at `start`, saturating at the latest
    /// representable instant.
    pub fn window_end(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start
            .checked_add_signed(self.window())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// What happens after a failed attempt. Neither variant retries; they only
/// differ in what the escalation asks the human for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    Never,
    EscalateWithDiagnosis,
}

impl RetryPolicy {
    pub fn wants_diagnosis(self) -> bool {
        matches!(self, RetryPolicy::EscalateWithDiagnosis)
    }
}

// ---------------------------------------------------------------------------
// ActionPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPolicy {
    pub min_tier: Tier,
    /// Write-class actions are categorically denied on `limited` hosts.
    pub requires_write: bool,
    /// `None` means no count limit.
    pub cooldown: Option<CooldownPolicy>,
    pub retry: RetryPolicy,
    pub exec_timeout_seconds: u64,
    pub verify_timeout_seconds: u64,
}

impl ActionPolicy {
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_seconds)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_seconds)
    }

    fn apply(&mut self, o: &PolicyOverride) {
        if let Some(tier) = o.min_tier {
            self.min_tier = tier;
        }
        if let Some(cooldown) = o.cooldown {
            self.cooldown = Some(cooldown);
        }
        if let Some(retry) = o.retry {
            self.retry = retry;
        }
        if let Some(secs) = o.exec_timeout_seconds {
            self.exec_timeout_seconds = secs;
        }
        if let Some(secs) = o.verify_timeout_seconds {
            self.verify_timeout_seconds = secs;
        }
    }
}

const HOUR: u64 = 60 * 60;

pub fn default_policy(kind: ActionKind) -> ActionPolicy {
    match kind {
        ActionKind::Restart => ActionPolicy {
            min_tier: Tier::Tier1,
            requires_write: true,
            cooldown: Some(CooldownPolicy {
                window_seconds: 4 * HOUR,
                max_per_window: 2,
            }),
            retry: RetryPolicy::EscalateWithDiagnosis,
            exec_timeout_seconds: 5 * 60,
            verify_timeout_seconds: 2 * 60,
        },
        ActionKind::Redeploy => ActionPolicy {
            min_tier: Tier::Tier2,
            requires_write: true,
            cooldown: Some(CooldownPolicy {
                window_seconds: 24 * HOUR,
                max_per_window: 1,
            }),
            retry: RetryPolicy::Never,
            exec_timeout_seconds: 15 * 60,
            verify_timeout_seconds: 10 * 60,
        },
        // No hard count limit in practice; one per hour stops rotation thrash.
        ActionKind::RotateKey => ActionPolicy {
            min_tier: Tier::Tier3,
            requires_write: true,
            cooldown: Some(CooldownPolicy {
                window_seconds: HOUR,
                max_per_window: 1,
            }),
            retry: RetryPolicy::Never,
            exec_timeout_seconds: 5 * 60,
            verify_timeout_seconds: 5 * 60,
        },
        ActionKind::InspectLogs => ActionPolicy {
            min_tier: Tier::Tier1,
            requires_write: false,
            cooldown: None,
            retry: RetryPolicy::Never,
            exec_timeout_seconds: 60,
            verify_timeout_seconds: 30,
        },
    }
}

// ---------------------------------------------------------------------------
// PolicyOverride
// ---------------------------------------------------------------------------

/// Partial policy from `config.yaml`; unset fields keep the default.
///
/// `requires_write` is deliberately not overridable: whether an action
/// mutates the host is a property of the action, not a tuning knob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_tier: Option<Tier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<CooldownPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_timeout_seconds: Option<u64>,
}

// ---------------------------------------------------------------------------
// PolicyTable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTable {
    pub restart: ActionPolicy,
    pub redeploy: ActionPolicy,
    pub rotate_key: ActionPolicy,
    pub inspect_logs: ActionPolicy,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            restart: default_policy(ActionKind::Restart),
            redeploy: default_policy(ActionKind::Redeploy),
            rotate_key: default_policy(ActionKind::RotateKey),
            inspect_logs: default_policy(ActionKind::InspectLogs),
        }
    }
}

impl PolicyTable {
    pub fn get(&self, kind: ActionKind) -> &ActionPolicy {
        match kind {
            ActionKind::Restart => &self.restart,
            ActionKind::Redeploy => &self.redeploy,
            ActionKind::RotateKey => &self.rotate_key,
            ActionKind::InspectLogs => &self.inspect_logs,
        }
    }

    fn get_mut(&mut self, kind: ActionKind) -> &mut ActionPolicy {
        match kind {
            ActionKind::Restart => &mut self.restart,
            ActionKind::Redeploy => &mut self.redeploy,
            ActionKind::RotateKey => &mut self.rotate_key,
            ActionKind::InspectLogs => &mut self.inspect_logs,
        }
    }

    /// Default table with `overrides` layered on top.
    pub fn with_overrides<'a>(
        overrides: impl IntoIterator<Item = (&'a ActionKind, &'a PolicyOverride)>,
    ) -> Self {
        let mut table = Self::default();
        for (kind, o) in overrides {
            table.get_mut(*kind).apply(o);
        }
        table
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActionKind, &ActionPolicy)> {
        ActionKind::all().iter().map(move |k| (*k, self.get(*k)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_limits() {
        let t = PolicyTable::default();
        let restart = t.get(ActionKind::Restart).cooldown.unwrap();
        assert_eq!(restart.window_seconds, 4 * 3600);
        assert_eq!(restart.max_per_window, 2);

        let redeploy = t.get(ActionKind::Redeploy).cooldown.unwrap();
        assert_eq!(redeploy.window_seconds, 24 * 3600);
        assert_eq!(redeploy.max_per_window, 1);

        let rotate = t.get(ActionKind::RotateKey).cooldown.unwrap();
        assert_eq!(rotate.window_seconds, 3600);
        assert_eq!(rotate.max_per_window, 1);

        assert!(t.get(ActionKind::InspectLogs).cooldown.is_none());
    }

    #[test]
    fn only_inspect_logs_is_read_only() {
        let t = PolicyTable::default();
        for (kind, policy) in t.iter() {
            assert_eq!(
                policy.requires_write,
                kind != ActionKind::InspectLogs,
                "{kind}"
            );
        }
    }

    #[test]
    fn restart_escalates_with_diagnosis() {
        let t = PolicyTable::default();
        assert!(t.get(ActionKind::Restart).retry.wants_diagnosis());
        assert!(!t.get(ActionKind::Redeploy).retry.wants_diagnosis());
    }

    #[test]
    fn overrides_touch_only_named_fields() {
        let mut overrides = HashMap::new();
        overrides.insert(
            ActionKind::Restart,
            PolicyOverride {
                verify_timeout_seconds: Some(10),
                ..Default::default()
            },
        );
        let t = PolicyTable::with_overrides(&overrides);
        let restart = t.get(ActionKind::Restart);
        assert_eq!(restart.verify_timeout_seconds, 10);
        assert_eq!(restart.exec_timeout_seconds, 300);
        assert_eq!(restart.min_tier, Tier::Tier1);
        assert_eq!(t.redeploy, default_policy(ActionKind::Redeploy));
    }

    #[test]
    fn override_rejects_requires_write() {
        let yaml = "requires_write: false\n";
        assert!(serde_yaml::from_str::<PolicyOverride>(yaml).is_err());
    }

    #[test]
    fn cooldown_window_converts_to_chrono() {
        let c = CooldownPolicy::new(Duration::from_secs(90), 3);
        assert_eq!(c.window(), chrono::Duration::seconds(90));
    }

    #[test]
    fn oversized_window_is_clamped() {
        for window_seconds in [MAX_WINDOW_SECONDS + 1, 10u64.pow(16), u64::MAX] {
            let c = CooldownPolicy {
                window_seconds,
                max_per_window: 1,
            };
            assert_eq!(c.window(), chrono::Duration::seconds(MAX_WINDOW_SECONDS as i64));
        }
    }

    #[test]
    fn window_end_saturates() {
        let c = CooldownPolicy {
            window_seconds: u64::MAX,
            max_per_window: 1,
        };
        let late = DateTime::<Utc>::MAX_UTC - chrono::Duration::days(1);
        assert_eq!(c.window_end(late), DateTime::<Utc>::MAX_UTC);
    }
}
