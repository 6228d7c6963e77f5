use crate::error::{RemedyError, Result};
use crate::paths;
use crate::policy::{
    ActionPolicy, CooldownPolicy, PolicyOverride, PolicyTable, MAX_WINDOW_SECONDS,
};
use crate::tier;
use crate::types::{ActionKind, Tier};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: String) -> Self {
        Self {
            level: WarnLevel::Warning,
            message,
        }
    }

    fn error(message: String) -> Self {
        Self {
            level: WarnLevel::Error,
            message,
        }
    }
}

// ---------------------------------------------------------------------------
// Playbook
// ---------------------------------------------------------------------------

/// A named, prescriptive remediation procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Playbook {
    pub name: String,
    pub action: ActionKind,
    pub min_tier: Tier,
    /// Replaces the action's window and max for requests through this playbook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<CooldownPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_timeout_seconds: Option<u64>,
    /// Shell command run by the shell driver.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    /// Shell verification probe; exit 0 means healthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Playbook {
    /// The action's policy with this playbook's overrides applied.
    pub fn effective_policy(&self, table: &PolicyTable) -> ActionPolicy {
        let mut policy = table.get(self.action).clone();
        policy.min_tier = tier::effective_min_tier(self.min_tier, &policy);
        if let Some(cooldown) = self.cooldown {
            policy.cooldown = Some(cooldown);
        }
        if let Some(secs) = self.verify_timeout_seconds {
            policy.verify_timeout_seconds = secs;
        }
        policy
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub version: u32,
    /// Per-action overrides of the built-in policy table.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub policies: BTreeMap<ActionKind, PolicyOverride>,
    #[serde(default)]
    pub playbooks: Vec<Playbook>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// The starter configuration written by `remedy init`.
    pub fn new() -> Self {
        Self {
            version: 1,
            policies: BTreeMap::new(),
            playbooks: vec![
                Playbook {
                    name: "restart-service".to_string(),
                    action: ActionKind::Restart,
                    min_tier: Tier::Tier1,
                    cooldown: None,
                    verify_timeout_seconds: None,
                    command: "echo \"restart $REMEDY_SERVICE on $REMEDY_HOST\"".to_string(),
                    verify: Some("true".to_string()),
                    description: Some("Restart a crashed service container".to_string()),
                },
                Playbook {
                    name: "inspect-logs".to_string(),
                    action: ActionKind::InspectLogs,
                    min_tier: Tier::Tier1,
                    cooldown: None,
                    verify_timeout_seconds: None,
                    command: "echo \"tail logs for $REMEDY_SERVICE\"".to_string(),
                    verify: None,
                    description: Some("Collect recent logs; read-only".to_string()),
                },
            ],
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(RemedyError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn policy_table(&self) -> PolicyTable {
        PolicyTable::with_overrides(&self.policies)
    }

    pub fn playbook(&self, name: &str) -> Result<&Playbook> {
        self.playbooks
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| RemedyError::PlaybookNotFound(name.to_string()))
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let table = self.policy_table();

        // 1. Policy overrides
        for (kind, o) in &self.policies {
            let scope = format!("policies.{kind}");
            if let Some(cooldown) = &o.cooldown {
                check_cooldown(&scope, cooldown, &mut warnings);
            }
            if o.verify_timeout_seconds == Some(0) {
                warnings.push(ConfigWarning::error(format!(
                    "{scope} has verify_timeout_seconds=0; every verification would time out"
                )));
            }
            if o.exec_timeout_seconds == Some(0) {
                warnings.push(ConfigWarning::error(format!(
                    "{scope} has exec_timeout_seconds=0; every backend call would time out"
                )));
            }
        }

        // 2. Playbooks
        let mut seen = HashSet::new();
        for pb in &self.playbooks {
            if paths::validate_name(&pb.name).is_err() {
                warnings.push(ConfigWarning::error(format!(
                    "playbook name '{}' is not a valid name",
                    pb.name
                )));
            }
            if !seen.insert(pb.name.as_str()) {
                warnings.push(ConfigWarning::error(format!(
                    "duplicate playbook name '{}'",
                    pb.name
                )));
            }

            let floor = table.get(pb.action).min_tier;
            if pb.min_tier < floor {
                warnings.push(ConfigWarning::warning(format!(
                    "playbook '{}' declares min_tier {} but {} requires {}; {} will be enforced",
                    pb.name, pb.min_tier, pb.action, floor, floor
                )));
            }
            if pb.command.trim().is_empty() {
                warnings.push(ConfigWarning::error(format!(
                    "playbook '{}' has an empty command; the shell driver cannot run it",
                    pb.name
                )));
            }
            if let Some(cooldown) = &pb.cooldown {
                check_cooldown(&format!("playbook '{}'", pb.name), cooldown, &mut warnings);
            }
            if pb.verify_timeout_seconds == Some(0) {
                warnings.push(ConfigWarning::error(format!(
                    "playbook '{}' has verify_timeout_seconds=0; every verification would time out",
                    pb.name
                )));
            }
            let unverified = pb.verify.as_deref().map_or(true, |v| v.trim().is_empty());
            if unverified && pb.effective_policy(&table).requires_write {
                warnings.push(ConfigWarning::error(format!(
                    "playbook '{}' runs {} without a verify script; it will be refused",
                    pb.name, pb.action
                )));
            }
        }

        warnings
    }
}

fn check_cooldown(scope: &str, cooldown: &CooldownPolicy, warnings: &mut Vec<ConfigWarning>) {
    if cooldown.window_seconds == 0 {
        warnings.push(ConfigWarning::error(format!(
            "{scope} has a zero-length cooldown window"
        )));
    }
    if cooldown.window_seconds > MAX_WINDOW_SECONDS {
        warnings.push(ConfigWarning::warning(format!(
            "{scope} has window_seconds={}; it will be capped at {MAX_WINDOW_SECONDS}",
            cooldown.window_seconds
        )));
    }
    if cooldown.max_per_window == 0 {
        warnings.push(ConfigWarning::warning(format!(
            "{scope} has max_per_window=0; the action can never run"
        )));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
version: 1
policies:
  restart:
    cooldown:
      window_seconds: 7200
      max_per_window: 3
playbooks:
  - name: redeploy-api
    action: redeploy
    min_tier: tier1
    command: helm upgrade api ./chart
    verify: kubectl rollout status deploy/api
  - name: rotate-db-key
    action: rotate_key
    min_tier: tier3
    cooldown:
      window_seconds: 86400
      max_per_window: 1
    verify_timeout_seconds: 60
    command: ./rotate.sh
    verify: ./check-key.sh
"#;

    fn parsed() -> Config {
        serde_yaml::from_str(CONFIG).unwrap()
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cfg = parsed();
        cfg.save(dir.path()).unwrap();
        assert_eq!(Config::load(dir.path()).unwrap(), cfg);
    }

    #[test]
    fn load_without_init_fails() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(RemedyError::NotInitialized)
        ));
    }

    #[test]
    fn policy_overrides_apply() {
        let table = parsed().policy_table();
        let restart = table.get(ActionKind::Restart);
        assert_eq!(restart.cooldown.unwrap().max_per_window, 3);
        assert_eq!(restart.cooldown.unwrap().window_seconds, 7200);
        // untouched fields keep their defaults
        assert_eq!(restart.verify_timeout_seconds, 120);
    }

    #[test]
    fn playbook_cannot_lower_tier_floor() {
        let cfg = parsed();
        let pb = cfg.playbook("redeploy-api").unwrap();
        let policy = pb.effective_policy(&cfg.policy_table());
        assert_eq!(policy.min_tier, Tier::Tier2);

        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("redeploy-api")));
    }

    #[test]
    fn playbook_overrides_cooldown_and_verify_timeout() {
        let cfg = parsed();
        let policy = cfg
            .playbook("rotate-db-key")
            .unwrap()
            .effective_policy(&cfg.policy_table());
        assert_eq!(policy.cooldown.unwrap().window_seconds, 86400);
        assert_eq!(policy.verify_timeout_seconds, 60);
        assert_eq!(policy.min_tier, Tier::Tier3);
    }

    #[test]
    fn missing_playbook_is_an_error() {
        assert!(matches!(
            parsed().playbook("nope"),
            Err(RemedyError::PlaybookNotFound(_))
        ));
    }

    #[test]
    fn validate_flags_duplicates_and_zero_windows() {
        let mut cfg = parsed();
        let mut dup = cfg.playbooks[1].clone();
        dup.cooldown = Some(CooldownPolicy {
            window_seconds: 0,
            max_per_window: 1,
        });
        cfg.playbooks.push(dup);
        let errors: Vec<_> = cfg
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .collect();
        assert!(errors.iter().any(|w| w.message.contains("duplicate")));
        assert!(errors.iter().any(|w| w.message.contains("zero-length")));
    }

    #[test]
    fn write_playbook_without_verify_is_an_error() {
        let mut cfg = parsed();
        cfg.playbooks[0].verify = None;
        cfg.playbooks.push(Playbook {
            name: "tail-api".to_string(),
            action: ActionKind::InspectLogs,
            min_tier: Tier::Tier3,
            cooldown: None,
            verify_timeout_seconds: None,
            command: "journalctl -u api -n 200".to_string(),
            verify: None,
            description: None,
        });
        let errors: Vec<_> = cfg
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .collect();
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].message.contains("redeploy-api"));
        assert!(errors[0].message.contains("without a verify script"));
    }

    #[test]
    fn oversized_window_is_flagged() {
        let mut cfg = parsed();
        cfg.playbooks[0].cooldown = Some(CooldownPolicy {
            window_seconds: u64::MAX,
            max_per_window: 1,
        });
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("capped")));
    }

    #[test]
    fn starter_config_is_clean() {
        let errors: Vec<_> = Config::new()
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .collect();
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn unknown_playbook_field_is_rejected() {
        let yaml = "version: 1\nplaybooks:\n  - name: x\n    action: restart\n    min_tier: tier1\n    retries: 3\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }
}
