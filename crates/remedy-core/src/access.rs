//! Host access map and resolver.
//!
//! Layout:
//!   .remedy/hosts.yaml   host id → address, ssh user, access method, prefix
//!
//! The map is loaded once per incident and never mutated afterwards; the
//! resolver is the only component that interprets it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{RemedyError, Result};
use crate::paths;
use crate::policy::ActionPolicy;
use crate::types::{AccessMethod, Denial};

pub const INSUFFICIENT_ACCESS: &str = "insufficient host access";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostEntry {
    pub address: String,
    pub user: String,
    pub method: AccessMethod,
    /// Prepended to every command, e.g. `sudo -n`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,
}

/// Connection parameters for one host, as handed to a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAccess {
    pub host: String,
    pub address: String,
    pub user: String,
    pub prefix: String,
    pub method: AccessMethod,
    /// False for `limited` hosts: write-class actions must not run here.
    pub executable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessMap {
    #[serde(default)]
    pub hosts: BTreeMap<String, HostEntry>,
}

// ---------------------------------------------------------------------------
// AccessMap
// ---------------------------------------------------------------------------

impl AccessMap {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::hosts_path(root);
        if !path.exists() {
            return Err(RemedyError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let map: AccessMap = serde_yaml::from_str(data)?;
        for host in map.hosts.keys() {
            paths::validate_name(host)?;
        }
        Ok(map)
    }

    pub fn insert(&mut self, host: impl Into<String>, entry: HostEntry) {
        self.hosts.insert(host.into(), entry);
    }

    /// Map a host to its access parameters, or fail with `NoAccessMapEntry`.
    pub fn resolve(&self, host: &str) -> Result<ResolvedAccess> {
        let entry = self
            .hosts
            .get(host)
            .ok_or_else(|| RemedyError::NoAccessMapEntry(host.to_string()))?;
        Ok(ResolvedAccess {
            host: host.to_string(),
            address: entry.address.clone(),
            user: entry.user.clone(),
            prefix: entry.prefix.clone(),
            method: entry.method,
            executable: entry.method.can_write(),
        })
    }
}

/// Whether an action with `policy` may run against `access`.
///
/// Read-only actions are allowed everywhere; write-class actions against a
/// non-executable host are denied without being attempted.
pub fn check(access: &ResolvedAccess, policy: &ActionPolicy) -> std::result::Result<(), Denial> {
    if policy.requires_write && !access.executable {
        return Err(Denial::Access {
            reason: INSUFFICIENT_ACCESS.to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
