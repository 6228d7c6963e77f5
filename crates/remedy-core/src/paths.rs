use crate::error::{RemedyError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const REMEDY_DIR: &str = ".remedy";

pub const CONFIG_FILE: &str = ".remedy/config.yaml";
pub const HOSTS_FILE: &str = ".remedy/hosts.yaml";
pub const STATE_DB_FILE: &str = ".remedy/state.db";
pub const OUTBOX_FILE: &str = ".remedy/outbox.yaml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn remedy_dir(root: &Path) -> PathBuf {
    root.join(REMEDY_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn hosts_path(root: &Path) -> PathBuf {
    root.join(HOSTS_FILE)
}

pub fn state_db_path(root: &Path) -> PathBuf {
    root.join(STATE_DB_FILE)
}

pub fn outbox_path(root: &Path) -> PathBuf {
    root.join(OUTBOX_FILE)
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9\-._]*[a-z0-9]$|^[a-z0-9]$").unwrap()
    })
}

/// Validate a service, host or playbook name: lowercase alphanumerics plus
/// `-`, `.` and `_`.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 128 || !name_re().is_match(name) {
        return Err(RemedyError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Validate an incident id as issued by the paging system (`INC-1234`,
/// `OPS-42`). Ids become redb key segments joined by NUL, so NUL is refused
/// along with blank and over-long ids; anything else is taken as given.
pub fn validate_incident_id(id: &str) -> Result<()> {
    if id.trim().is_empty() || id.len() > 256 || id.contains('\0') {
        return Err(RemedyError::InvalidIncidentId(id.escape_debug().to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
