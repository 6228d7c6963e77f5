pub mod audit;
pub mod config;
pub mod cooldown;
pub mod escalation;
pub mod init;
pub mod policy;
pub mod recover;
pub mod resolve;
pub mod run;

use anyhow::Context;
use remedy_core::orchestrator::StateDb;
use remedy_core::{paths, RemedyError};
use std::path::Path;
use std::sync::Arc;

/// Open `.remedy/state.db`, refusing to create a project implicitly.
pub fn open_db(root: &Path) -> anyhow::Result<Arc<StateDb>> {
    if !paths::remedy_dir(root).is_dir() {
        return Err(RemedyError::NotInitialized.into());
    }
    let path = paths::state_db_path(root);
    let db = StateDb::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(Arc::new(db))
}

/// Compact duration: `4h`, `90m`, `30s`.
pub fn fmt_secs(secs: u64) -> String {
    if secs > 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}
