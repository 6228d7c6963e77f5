use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemedyError {
    #[error("not initialized: run 'remedy init'")]
    NotInitialized,

    #[error("no access map entry for host '{0}'")]
    NoAccessMapEntry(String),

    #[error("unknown tier '{0}': must be tier1, tier2, or tier3")]
    UnknownTier(String),

    #[error("unknown action kind '{0}': must be restart, redeploy, rotate_key, or inspect_logs")]
    UnknownActionKind(String),

    #[error("unknown access method '{0}': must be root, sudo, or limited")]
    UnknownAccessMethod(String),

    #[error("invalid name '{0}': must be lowercase alphanumeric with hyphens, dots, or underscores")]
    InvalidName(String),

    #[error("invalid incident id '{0}': must be non-empty, at most 256 bytes, and free of NUL")]
    InvalidIncidentId(String),

    #[error("playbook '{playbook}' cannot run: {reason}")]
    PlaybookNotRunnable { playbook: String, reason: String },

    #[error("playbook not found: {0}")]
    PlaybookNotFound(String),

    #[error("incident '{incident}' already ran {action} on '{service}': escalate instead of retrying")]
    IncidentClosed {
        incident: String,
        service: String,
        action: String,
    },

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("escalation ticket not found: {0}")]
    TicketNotFound(String),

    #[error("remediation task interrupted: {0}")]
    Interrupted(String),

    #[error("state db error: {0}")]
    StateDb(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RemedyError>;
