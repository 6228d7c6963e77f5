//! Remediation orchestrator.
//!
//! Provides `Orchestrator` (sequences tier gate, access check, cooldown
//! reservation and execution for one request), the per-request
//! `RemediationState` machine, and `StateDb`, the redb store behind the
//! cooldown windows, audit trail, tickets and incident ledger.

pub mod db;
pub mod engine;
pub mod state;

pub use db::StateDb;
pub use engine::{AbortSignal, Orchestrator, RemediationReport, RemediationRequest};
pub use state::{IncidentEntry, Remediation, RemediationState};
