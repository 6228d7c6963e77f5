pub mod access;
pub mod audit;
pub mod clock;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod escalation;
pub mod executor;
pub mod io;
pub mod notify;
pub mod orchestrator;
pub mod paths;
pub mod policy;
pub mod shell;
pub mod tier;
pub mod types;

pub use error::{RemedyError, Result};
