//! Persistent remediation state using redb.
//!
//! # Table design
//!
//! ```text
//! windows    "service\0action"           → JSON CooldownWindow (committed counts only)
//! records    u64 sequence                → JSON ExecutionRecord (append-only)
//! tickets    u64 sequence                → JSON EscalationTicket (append-only)
//! incidents  "incident\0service\0action" → JSON IncidentEntry
//! meta       sequence name               → u64 last issued id
//! ```
//!
//! Sequences are bumped inside the same write transaction as the row they
//! number, so ids are gap-free and monotonic across restarts.
//!
//! Closing a request is one transaction: its record, its ticket, its ledger
//! entry and the cooldown window it charged are written together or not at
//! all.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, StorageBackend, TableDefinition};

use crate::audit::ExecutionRecord;
use crate::cooldown::{CooldownKey, CooldownWindow, WindowUpdate};
use crate::error::{RemedyError, Result};
use crate::escalation::EscalationTicket;

use super::state::IncidentEntry;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const WINDOWS: TableDefinition<&str, &[u8]> = TableDefinition::new("windows");
const RECORDS: TableDefinition<u64, &[u8]> = TableDefinition::new("records");
const TICKETS: TableDefinition<u64, &[u8]> = TableDefinition::new("tickets");
const INCIDENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("incidents");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const RECORD_SEQ: &str = "record_seq";
const TICKET_SEQ: &str = "ticket_seq";

fn db_err(e: impl std::fmt::Display) -> RemedyError {
    RemedyError::StateDb(e.to_string())
}

fn next_seq(meta: &mut redb::Table<&'static str, u64>, name: &str) -> Result<u64> {
    let current = meta.get(name).map_err(db_err)?.map(|v| v.value()).unwrap_or(0);
    let next = current + 1;
    meta.insert(name, next).map_err(db_err)?;
    Ok(next)
}

// ---------------------------------------------------------------------------
// StateDb
// ---------------------------------------------------------------------------

/// Durable store for cooldown windows, the audit trail, escalation tickets
/// and the incident ledger.
pub struct StateDb {
    db: Database,
}

impl StateDb {
    /// Open or create the redb database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        Self::init(db)
    }

    /// A database that lives only as long as this value.
    pub fn in_memory() -> Result<Self> {
        Self::with_backend(redb::backends::InMemoryBackend::new())
    }

    pub fn with_backend(backend: impl StorageBackend) -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(db_err)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        // Ensure every table exists before any reads
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(WINDOWS).map_err(db_err)?;
        wt.open_table(RECORDS).map_err(db_err)?;
        wt.open_table(TICKETS).map_err(db_err)?;
        wt.open_table(INCIDENTS).map_err(db_err)?;
        wt.open_table(META).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    // -----------------------------------------------------------------------
    // Cooldown windows
    // -----------------------------------------------------------------------

    pub fn load_windows(&self) -> Result<Vec<(CooldownKey, CooldownWindow)>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(WINDOWS).map_err(db_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (k, v) = entry.map_err(db_err)?;
            let Some(key) = CooldownKey::from_storage_key(k.value()) else {
                tracing::warn!(key = %k.value().escape_debug(), "skipping unreadable cooldown key");
                continue;
            };
            let window: CooldownWindow = serde_json::from_slice(v.value())?;
            result.push((key, window));
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Execution records
    // -----------------------------------------------------------------------

    /// All records in id (append) order.
    pub fn list_records(&self) -> Result<Vec<ExecutionRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(RECORDS).map_err(db_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Escalation tickets
    // -----------------------------------------------------------------------

    pub fn list_tickets(&self) -> Result<Vec<EscalationTicket>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(TICKETS).map_err(db_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Incident ledger
    // -----------------------------------------------------------------------

    /// Claim `(incident, service, action)`. Fails with `IncidentClosed` if
    /// the key was ever claimed before, whatever its state.
    pub fn claim_incident(&self, entry: &IncidentEntry) -> Result<()> {
        let key = entry.storage_key();
        let value = serde_json::to_vec(entry)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(INCIDENTS).map_err(db_err)?;
            if table.get(key.as_str()).map_err(db_err)?.is_some() {
                return Err(RemedyError::IncidentClosed {
                    incident: entry.incident_id.clone(),
                    service: entry.service.clone(),
                    action: entry.action.to_string(),
                });
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    pub fn update_incident(&self, entry: &IncidentEntry) -> Result<()> {
        let value = serde_json::to_vec(entry)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(INCIDENTS).map_err(db_err)?;
            table
                .insert(entry.storage_key().as_str(), value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    /// Close a request in one transaction: append its single record, its
    /// ticket if any, save the cooldown window it charged, and move its
    /// ledger entry to the record's terminal state.
    ///
    /// The record gets the next record id and the ticket the next `E{n}`
    /// id, pointing at that record.
    pub fn close_incident(
        &self,
        entry: &mut IncidentEntry,
        mut record: ExecutionRecord,
        mut ticket: Option<EscalationTicket>,
        window: Option<&WindowUpdate>,
    ) -> Result<(ExecutionRecord, Option<EscalationTicket>)> {
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut meta = wt.open_table(META).map_err(db_err)?;
            record.id = next_seq(&mut meta, RECORD_SEQ)?;
            let record_value = serde_json::to_vec(&record)?;
            let mut records = wt.open_table(RECORDS).map_err(db_err)?;
            records
                .insert(record.id, record_value.as_slice())
                .map_err(db_err)?;

            if let Some(ticket) = ticket.as_mut() {
                let seq = next_seq(&mut meta, TICKET_SEQ)?;
                ticket.id = format!("E{seq}");
                ticket.record_ids = vec![record.id];
                let ticket_value = serde_json::to_vec(&*ticket)?;
                let mut tickets = wt.open_table(TICKETS).map_err(db_err)?;
                tickets
                    .insert(seq, ticket_value.as_slice())
                    .map_err(db_err)?;
            }

            if let Some(update) = window {
                let window_value = serde_json::to_vec(&update.window)?;
                let mut windows = wt.open_table(WINDOWS).map_err(db_err)?;
                windows
                    .insert(update.key.storage_key().as_str(), window_value.as_slice())
                    .map_err(db_err)?;
            }

            entry.record_id = Some(record.id);
            entry.updated_at = record.ended_at;
            let entry_value = serde_json::to_vec(&*entry)?;
            let mut incidents = wt.open_table(INCIDENTS).map_err(db_err)?;
            incidents
                .insert(entry.storage_key().as_str(), entry_value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok((record, ticket))
    }

    /// Non-terminal entries last touched before `cutoff`.
    pub fn stale_incidents(&self, cutoff: DateTime<Utc>) -> Result<Vec<IncidentEntry>> {
        Ok(self
            .list_incidents()?
            .into_iter()
            .filter(|e| !e.state.is_terminal() && e.updated_at < cutoff)
            .collect())
    }

    pub fn list_incidents(&self) -> Result<Vec<IncidentEntry>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(INCIDENTS).map_err(db_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
