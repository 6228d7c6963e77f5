use super::open_db;
use crate::output::{print_json, print_table, timestamp, truncate};
use clap::Subcommand;
use remedy_core::escalation::EscalationManager;
use std::path::Path;

#[derive(Subcommand)]
pub enum EscalationSubcommand {
    /// List escalation tickets
    List {
        /// Only tickets for this incident
        #[arg(long)]
        incident: Option<String>,
    },

    /// Show one ticket with its diagnostics
    Show {
        /// Ticket id (e.g. E1)
        id: String,
    },
}

pub fn run(root: &Path, subcommand: EscalationSubcommand, json: bool) -> anyhow::Result<()> {
    let manager = EscalationManager::new(open_db(root)?);

    match subcommand {
        EscalationSubcommand::List { incident } => {
            let tickets = manager.list(incident.as_deref())?;
            if json {
                return print_json(&tickets);
            }
            if tickets.is_empty() {
                println!("no escalations");
                return Ok(());
            }
            print_table(
                &["ID", "INCIDENT", "ACTION", "SERVICE", "POLICY", "REASON"],
                tickets
                    .iter()
                    .map(|t| {
                        vec![
                            t.id.clone(),
                            t.incident_id.clone(),
                            t.action.to_string(),
                            t.service.clone(),
                            t.policy().to_string(),
                            truncate(&t.reason, 60),
                        ]
                    })
                    .collect(),
            );
            Ok(())
        }

        EscalationSubcommand::Show { id } => {
            let t = manager.get(&id)?;
            if json {
                return print_json(&t);
            }
            println!("ID:        {}", t.id);
            println!("Incident:  {}", t.incident_id);
            println!("Target:    {} {} on {}", t.action, t.service, t.host);
            println!("Outcome:   {} ({})", t.outcome, t.policy());
            println!("Reason:    {}", t.reason);
            println!("Created:   {}", timestamp(t.created_at));
            let records: Vec<String> = t.record_ids.iter().map(|id| format!("#{id}")).collect();
            println!("Records:   {}", records.join(", "));
            if t.diagnosis_requested {
                println!("Diagnosis requested: identify the root cause before any further action");
            }
            let d = &t.diagnostics;
            for (label, text) in [
                ("Backend output", d.backend_output.as_str()),
                ("Verification output", d.verification_output.as_str()),
                ("Log tail", d.log_tail.as_str()),
                ("Diagnosis", d.diagnosis.as_deref().unwrap_or("")),
            ] {
                if !text.is_empty() {
                    println!();
                    println!("{label}:");
                    for line in text.lines() {
                        println!("  {line}");
                    }
                }
            }
            Ok(())
        }
    }
}
