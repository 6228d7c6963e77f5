use super::open_db;
use crate::output::{print_json, print_table, timestamp, truncate};
use std::path::Path;

pub fn run(root: &Path, incident: Option<&str>, json: bool) -> anyhow::Result<()> {
    let db = open_db(root)?;
    let records: Vec<_> = db
        .list_records()?
        .into_iter()
        .filter(|r| incident.map_or(true, |id| r.incident_id == id))
        .collect();

    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("no execution records");
        return Ok(());
    }
    print_table(
        &["ID", "INCIDENT", "ACTION", "SERVICE", "HOST", "OUTCOME", "ENDED", "DETAIL"],
        records
            .iter()
            .map(|r| {
                vec![
                    r.id.to_string(),
                    r.incident_id.clone(),
                    r.action.to_string(),
                    r.service.clone(),
                    r.host.clone(),
                    r.outcome.to_string(),
                    timestamp(r.ended_at),
                    truncate(&r.detail, 60),
                ]
            })
            .collect(),
    );
    Ok(())
}
