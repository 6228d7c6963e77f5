use super::{open_db, run::print_report};
use crate::output::print_json;
use anyhow::Context;
use remedy_core::config::Config;
use remedy_core::orchestrator::Orchestrator;
use remedy_core::notify::{LogSink, OutboxSink};
use remedy_core::paths;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub fn run(root: &Path, max_age_secs: u64, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let orchestrator = Orchestrator::new(&config, open_db(root)?)?
        .with_sink(Arc::new(LogSink))
        .with_sink(Arc::new(OutboxSink::new(paths::outbox_path(root))));

    let rt = tokio::runtime::Runtime::new()?;
    let reports = rt.block_on(orchestrator.startup_recovery(Duration::from_secs(max_age_secs)))?;

    if json {
        let value: Vec<_> = reports
            .iter()
            .map(|r| {
                serde_json::json!({
                    "state": r.state.as_str(),
                    "record": r.record,
                    "ticket": r.ticket,
                })
            })
            .collect();
        return print_json(&value);
    }
    if reports.is_empty() {
        println!("nothing to recover");
        return Ok(());
    }
    println!("recovered {} remediation(s)", reports.len());
    for report in &reports {
        print_report(report, false)?;
    }
    Ok(())
}
