use super::open_db;
use crate::output::print_json;
use anyhow::Context;
use clap::Args;
use remedy_core::access::AccessMap;
use remedy_core::config::Config;
use remedy_core::notify::{LogSink, OutboxSink};
use remedy_core::orchestrator::{Orchestrator, RemediationReport, RemediationRequest};
use remedy_core::types::{Outcome, Tier};
use remedy_core::{paths, shell};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Exit status for a request that ended `Denied` or `Failed`.
const EXIT_NOT_REMEDIATED: i32 = 2;

#[derive(Args)]
pub struct RunArgs {
    /// Incident id; each incident runs a given action at most once per service
    #[arg(long)]
    pub incident: String,

    /// Service to remediate
    #[arg(long)]
    pub service: String,

    /// Target host id from hosts.yaml
    #[arg(long)]
    pub host: String,

    /// Playbook name from config.yaml
    #[arg(long)]
    pub playbook: String,

    /// Invoking agent tier: tier1, tier2 or tier3. Omitted or unrecognized means denied.
    #[arg(long)]
    pub tier: Option<String>,

    /// File holding a recent log tail to attach to any escalation
    #[arg(long)]
    pub log_tail: Option<PathBuf>,

    /// Free-text diagnosis to attach to any escalation
    #[arg(long)]
    pub diagnosis: Option<String>,
}

pub fn run(root: &Path, args: RunArgs, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let hosts = AccessMap::load(root).context("failed to load hosts.yaml")?;
    let playbook = config.playbook(&args.playbook)?;
    let driver = shell::driver(playbook, &playbook.effective_policy(&config.policy_table()))?;

    let agent_tier = match args.tier.as_deref() {
        Some(raw) => match raw.parse::<Tier>() {
            Ok(tier) => Some(tier),
            Err(e) => {
                tracing::warn!("{e}; treating agent tier as unknown");
                None
            }
        },
        None => None,
    };

    let mut request = RemediationRequest::new(
        args.incident,
        args.service,
        args.host,
        args.playbook,
        agent_tier,
    );
    if let Some(path) = &args.log_tail {
        request.log_tail = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read log tail {}", path.display()))?;
    }
    request.diagnosis = args.diagnosis;

    let db = open_db(root)?;
    let orchestrator = Orchestrator::new(&config, db)?
        .with_sink(Arc::new(LogSink))
        .with_sink(Arc::new(OutboxSink::new(paths::outbox_path(root))));

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(orchestrator.remediate(&request, &hosts, &driver))?;

    print_report(&report, json)?;
    if report.outcome() != Outcome::Success {
        std::process::exit(EXIT_NOT_REMEDIATED);
    }
    Ok(())
}

pub fn print_report(report: &RemediationReport, json: bool) -> anyhow::Result<()> {
    if json {
        let value = serde_json::json!({
            "state": report.state.as_str(),
            "record": report.record,
            "ticket": report.ticket,
        });
        return print_json(&value);
    }

    println!("{}", report.record.summary());
    if !report.record.detail.is_empty() {
        println!("  detail: {}", report.record.detail);
    }
    if let Some(ticket) = &report.ticket {
        println!(
            "  escalated: {} ({}){}",
            ticket.id,
            ticket.policy(),
            if ticket.diagnosis_requested {
                ", diagnosis requested"
            } else {
                ""
            }
        );
    }
    Ok(())
}
