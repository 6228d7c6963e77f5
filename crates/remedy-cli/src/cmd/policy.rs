use super::fmt_secs;
use crate::output::{print_json, print_table};
use anyhow::Context;
use remedy_core::config::Config;
use remedy_core::policy::RetryPolicy;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let table = config.policy_table();

    if json {
        return print_json(&table);
    }

    print_table(
        &["ACTION", "MIN TIER", "WRITE", "WINDOW", "MAX", "RETRY", "EXEC", "VERIFY"],
        table
            .iter()
            .map(|(kind, p)| {
                let (window, max) = match p.cooldown {
                    Some(c) => (fmt_secs(c.window_seconds), c.max_per_window.to_string()),
                    None => ("-".to_string(), "unlimited".to_string()),
                };
                vec![
                    kind.to_string(),
                    p.min_tier.to_string(),
                    if p.requires_write { "yes" } else { "no" }.to_string(),
                    window,
                    max,
                    match p.retry {
                        RetryPolicy::Never => "never",
                        RetryPolicy::EscalateWithDiagnosis => "escalate+diagnosis",
                    }
                    .to_string(),
                    fmt_secs(p.exec_timeout_seconds),
                    fmt_secs(p.verify_timeout_seconds),
                ]
            })
            .collect(),
    );
    Ok(())
}
