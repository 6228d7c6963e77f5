use super::open_db;
use crate::output::{print_json, print_table, timestamp};
use anyhow::Context;
use clap::Subcommand;
use remedy_core::config::Config;
use remedy_core::cooldown::{CooldownKey, CooldownTracker, CooldownWindow};
use remedy_core::policy::PolicyTable;
use remedy_core::types::ActionKind;
use std::path::Path;

#[derive(Subcommand)]
pub enum CooldownSubcommand {
    /// List every window that has admitted an action
    List,

    /// Show one (service, action) window
    Show {
        #[arg(long)]
        service: String,

        /// restart, redeploy, rotate_key or inspect_logs
        #[arg(long)]
        action: String,
    },
}

pub fn run(root: &Path, subcmd: CooldownSubcommand, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let policies = config.policy_table();
    let db = open_db(root)?;
    let tracker = CooldownTracker::open(policies.clone(), &db)?;

    match subcmd {
        CooldownSubcommand::List => {
            let windows = tracker.windows();
            if json {
                let rows: Vec<_> = windows
                    .iter()
                    .map(|(key, w)| serde_json::json!({ "key": key, "window": w }))
                    .collect();
                return print_json(&rows);
            }
            if windows.is_empty() {
                println!("no cooldown windows");
                return Ok(());
            }
            print_table(
                &["SERVICE", "ACTION", "USED", "WINDOW START", "RESETS AT", "LAST ACTION"],
                windows
                    .iter()
                    .map(|(key, w)| row(key, w, &policies))
                    .collect(),
            );
            Ok(())
        }

        CooldownSubcommand::Show { service, action } => {
            let action: ActionKind = action.parse()?;
            let window = tracker.window(&service, action);
            if json {
                return print_json(&window);
            }
            let Some(w) = window else {
                println!("no window for {service}/{action}: next {action} will open one");
                return Ok(());
            };
            let key = CooldownKey::new(service, action);
            let cells = row(&key, &w, &policies);
            println!("Key:          {key}");
            println!("Used:         {}", cells[2]);
            println!("Window start: {}", cells[3]);
            println!("Resets at:    {}", cells[4]);
            println!("Last action:  {}", cells[5]);
            Ok(())
        }
    }
}

fn row(key: &CooldownKey, w: &CooldownWindow, policies: &PolicyTable) -> Vec<String> {
    let (used, resets) = match policies.get(key.action).cooldown {
        Some(c) => (
            format!("{}/{}", w.count, c.max_per_window),
            timestamp(c.window_end(w.window_start)),
        ),
        None => (w.count.to_string(), "-".to_string()),
    };
    vec![
        key.service.clone(),
        key.action.to_string(),
        used,
        timestamp(w.window_start),
        resets,
        w.last_action_at.map(timestamp).unwrap_or_else(|| "-".to_string()),
    ]
}
