use crate::output::{print_json, print_table};
use anyhow::Context;
use remedy_core::access::{self, AccessMap};
use remedy_core::config::Config;
use std::collections::BTreeMap;
use std::path::Path;

pub fn run(root: &Path, host: &str, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let hosts = AccessMap::load(root).context("failed to load hosts.yaml")?;
    let resolved = hosts.resolve(host)?;
    let table = config.policy_table();

    let actions: BTreeMap<String, Option<String>> = table
        .iter()
        .map(|(kind, policy)| {
            let denial = access::check(&resolved, policy).err();
            (kind.to_string(), denial.map(|d| d.to_string()))
        })
        .collect();

    if json {
        let value = serde_json::json!({
            "access": resolved,
            "actions": actions,
        });
        return print_json(&value);
    }

    println!("Host:    {}", resolved.host);
    println!("Address: {}", resolved.address);
    println!("User:    {}", resolved.user);
    println!("Method:  {}", resolved.method);
    if !resolved.prefix.is_empty() {
        println!("Prefix:  {}", resolved.prefix);
    }
    println!();
    print_table(
        &["ACTION", "ALLOWED", "REASON"],
        actions
            .into_iter()
            .map(|(kind, denial)| match denial {
                None => vec![kind, "yes".to_string(), String::new()],
                Some(reason) => vec![kind, "no".to_string(), reason],
            })
            .collect(),
    );
    Ok(())
}
