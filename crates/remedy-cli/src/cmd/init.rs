use anyhow::Context;
use remedy_core::{config::Config, io, paths};
use std::path::Path;

const HOSTS_TEMPLATE: &str = "\
# Host access map: host id -> connection parameters.
# method is root, sudo or limited. Limited hosts only accept read-only
# actions such as inspect_logs.
hosts:
  localhost:
    address: 127.0.0.1
    user: root
    method: root
";

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing remedy in: {}", root.display());

    let dir = paths::remedy_dir(root);
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    if paths::config_path(root).exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
    } else {
        Config::new()
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    }

    let hosts = paths::hosts_path(root);
    if io::write_if_missing(&hosts, HOSTS_TEMPLATE.as_bytes()).context("failed to write hosts.yaml")? {
        println!("  created: {}", paths::HOSTS_FILE);
    } else {
        println!("  exists:  {}", paths::HOSTS_FILE);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use remedy_core::access::AccessMap;

    #[test]
    fn hosts_template_parses() {
        let map = AccessMap::from_yaml(HOSTS_TEMPLATE).unwrap();
        assert!(map.resolve("localhost").unwrap().executable);
    }
}
