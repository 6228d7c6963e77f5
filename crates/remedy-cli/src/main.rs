mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    config::ConfigSubcommand, cooldown::CooldownSubcommand, escalation::EscalationSubcommand,
    run::RunArgs,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "remedy",
    about = "Policy-gated incident remediation with tier, access and cooldown checks",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .remedy/ or .git/)
    #[arg(long, global = true, env = "REMEDY_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize .remedy/ with a starter config and host map
    Init,

    /// Validate the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Show the effective per-action policy table
    Policy,

    /// Resolve a host through the access map
    Resolve {
        /// Host id from hosts.yaml
        host: String,
    },

    /// Run one remediation through the orchestrator
    Run(RunArgs),

    /// Inspect cooldown windows
    Cooldown {
        #[command(subcommand)]
        subcommand: CooldownSubcommand,
    },

    /// Inspect the execution audit trail
    Audit {
        /// Only records for this incident
        #[arg(long)]
        incident: Option<String>,
    },

    /// Inspect escalation tickets
    Escalation {
        #[command(subcommand)]
        subcommand: EscalationSubcommand,
    },

    /// Close remediations left in flight by a crashed process
    Recover {
        /// Only incidents idle for at least this many seconds
        #[arg(long, default_value = "3600")]
        max_age_secs: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run(_) | Commands::Recover { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Policy => cmd::policy::run(&root, cli.json),
        Commands::Resolve { host } => cmd::resolve::run(&root, &host, cli.json),
        Commands::Run(args) => cmd::run::run(&root, args, cli.json),
        Commands::Cooldown { subcommand } => cmd::cooldown::run(&root, subcommand, cli.json),
        Commands::Audit { incident } => cmd::audit::run(&root, incident.as_deref(), cli.json),
        Commands::Escalation { subcommand } => cmd::escalation::run(&root, subcommand, cli.json),
        Commands::Recover { max_age_secs } => cmd::recover::run(&root, max_age_secs, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
