mod cmd;
mod config_path;
mod output;
mod plan;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "serialq",
    about = "Run job plans through a priority-ordered, single-worker queue",
    version,
    propagate_version = true
)]
struct Cli {
    /// Queue config file (default: nearest serialq.yaml, else built-in defaults)
    #[arg(long, global = true, env = "SERIALQ_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit every job in a plan, drain the queue, report execution order
    Run {
        /// Path to the YAML job plan
        plan: PathBuf,

        /// Capture submitter backtraces (overrides the config's `debug`)
        #[arg(long)]
        debug: bool,
    },

    /// Inspect and validate the queue configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let explicit = cli.config.as_deref();

    let result = match cli.command {
        Commands::Run { plan, debug } => {
            let path = config_path::resolve_config(explicit, &cwd);
            cmd::config::load(path.as_deref())
                .and_then(|config| cmd::run::run(&plan, config, debug, cli.json))
        }
        Commands::Config {
            subcommand: subcommand @ ConfigSubcommand::Init { .. },
        } => cmd::config::run(explicit, subcommand, cli.json),
        Commands::Config { subcommand } => {
            let path = config_path::resolve_config(explicit, &cwd);
            cmd::config::run(path.as_deref(), subcommand, cli.json)
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
