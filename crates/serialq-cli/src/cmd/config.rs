use std::path::Path;

use anyhow::Context;
use clap::Subcommand;
use serialq_core::config::{QueueConfig, WarnLevel, CONFIG_FILE};

use crate::output::print_json;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective queue configuration
    Show,

    /// Validate the config for common mistakes
    Validate,

    /// Write a default serialq.yaml in the current directory
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn run(path: Option<&Path>, subcommand: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcommand {
        ConfigSubcommand::Show => show(path, json),
        ConfigSubcommand::Validate => validate(path, json),
        ConfigSubcommand::Init { force } => init(path, force),
    }
}

pub fn load(path: Option<&Path>) -> anyhow::Result<QueueConfig> {
    match path {
        Some(p) => QueueConfig::load(p)
            .with_context(|| format!("failed to load config {}", p.display())),
        None => Ok(QueueConfig::default()),
    }
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = load(path)?;
    if json {
        print_json(&config)?;
    } else {
        match path {
            Some(p) => println!("# {}", p.display()),
            None => println!("# built-in defaults"),
        }
        print!("{}", serde_yaml::to_string(&config)?);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = load(path)?;
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

fn init(path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let target = path.map(Path::to_path_buf).unwrap_or_else(|| CONFIG_FILE.into());
    if target.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", target.display());
    }
    QueueConfig::default()
        .save(&target)
        .with_context(|| format!("failed to write {}", target.display()))?;
    println!("Wrote {}", target.display());
    Ok(())
}
