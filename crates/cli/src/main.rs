use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use runbook_engine::{RootScene, RootSceneOptions};
use tracing::Level;

/// Runs a playbook of declarative steps.
#[derive(Debug, Parser)]
#[command(name = "runbook", version, about)]
struct Cli {
    /// Playbook file: YAML source or a compiled `.rbc` artifact.
    file: PathBuf,

    /// External variables file (YAML or JSON), overriding the manifest's
    /// `vars_file`.
    #[arg(long)]
    vars_file: Option<PathBuf>,

    /// Password for opening a compiled artifact.
    #[arg(long)]
    password: Option<String>,

    /// Suppress the step-result dump on stdout.
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let options = RootSceneOptions {
        password: cli.password,
        vars_file: cli.vars_file,
        ..RootSceneOptions::default()
    };
    let root = RootScene::from_path(&cli.file, options)?;
    let outcome = root.execute().await;
    root.dispose().await;

    let results = outcome?;
    if !cli.quiet {
        print!("{}", serde_yaml::to_string(&results)?);
    }
    Ok(())
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .try_init();
}
