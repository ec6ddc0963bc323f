use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use telemetry_store::catalog::{SchemaCatalog, VariableCatalog};
use telemetry_store::{import_run, ContainerStore, StoreConfig};

#[derive(Parser)]
#[command(name = "telemetry-import")]
#[command(about = "Decode a raw bus log and store it as a run container")]
struct Cli {
    /// JSON store configuration. Defaults come from the environment.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run identifier; the container is written as `{run_id}.h5`
    #[arg(long)]
    run_id: u64,

    /// Raw log (.csv or .csv.gz). Defaults to the uploaded log for the run.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Schema catalog (.dbc or .json). Overrides the configured one.
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Variable catalog: JSON array of {id, name, description, units}
    #[arg(long)]
    variables: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StoreConfig::from_env()?,
    };
    let schema_path = cli
        .schema
        .or_else(|| config.schema_path.clone())
        .context("no schema catalog given (--schema or DBC)")?;
    let schema = SchemaCatalog::load(&schema_path)
        .with_context(|| format!("loading schema {}", schema_path.display()))?;
    let variables = VariableCatalog::load(&cli.variables)
        .with_context(|| format!("loading variables {}", cli.variables.display()))?;

    let store = ContainerStore::new(config);
    let input = match cli.input {
        Some(path) => path,
        None => store.resolve_input(cli.run_id)?,
    };

    let mut progress = |fraction: f64| log::info!("progress {:.1}%", fraction * 100.0);
    let summary = import_run(
        &store,
        &input,
        cli.run_id,
        &schema,
        &variables,
        &mut progress,
    )?;
    println!(
        "run {}: {} rows x {} variables, {}..{}",
        summary.run_id, summary.rows, summary.columns, summary.start, summary.end
    );
    Ok(())
}
