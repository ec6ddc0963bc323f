use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use telemetry_store::catalog::VariableCatalog;
use telemetry_store::query::{http_date, write_csv, write_json};
use telemetry_store::{ContainerStore, QueryOutcome, RangeMerger, RangeQuery, StoreConfig};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Csv,
}

#[derive(Parser)]
#[command(name = "telemetry-query")]
#[command(about = "Stream stored telemetry for a time range")]
struct Cli {
    /// JSON store configuration. Defaults come from the environment.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Variable catalog: JSON array of {id, name, description, units}
    #[arg(long)]
    variables: PathBuf,

    /// Range start (epoch ms or RFC 3339), inclusive
    #[arg(long)]
    start: String,

    /// Range end (epoch ms or RFC 3339), exclusive
    #[arg(long)]
    end: String,

    /// Variable ids to project, comma separated. Omit to list the variables
    /// stored in the range.
    #[arg(long, value_delimiter = ',')]
    ids: Vec<i32>,

    #[arg(long, value_enum, default_value = "json")]
    format: Format,

    /// Previous Last-Modified value
    #[arg(long)]
    if_modified_since: Option<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StoreConfig::from_env()?,
    };
    let catalog = VariableCatalog::load(&cli.variables)
        .with_context(|| format!("loading variables {}", cli.variables.display()))?;
    let start = parse_instant(&cli.start)?;
    let end = parse_instant(&cli.end)?;
    if end < start {
        bail!("range end {end} precedes start {start}");
    }

    let store = ContainerStore::new(config);
    let runs = store.spans()?;
    let merger = RangeMerger::new(&store);

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    if cli.ids.is_empty() {
        for id in merger.variables_in_range(&runs, start, end)? {
            match catalog.by_id(id) {
                Some(var) => writeln!(out, "{id}\t{}", var.name)?,
                None => writeln!(out, "{id}")?,
            }
        }
        out.flush()?;
        return Ok(());
    }

    let query = RangeQuery {
        start,
        end,
        variables: catalog.resolve(&cli.ids),
    };
    let plan = merger.plan(&runs, query)?;
    let variables = plan.variables().to_vec();
    match plan.respond(cli.if_modified_since.as_deref()) {
        QueryOutcome::NotModified { last_modified } => {
            eprintln!("304 Not Modified (Last-Modified: {})", http_date(last_modified));
        }
        QueryOutcome::Records {
            last_modified,
            stream,
        } => {
            eprintln!("Last-Modified: {}", http_date(last_modified));
            let count = match cli.format {
                Format::Json => write_json(&mut out, stream)?,
                Format::Csv => write_csv(&mut out, &variables, stream)?,
            };
            writeln!(out)?;
            out.flush()?;
            log::info!("streamed {count} records");
        }
    }
    Ok(())
}

fn parse_instant(value: &str) -> Result<i64> {
    if let Ok(ms) = value.parse::<i64>() {
        return Ok(ms);
    }
    let at = OffsetDateTime::parse(value, &Rfc3339)
        .with_context(|| format!("{value:?} is neither epoch ms nor RFC 3339"))?;
    Ok((at.unix_timestamp_nanos() / 1_000_000) as i64)
}
