use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use mgscryer::config::ConfigLoader;
use mgscryer::domain::EntityKind;
use mgscryer::ena::EnaHttpClient;
use mgscryer::error::ScryerError;
use mgscryer::output::{JsonOutput, LogSink, OutputMode};
use mgscryer::store::SqliteStore;
use mgscryer::sync::{SyncDriver, SyncSummary};

#[derive(Parser)]
#[command(name = "mgscryer")]
#[command(about = "Mirror ENA metagenome study, sample and run metadata into SQLite")]
#[command(version, author)]
struct Cli {
    /// SQLite database to create or update.
    database: Utf8PathBuf,

    /// Print the pass summary as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ScryerError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ScryerError) -> u8 {
    match error {
        ScryerError::ConfigRead(_)
        | ScryerError::ConfigParse(_)
        | ScryerError::UnsupportedSchema(_) => 2,
        ScryerError::EnaHttp(_) | ScryerError::EnaStatus { .. } => 3,
        ScryerError::Database(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let config = ConfigLoader::resolve(None)?;
    let store = SqliteStore::open(&cli.database)?;
    let client = EnaHttpClient::new(&config)?;
    let mut driver = SyncDriver::new(config, store, client.clone(), client);

    match output_mode {
        OutputMode::Json => {
            let summary = driver.run(&JsonOutput)?;
            JsonOutput::print_summary(&summary).into_diagnostic()?;
        }
        OutputMode::Human => {
            let summary = driver.run(&LogSink)?;
            print_summary(&cli.database, &summary);
        }
    }
    Ok(())
}

fn print_summary(database: &Utf8Path, summary: &SyncSummary) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}mgscryer summary ({database}){reset}");
    println!(
        "  watermark: {} -> {}",
        summary.previous_watermark.as_deref().unwrap_or("none"),
        summary.watermark
    );
    for partition in &summary.partitions {
        let ending = match &partition.malformed_page {
            Some(_) => format!("{yellow}stopped on malformed page{reset}"),
            None => "complete".to_string(),
        };
        println!(
            "  {}: {} pages, {} records, {} skipped, {} links, {ending}",
            partition.partition,
            partition.pages,
            partition.records,
            partition.skipped,
            partition.links_created
        );
    }
    for kind in EntityKind::all() {
        let counts = summary.total(kind);
        println!(
            "  {green}{:<12}{reset} new {:>7}  updated {:>7}  unchanged {:>7}  stale {:>7}",
            kind.table(),
            counts.new,
            counts.updated,
            counts.unchanged,
            counts.stale
        );
    }
    println!("  publications linked: {}", summary.publications_linked);
    let failures = summary.failure_count();
    if failures > 0 {
        println!("{yellow}  failures: {failures} (see log){reset}");
    }
}
