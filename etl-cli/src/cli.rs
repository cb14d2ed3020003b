use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use inquire::{CustomType, Password, PasswordDisplayMode, Select, Text};
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info, instrument::WithSubscriber};
use weather_etl_core::{
    ActivityLog, Config, FlatRecord, LoadResult, Pipeline, RunOutcome, Units, WriteMode,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "weather-etl",
    version,
    about = "Fetch the current weather and load it into a CSV archive and a SQLite table"
)]
pub struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactively store the API key, location and load targets.
    Configure,

    /// Fetch, normalize and load one observation.
    Run(RunArgs),

    /// Fetch and normalize one observation and print it. Nothing is written.
    Fetch(SourceArgs),
}

#[derive(Debug, Args)]
pub struct SourceArgs {
    /// OpenWeather API key; overrides the config file and WEATHER_ETL_API_KEY.
    #[arg(long)]
    pub api_key: Option<String>,

    /// Override the API URL.
    #[arg(long)]
    pub endpoint: Option<String>,

    #[arg(long, allow_hyphen_values = true)]
    pub lat: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    pub lon: Option<f64>,

    /// standard (Kelvin), metric or imperial.
    #[arg(long)]
    pub units: Option<String>,

    /// Attempts per network or database call; 1 disables retries.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Directory for the run's log file.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Archive CSV path.
    #[arg(long)]
    pub archive: Option<PathBuf>,

    /// append or replace.
    #[arg(long)]
    pub archive_mode: Option<String>,

    /// SQLite database path.
    #[arg(long)]
    pub database: Option<String>,

    /// Destination table.
    #[arg(long)]
    pub table: Option<String>,

    /// Table write mode: append or replace.
    #[arg(long)]
    pub mode: Option<String>,
}

impl SourceArgs {
    fn apply(&self, cfg: &mut Config) -> anyhow::Result<()> {
        if let Some(key) = &self.api_key {
            cfg.source.api_key = Some(key.clone());
        }
        if let Some(endpoint) = &self.endpoint {
            cfg.source.endpoint = endpoint.clone();
        }
        if let Some(lat) = self.lat {
            cfg.source.latitude = lat;
        }
        if let Some(lon) = self.lon {
            cfg.source.longitude = lon;
        }
        if let Some(units) = &self.units {
            cfg.source.units = Units::try_from(units.as_str())?;
        }
        if let Some(max_attempts) = self.max_attempts {
            cfg.retry.max_attempts = max_attempts;
        }
        if let Some(dir) = &self.log_dir {
            cfg.log.dir = dir.clone();
        }
        Ok(())
    }
}

impl RunArgs {
    fn apply(&self, cfg: &mut Config) -> anyhow::Result<()> {
        self.source.apply(cfg)?;

        if let Some(path) = &self.archive {
            cfg.archive.path = path.clone();
        }
        if let Some(mode) = &self.archive_mode {
            cfg.archive.mode = WriteMode::try_from(mode.as_str())?;
        }
        if let Some(database) = &self.database {
            cfg.table.database = database.clone();
        }
        if let Some(table) = &self.table {
            cfg.table.name = table.clone();
        }
        if let Some(mode) = &self.mode {
            cfg.table.mode = WriteMode::try_from(mode.as_str())?;
        }
        Ok(())
    }
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<ExitCode> {
        match &self.command {
            Command::Configure => self.configure(),
            Command::Run(args) => {
                let mut cfg = self.load_config()?;
                args.apply(&mut cfg)?;
                run_pipeline(&cfg).await
            }
            Command::Fetch(args) => {
                let mut cfg = self.load_config()?;
                args.apply(&mut cfg)?;
                fetch_only(&cfg).await
            }
        }
    }

    fn load_config(&self) -> anyhow::Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };
        cfg.apply_env();
        Ok(cfg)
    }

    fn configure(&self) -> anyhow::Result<ExitCode> {
        let mut cfg = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };

        let api_key = Password::new("OpenWeather API key (leave empty to keep the current one):")
            .without_confirmation()
            .with_display_mode(PasswordDisplayMode::Masked)
            .prompt()?;
        if !api_key.trim().is_empty() {
            cfg.source.api_key = Some(api_key.trim().to_string());
        }

        cfg.source.latitude = CustomType::<f64>::new("Latitude:")
            .with_default(cfg.source.latitude)
            .prompt()?;
        cfg.source.longitude = CustomType::<f64>::new("Longitude:")
            .with_default(cfg.source.longitude)
            .prompt()?;
        cfg.table.database = Text::new("SQLite database:")
            .with_default(&cfg.table.database)
            .prompt()?;
        cfg.table.name = Text::new("Table name:")
            .with_default(&cfg.table.name)
            .prompt()?;
        cfg.table.mode = Select::new(
            "Table write mode:",
            vec![WriteMode::Append, WriteMode::Replace],
        )
        .prompt()?;

        let path = match &self.config {
            Some(path) => {
                cfg.save_to(path)?;
                path.clone()
            }
            None => cfg.save()?,
        };
        println!("Configuration saved to {}", path.display());

        Ok(ExitCode::SUCCESS)
    }
}

fn open_log(cfg: &Config) -> anyhow::Result<ActivityLog> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cfg.log.level.clone());
    ActivityLog::open(&cfg.log.dir, &filter).context("Failed to set up the activity log")
}

/// Build the pipeline, recording a configuration error in the activity log.
fn build_pipeline(cfg: &Config, log: &ActivityLog) -> anyhow::Result<Pipeline> {
    Pipeline::from_config(cfg).inspect_err(|err| {
        tracing::dispatcher::with_default(log.dispatch(), || {
            error!(error = %format!("{err:#}"), "invalid configuration")
        })
    })
}

async fn run_pipeline(cfg: &Config) -> anyhow::Result<ExitCode> {
    let log = open_log(cfg)?;
    let pipeline = build_pipeline(cfg, &log)?;

    let outcome = async {
        info!("run started");
        let outcome = pipeline.run().await;
        match &outcome {
            RunOutcome::Failed(err) => {
                error!(stage = %err.stage(), error = %err, "run finished: failed")
            }
            RunOutcome::PartiallyFailed { .. } => info!("run finished: partially failed"),
            RunOutcome::Succeeded { .. } => info!("run finished: succeeded"),
        }
        outcome
    }
    .with_subscriber(log.dispatch().clone())
    .await;

    report(cfg, &outcome);
    Ok(ExitCode::from(outcome.exit_code()))
}

async fn fetch_only(cfg: &Config) -> anyhow::Result<ExitCode> {
    let log = open_log(cfg)?;
    let pipeline = build_pipeline(cfg, &log)?;

    let extracted = pipeline
        .extract()
        .with_subscriber(log.dispatch().clone())
        .await;

    match extracted {
        Ok(record) => {
            print_record(&record);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("Failed while {}: {err}", err.stage());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn report(cfg: &Config, outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Succeeded { record } => {
            print_record(record);
            println!(
                "Data saved to \"{}\" and table {} in {}.",
                cfg.archive.path.display(),
                cfg.table.name,
                cfg.table.database
            );
        }
        RunOutcome::PartiallyFailed { record, load } => {
            print_record(record);
            report_partial(load);
        }
        RunOutcome::Failed(err) => {
            eprintln!("Failed while {}: {err}", err.stage());
            eprintln!("Nothing was written to the archive or the table.");
        }
    }
}

fn report_partial(load: &LoadResult) {
    match (&load.archive, &load.table) {
        (Ok(()), Err(err)) => {
            eprintln!("Archive written, table load failed: {err}");
            eprintln!("Only the table load needs to be retried.");
        }
        (Err(err), Ok(())) => {
            eprintln!("Table loaded, archive write failed: {err}");
            eprintln!("Only the archive write needs to be retried.");
        }
        _ => {}
    }
}

fn print_record(record: &FlatRecord) {
    let width = FlatRecord::COLUMNS
        .iter()
        .map(|column| column.len())
        .max()
        .unwrap_or(0);

    println!("\nWeather observation:");
    for (column, value) in record.display_pairs() {
        println!("  {column:<width$}  {value}");
    }
}
