use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::error;
use tracing_subscriber::EnvFilter;
use yellowcab_core::config::PipelineConfig;
use yellowcab_core::pipeline::LoadPlan;
use yellowcab_core::warehouse::DEFAULT_WINDOW_COLUMN;
use yellowcab_core::PipelineError;

mod commands;

/// Exit status asking the scheduler to retry the step later.
const EXIT_TEMPFAIL: u8 = 75;

#[derive(Parser, Debug)]
#[command(author, version, about = "NYC yellow taxi extract and load pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store the latest published month in the extraction bucket
    Extract {
        /// Reference date (defaults to today, UTC)
        #[arg(long)]
        today: Option<NaiveDate>,
        /// Also keep a copy of the extract in this directory
        #[arg(long)]
        save_to: Option<PathBuf>,
    },
    /// Archive every published month of a year
    Backfill {
        /// Defaults to the year of the previous month
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        today: Option<NaiveDate>,
    },
    /// Upload the Parquet files of a local directory to the archive bucket
    Archive {
        #[arg(long)]
        dir: PathBuf,
    },
    /// Load Parquet objects from a bucket into the warehouse table
    Load {
        /// Defaults to the archive bucket
        #[arg(long)]
        bucket: Option<String>,
        /// Load only this object
        #[arg(long)]
        key: Option<String>,
        #[command(flatten)]
        load: LoadArgs,
    },
    /// Extract the latest month and load it into the warehouse
    Run {
        #[arg(long)]
        today: Option<NaiveDate>,
        #[command(flatten)]
        load: LoadArgs,
    },
    /// Create the data mart database and tables
    Mart {
        /// Also insert the vendor and payment reference rows
        #[arg(long)]
        seed: bool,
    },
    /// Load the taxi zone lookup into dimension_zone
    Zones,
    /// Run the data-quality suite behind the mart gate
    Quality,
    /// Print dashboard figures from the data mart
    Dashboard(commands::dashboard::DashboardArgs),
}

#[derive(Args, Debug, Clone)]
struct LoadArgs {
    #[arg(long, value_enum, default_value_t = ModeArg::Append)]
    mode: ModeArg,
    /// Timestamp column bounding the replaced window
    #[arg(long, default_value = DEFAULT_WINDOW_COLUMN)]
    window_column: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ModeArg {
    Append,
    ReplaceWindow,
}

impl LoadArgs {
    fn plan(&self) -> LoadPlan {
        match self.mode {
            ModeArg::Append => LoadPlan::Append,
            ModeArg::ReplaceWindow => LoadPlan::ReplaceWindow {
                column: self.window_column.clone(),
            },
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let transient = is_transient(&err);
            error!(error = %format!("{err:#}"), transient, "command failed");
            eprintln!("error: {err:#}");
            if transient {
                ExitCode::from(EXIT_TEMPFAIL)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = PipelineConfig::from_env().context("invalid configuration")?;

    match cli.command {
        Command::Extract { today, save_to } => {
            commands::ingest::extract(&config, resolve_today(today), save_to.as_deref()).await
        }
        Command::Backfill { year, today } => {
            commands::ingest::backfill(&config, year, resolve_today(today)).await
        }
        Command::Archive { dir } => commands::ingest::archive(&config, &dir).await,
        Command::Load { bucket, key, load } => {
            commands::ingest::load(&config, bucket, key.as_deref(), &load.plan()).await
        }
        Command::Run { today, load } => {
            commands::ingest::run(&config, resolve_today(today), &load.plan()).await
        }
        Command::Mart { seed } => commands::mart::create(&config, seed).await,
        Command::Zones => commands::mart::zones(&config).await,
        Command::Quality => commands::mart::quality(&config).await,
        Command::Dashboard(args) => commands::dashboard::show(&config, &args).await,
    }
}

fn resolve_today(today: Option<NaiveDate>) -> NaiveDate {
    today.unwrap_or_else(|| chrono::Utc::now().date_naive())
}

fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<PipelineError>()
            .is_some_and(PipelineError::is_transient)
            || cause
                .downcast_ref::<yellowcab_bucket::BucketError>()
                .is_some_and(yellowcab_bucket::BucketError::is_transient)
    })
}
