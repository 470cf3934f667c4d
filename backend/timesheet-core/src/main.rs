// src/main.rs
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use timesheet_core::{
    Clock, ComplianceEngine, EngineConfig, ExceptionEntry, Period, SystemClock, TempoClient,
};

#[derive(Parser, Debug)]
#[command(
    name = "timesheet-core",
    about = "Timesheet compliance checks and resumable bulk approvals against Tempo",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Bypass cached responses
    #[arg(long, global = true)]
    refresh: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate every active member of a team for one period
    Evaluate {
        team: String,
        /// YYYY-MM, YYYY-Www or YYYY-MM-DD..YYYY-MM-DD (default: current month)
        #[arg(long)]
        period: Option<String>,
        /// USER[:REASON], repeatable
        #[arg(long = "exempt", value_name = "USER[:REASON]")]
        exempt: Vec<String>,
    },
    /// Completion statistics for one user over trailing periods
    Trends {
        team: String,
        user: String,
        /// Most recent period of the window (default: current month)
        #[arg(long)]
        period: Option<String>,
        #[arg(long, default_value_t = 6)]
        periods: usize,
        /// USER[:REASON], applied to every period of the window
        #[arg(long = "exempt", value_name = "USER[:REASON]")]
        exempt: Vec<String>,
    },
    /// Show timesheet approval status for a team
    Approvals {
        team: String,
        #[arg(long)]
        period: Option<String>,
    },
    /// Show the account the API token authenticates as
    Whoami,
    /// List visible teams, marking the ones you lead
    Teams,
    /// Approve compliant timesheets; re-run with the same batch id to resume
    Approve {
        team: String,
        #[arg(long)]
        period: Option<String>,
        /// Defaults to approve-{team}-{period}
        #[arg(long)]
        batch_id: Option<String>,
        #[arg(long = "exempt", value_name = "USER[:REASON]")]
        exempt: Vec<String>,
    },
}

fn init_tracing() {
    let default_level = if std::env::var("DEBUG").map(|v| v == "1").unwrap_or(false) {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        // stdout carries the JSON result
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn resolve_period(raw: Option<&str>, clock: &dyn Clock) -> Result<Period> {
    match raw {
        Some(text) => Period::parse(text).with_context(|| format!("Invalid --period '{}'", text)),
        None => Period::month_of(clock.today()).context("Failed to derive current month"),
    }
}

fn parse_exemption(raw: &str, period: Period) -> Result<ExceptionEntry> {
    let (user, reason) = match raw.split_once(':') {
        Some((user, reason)) => (user.trim(), reason.trim()),
        None => (raw.trim(), "exempt"),
    };
    if user.is_empty() {
        bail!("Invalid --exempt '{}': user is empty", raw);
    }
    Ok(ExceptionEntry::new(user, period, reason))
}

fn exemptions_for(raw: &[String], periods: &[Period]) -> Result<Vec<ExceptionEntry>> {
    let mut exceptions = Vec::with_capacity(raw.len() * periods.len());
    for period in periods {
        for entry in raw {
            exceptions.push(parse_exemption(entry, *period)?);
        }
    }
    Ok(exceptions)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let config = EngineConfig::from_env().context("Failed to load configuration")?;
    let token = config
        .api_token
        .clone()
        .context("TIMESHEET_API_TOKEN is not set")?;
    let client = Arc::new(
        TempoClient::new(&config.base_url, &token, config.call_timeout())
            .context("Failed to create Tempo client")?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = ComplianceEngine::from_config(&config, client.clone(), clock.clone())
        .context("Failed to initialise engine")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight operations, no new dispatches");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::Evaluate {
            team,
            period,
            exempt,
        } => {
            let period = resolve_period(period.as_deref(), clock.as_ref())?;
            let exceptions = exemptions_for(&exempt, &[period])?;
            let verdicts = engine
                .evaluate_team(&team, &period, &exceptions, cli.refresh, &cancel)
                .await?;
            print_json(&verdicts)?;
        }
        Commands::Trends {
            team,
            user,
            period,
            periods,
            exempt,
        } => {
            let latest = resolve_period(period.as_deref(), clock.as_ref())?;
            let window = latest.trailing(periods)?;
            let exceptions = exemptions_for(&exempt, &window)?;
            let stats = engine
                .trends(&team, &user, &window, &exceptions, cli.refresh, &cancel)
                .await?;
            print_json(&stats)?;
        }
        Commands::Approvals { team, period } => {
            let period = resolve_period(period.as_deref(), clock.as_ref())?;
            let approvals = engine
                .approval_status(&team, &period, cli.refresh, &cancel)
                .await?;
            print_json(&approvals)?;
        }
        Commands::Whoami => {
            let me = client.myself().await.context("Failed to fetch current user")?;
            print_json(&me)?;
        }
        Commands::Teams => {
            let teams = client.teams().await.context("Failed to fetch teams")?;
            print_json(&teams)?;
        }
        Commands::Approve {
            team,
            period,
            batch_id,
            exempt,
        } => {
            let period = resolve_period(period.as_deref(), clock.as_ref())?;
            let exceptions = exemptions_for(&exempt, &[period])?;
            let batch_id = batch_id.unwrap_or_else(|| format!("approve-{}-{}", team, period));
            info!("Running approval batch {}", batch_id);
            let run = engine
                .approve_team(&batch_id, &team, &period, &exceptions, cli.refresh, &cancel)
                .await?;
            print_json(&run)?;
            let code = run.report.outcome.exit_code();
            if code != 0 {
                std::process::exit(code);
            }
        }
    }

    Ok(())
}
