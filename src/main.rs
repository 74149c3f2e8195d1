use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tabled::{settings::Style, Table, Tabled};
use tokio::sync::mpsc;

use pacers::config::AppConfig;
use pacers::error::PacingError;
use pacers::logging::{init_logging, LogLevel};
use pacers::models::{PacingPlan, RawPlan};
use pacers::plan::source::source_for;
use pacers::plan::{target_power, target_w_bal, window_around};
use pacers::reopt::{HttpReoptClient, ReoptClient};
use pacers::replay;
use pacers::runner::Runner;
use pacers::session::TickReport;
use pacers::zones::ZoneClassifier;

/// pacers - live pacing guide for virtual cycling races
///
/// Follows the athlete's telemetry against an optimal power plan, shows
/// the target power around the current position and asks the optimisation
/// service for a new plan when W′ balance drifts off course.
#[derive(Parser)]
#[command(name = "pacers")]
#[command(author = "pacers contributors")]
#[command(version = "0.1.0")]
#[command(about = "Live pacing guide for virtual cycling races", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay telemetry through a pacing session
    Run {
        /// Plan file or http(s) URL (defaults to refresh.source)
        #[arg(short, long)]
        plan: Option<String>,

        /// JSON-lines telemetry file, or - for stdin
        #[arg(short, long, default_value = "-")]
        telemetry: String,

        /// Print one JSON report per tick
        #[arg(long)]
        json: bool,

        /// Never ask for a new plan
        #[arg(long)]
        no_reopt: bool,

        /// Delay between ticks in milliseconds
        #[arg(long)]
        pace_ms: Option<u64>,
    },

    /// Print target power and W′ balance at a distance
    Lookup {
        /// Plan file
        #[arg(short, long)]
        plan: PathBuf,

        /// Distance in metres
        #[arg(short, long)]
        distance: f64,
    },

    /// Print the plan window around a distance with its power zones
    Window {
        /// Plan file
        #[arg(short, long)]
        plan: PathBuf,

        /// Distance in metres
        #[arg(short, long)]
        distance: f64,

        /// Functional threshold power in watts
        #[arg(short, long, default_value = "250")]
        ftp: f64,

        /// Points on each side (defaults to display.window_half)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        half: Option<u64>,
    },

    /// Ask the optimisation service for the initial plan
    Optimize {
        /// Service base URL (defaults to reoptimization.endpoint)
        #[arg(short, long)]
        endpoint: Option<String>,
    },

    /// Manage the configuration file
    Config {
        /// Write a default configuration file
        #[arg(long)]
        init: bool,

        /// Print the effective configuration
        #[arg(long)]
        show: bool,

        /// Print the configuration file path
        #[arg(long)]
        path: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(AppConfig::default_config_path);
    let mut config = match &cli.config {
        Some(path) if path.exists() => AppConfig::load_from_file(path)?,
        Some(_) => AppConfig::default(),
        None => AppConfig::load_or_default(),
    };

    if cli.verbose > 0 {
        config.logging.level = LogLevel::from_verbosity(cli.verbose);
    }
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Run {
            plan,
            telemetry,
            json,
            no_reopt,
            pace_ms,
        } => {
            if let Some(plan) = plan {
                config.refresh.source = plan;
            }
            if no_reopt {
                config.reoptimization.enabled = false;
            }
            let pace = pace_ms.map(Duration::from_millis);
            runtime()?.block_on(run_session(config, telemetry, json, pace))?;
        }

        Commands::Lookup { plan, distance } => {
            let plan = load_plan(&plan)?;
            let power = target_power(&plan, distance).map_err(explain)?;
            println!("{}", format!("Target at {:.1} m", distance).cyan().bold());
            println!("  Power: {:.0} W", power);
            match target_w_bal(&plan, distance) {
                Ok(w_bal) => println!("  W′ balance: {:.0} J", w_bal),
                Err(_) => println!("  W′ balance: {}", "not in plan".dimmed()),
            }
        }

        Commands::Window {
            plan,
            distance,
            ftp,
            half,
        } => {
            let plan = load_plan(&plan)?;
            let half = match half {
                Some(half) => usize::try_from(half).context("--half is too large")?,
                None => config.display.window_half,
            };
            print_window(&plan, distance, ftp, half)?;
        }

        Commands::Optimize { endpoint } => {
            let endpoint = endpoint.unwrap_or_else(|| config.reoptimization.endpoint.clone());
            println!("{}", "Requesting initial plan...".green().bold());
            println!("  Route: {}", config.athlete.route);
            let client =
                HttpReoptClient::new(endpoint, config.reoptimization.timeout()).map_err(explain)?;
            let response = runtime()?
                .block_on(client.run_optimization(&config.athlete))
                .map_err(explain)?;
            if response.is_success() {
                println!("{}", "✓ Plan published".green());
            } else {
                bail!("optimisation service answered {:?}", response.result);
            }
        }

        Commands::Config { init, show, path } => {
            if path {
                println!("{}", config_path.display());
            }
            if init {
                if config_path.exists() {
                    bail!("{} already exists", config_path.display());
                }
                AppConfig::default().save_to_file(&config_path)?;
                println!("{}", format!("✓ Wrote {}", config_path.display()).green());
            }
            if show || !(init || path) {
                print!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

/// Put the rider-facing message of a pacers error in front of its details
fn explain(e: impl Into<PacingError>) -> anyhow::Error {
    let e = e.into();
    let message = e.user_message();
    if message == e.to_string() {
        anyhow::Error::new(e)
    } else {
        anyhow::Error::new(e).context(message)
    }
}

fn load_plan(path: &Path) -> Result<PacingPlan> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
    let raw: RawPlan = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse plan file: {}", path.display()))?;
    PacingPlan::from_raw(&raw, 0.0).map_err(explain)
}

async fn run_session(
    config: AppConfig,
    telemetry: String,
    json: bool,
    pace: Option<Duration>,
) -> Result<()> {
    let client = Arc::new(
        HttpReoptClient::new(
            config.reoptimization.endpoint.clone(),
            config.reoptimization.timeout(),
        )
        .map_err(explain)?,
    );
    let source = source_for(&config.refresh.source);
    let reader = replay::open(&telemetry)
        .await
        .with_context(|| format!("Failed to open telemetry: {}", telemetry))?;

    let (tx, rx) = mpsc::channel(64);
    let feeder = tokio::spawn(replay::replay(reader, tx, pace));

    let summary = Runner::new(config, client)
        .run(source, rx, |report| print_report(report, json))
        .await;
    let stats = feeder.await??;

    if json {
        return Ok(());
    }
    println!();
    println!("{}", "Session summary".cyan().bold());
    println!("  Ticks: {}", summary.ticks);
    println!("  Skipped lines: {}", stats.skipped);
    println!("  Plans loaded: {}", summary.plan_loads);
    println!(
        "  Reoptimizations: {} ({} ok, {} failed)",
        summary.reopt_requests, summary.reopt_successes, summary.reopt_failures
    );
    Ok(())
}

fn print_report(report: &TickReport, json: bool) {
    if json {
        match serde_json::to_string(report) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::error!(error = %e, "Could not encode tick report"),
        }
        return;
    }

    let target = match report.target_power {
        Some(power) => format!("{:>4.0} W", power),
        None => "   - W".to_string(),
    };
    let deviation = match report.w_bal_deviation {
        Some(d) if d < 0.0 => format!("{:+.0}", d).red(),
        Some(d) => format!("{:+.0}", d).green(),
        None => "-".dimmed(),
    };

    let mut line = format!(
        "{:>9.1} m  {:>4.0} W  target {}  W′ {:>6.0} ({})",
        report.distance, report.power, target, report.w_bal, deviation
    );
    if let Some(pending) = &report.reopt {
        line.push_str(&format!(
            "  {}",
            format!("reoptimizing #{}", pending.request.state.attempt).yellow()
        ));
    }
    if report.athlete_changed {
        line.push_str(&format!("  {}", "new athlete".magenta()));
    }
    println!("{}", line);
}

#[derive(Tabled)]
struct WindowRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Distance (m)")]
    distance: String,
    #[tabled(rename = "Power (W)")]
    power: String,
    #[tabled(rename = "Zone")]
    zone: String,
    #[tabled(rename = "Color")]
    color: String,
}

fn print_window(plan: &PacingPlan, distance: f64, ftp: f64, half: usize) -> Result<()> {
    let window = match window_around(plan, distance, half).map_err(explain)? {
        Some(window) => window,
        None => {
            println!("{}", "Past the end of the plan".yellow());
            return Ok(());
        }
    };
    let zones = ZoneClassifier::classify_zones(&window.power, ftp).map_err(explain)?;

    let rows: Vec<WindowRow> = zones
        .iter()
        .enumerate()
        .map(|(i, zone)| WindowRow {
            index: window.start + i,
            distance: format!("{:.1}", window.distance[i]),
            power: format!("{:.0}", window.power[i]),
            zone: format!("{} {}", zone, zone.name()),
            color: zone.color().to_hex(),
        })
        .collect();

    println!(
        "{}",
        format!(
            "Plan window at {:.1} m ({} points from #{})",
            distance,
            window.len(),
            window.start
        )
        .cyan()
        .bold()
    );
    println!("{}", Table::new(rows).with(Style::rounded()));
    Ok(())
}
