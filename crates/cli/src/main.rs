// countyval - multi-source county case/death reconciliation

mod cache;
mod exit_codes;
mod fetch;
mod refresh;
mod schedule;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use countyval_recon::engine::load_grid_csv;
use countyval_recon::{reconcile, Grid, ReconConfig};

use exit_codes::{EXIT_ERROR, EXIT_RECON_IO, EXIT_SUCCESS, EXIT_USAGE};
use refresh::{load_config, recon_err, run_cycle, write_grid_file, RunOptions};
use schedule::{CancelToken, Scheduler};

#[derive(Parser)]
#[command(name = "countyval")]
#[command(about = "Reconcile county COVID-19 case and death counts across sources")]
#[command(version)]
struct Cli {
    /// Log engine and fetch detail (same as RUST_LOG=countyval=debug)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one refresh cycle: fetch stale sources, reconcile, write artifacts
    #[command(after_help = "\
Examples:
  countyval run county.countyval.toml
  countyval run county.countyval.toml --end 2020-03-18
  countyval run county.countyval.toml --force --json > summary.json")]
    Run {
        /// Path to the .countyval.toml config file
        config: PathBuf,

        /// Last date column (YYYY-MM-DD); overrides the config's end
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Re-fetch every source even when the cached snapshot is fresh
        #[arg(long)]
        force: bool,

        /// Print the run summary as JSON to stdout
        #[arg(long)]
        json: bool,
    },

    /// Refresh on the config's interval until stopped
    #[command(after_help = "\
Examples:
  countyval watch county.countyval.toml
  countyval watch county.countyval.toml --max-cycles 1 --force")]
    Watch {
        /// Path to the .countyval.toml config file
        config: PathBuf,

        /// Stop after this many cycles
        #[arg(long)]
        max_cycles: Option<u64>,

        /// Re-fetch every source on every cycle
        #[arg(long)]
        force: bool,
    },

    /// Validate a config without fetching anything
    #[command(after_help = "\
Examples:
  countyval validate county.countyval.toml")]
    Validate {
        /// Path to the .countyval.toml config file
        config: PathBuf,
    },

    /// Reconcile already-aligned grid CSVs (County,State,<dates...>)
    #[command(after_help = "\
Examples:
  countyval reconcile cases_nyt.csv cases_usa_facts.csv --out cases_wide.csv --validity cases_valid.csv")]
    Reconcile {
        /// Grid CSVs, one per source
        #[arg(required = true)]
        grids: Vec<PathBuf>,

        /// Consensus grid output
        #[arg(long)]
        out: PathBuf,

        /// Validity grid output
        #[arg(long)]
        validity: PathBuf,

        /// Text that marks an unknown cell, on input and output
        #[arg(long, default_value = "")]
        unknown_marker: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run { config, end, force, json } => cmd_run(config, end, force, json),
        Commands::Watch { config, max_cycles, force } => cmd_watch(config, max_cycles, force),
        Commands::Validate { config } => cmd_validate(config),
        Commands::Reconcile { grids, out, validity, unknown_marker } => {
            cmd_reconcile(grids, out, validity, unknown_marker)
        }
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

/// Logs go to stderr so `--json` output on stdout stays clean.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "countyval=debug,countyval_recon=debug"
    } else {
        "countyval=info,countyval_recon=warn"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_RECON_IO, message: msg.into(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

// ============================================================================
// run
// ============================================================================

fn cmd_run(
    config_path: PathBuf,
    end: Option<NaiveDate>,
    force: bool,
    json: bool,
) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let options = RunOptions { end, force };
    let report = run_cycle(&config_path, &config, &options, today())?;

    if json {
        let json_str = serde_json::to_string_pretty(&report.result)
            .map_err(|e| CliError::io(format!("JSON serialization error: {e}")))?;
        println!("{json_str}");
    }

    // Human summary to stderr
    let meta = &report.result.meta;
    eprintln!(
        "{}: {} .. {} ({} fetched, {} cached)",
        meta.config_name,
        meta.epoch,
        meta.end,
        report.fetched.len(),
        report.reused.len(),
    );
    for (metric, m) in &report.result.metrics {
        let s = &m.summary;
        let mean = s
            .mean_validity
            .map(|v| format!("{v:.3}"))
            .unwrap_or_else(|| "-".into());
        eprintln!(
            "{metric}: {} source(s), {} regions: {} unanimous, {} split, {} no agreement, {} unknown (mean validity {mean})",
            m.sources.len(),
            s.regions,
            s.unanimous_cells,
            s.split_cells,
            s.no_agreement_cells,
            s.unknown_cells,
        );
    }
    eprintln!("wrote {} file(s) to {}", report.artifacts.len(), report.output_dir.display());

    Ok(())
}

// ============================================================================
// watch
// ============================================================================

fn cmd_watch(config_path: PathBuf, max_cycles: Option<u64>, force: bool) -> Result<(), CliError> {
    if max_cycles == Some(0) {
        return Err(CliError::args("--max-cycles must be at least 1"));
    }

    // Fail fast on a broken config; later cycles re-read it
    let config = load_config(&config_path)?;
    let token = CancelToken::new();
    let scheduler = Scheduler::new(refresh_interval(&config), max_cycles, token.clone());

    let options = RunOptions { end: None, force };
    let mut config_error: Option<CliError> = None;
    let stats = scheduler.run(|_, interval| {
        // Source failures are retried next cycle; a config that stopped
        // loading is not
        let config = match load_config(&config_path) {
            Ok(config) => config,
            Err(e) => {
                token.cancel();
                config_error = Some(CliError {
                    code: e.code,
                    message: e.message.clone(),
                    hint: Some("watch stopped; fix the config and restart".into()),
                });
                return Err(e);
            }
        };
        *interval = refresh_interval(&config);
        run_cycle(&config_path, &config, &options, today()).map(|_| ())
    });

    eprintln!("{} cycle(s): {} ok, {} failed", stats.cycles(), stats.succeeded, stats.failed);
    if let Some(e) = config_error {
        return Err(e);
    }
    if stats.succeeded == 0 && stats.failed > 0 {
        return Err(CliError {
            code: EXIT_ERROR,
            message: format!("all {} cycle(s) failed", stats.failed),
            hint: Some("run with -v or RUST_LOG=countyval=debug for details".into()),
        });
    }
    Ok(())
}

fn refresh_interval(config: &ReconConfig) -> Duration {
    Duration::from_secs(config.refresh_interval_hours * 3600)
}

// ============================================================================
// validate
// ============================================================================

fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let metrics: std::collections::BTreeSet<_> = config
        .sources
        .values()
        .flat_map(|s| s.layout.metrics())
        .collect();
    let metrics: Vec<&str> = metrics.iter().map(|m| m.as_str()).collect();

    eprintln!(
        "valid: '{}' with {} source(s) covering {} from {}",
        config.name,
        config.sources.len(),
        metrics.join(", "),
        config.epoch,
    );
    Ok(())
}

// ============================================================================
// reconcile
// ============================================================================

fn cmd_reconcile(
    inputs: Vec<PathBuf>,
    out: PathBuf,
    validity: PathBuf,
    unknown_marker: String,
) -> Result<(), CliError> {
    let mut grids: Vec<Grid> = Vec::with_capacity(inputs.len());
    for path in &inputs {
        let csv_data = fs::read_to_string(path).map_err(|e| {
            CliError::args(format!("cannot read {}: {e}", path.display()))
        })?;
        let source = path.display().to_string();
        grids.push(load_grid_csv(&source, &csv_data, &unknown_marker).map_err(recon_err)?);
    }

    let output = reconcile(&grids).map_err(|e| {
        recon_err(e).with_hint("inputs must be aligned grids, e.g. <metric>_<source>.csv from `countyval run`")
    })?;

    write_grid_file(&output.consensus, &out, &unknown_marker)?;
    write_grid_file(&output.validity, &validity, &unknown_marker)?;

    eprintln!(
        "reconciled {} grid(s): {} regions x {} dates",
        grids.len(),
        output.consensus.region_count(),
        output.consensus.date_count(),
    );
    Ok(())
}
