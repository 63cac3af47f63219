//! One refresh cycle: raw snapshots → engine → artifacts on disk.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use tracing::info;

use countyval_recon::config::Layout;
use countyval_recon::engine::{load_narrow_rows, load_wide_grid, write_grid_csv};
use countyval_recon::{Grid, ReconConfig, ReconError, ReconInput, ReconResult, SourceTable};

use crate::cache::{write_atomic, CacheStatus, RawCache};
use crate::exit_codes::{recon_exit_code, EXIT_RECON_INVALID_CONFIG};
use crate::fetch::FetchClient;
use crate::CliError;

pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the config's `end`.
    pub end: Option<NaiveDate>,
    /// Re-fetch every source regardless of cache age.
    pub force: bool,
}

#[derive(Debug)]
pub struct CycleReport {
    pub result: ReconResult,
    pub output_dir: PathBuf,
    pub artifacts: Vec<PathBuf>,
    pub fetched: Vec<String>,
    pub reused: Vec<String>,
}

pub fn recon_err(err: ReconError) -> CliError {
    let hint = match &err {
        ReconError::MissingColumn { .. } => {
            Some("check the layout column names against the source header".to_string())
        }
        ReconError::Format { .. } => Some("check the source's date_format".to_string()),
        ReconError::ShapeMismatch(_) => {
            Some("every input grid must cover the same regions and dates".to_string())
        }
        _ => None,
    };
    CliError { code: recon_exit_code(&err), message: err.to_string(), hint }
}

/// Read and validate a `.countyval.toml` file.
pub fn load_config(path: &Path) -> Result<ReconConfig, CliError> {
    let text = fs::read_to_string(path).map_err(|e| CliError {
        code: EXIT_RECON_INVALID_CONFIG,
        message: format!("failed to read {}: {e}", path.display()),
        hint: None,
    })?;
    ReconConfig::from_toml(&text).map_err(recon_err)
}

/// Resolve a config-relative directory. Absolute paths pass through.
pub fn resolve_dir(config_path: &Path, dir: &str) -> PathBuf {
    let dir = Path::new(dir);
    if dir.is_absolute() {
        return dir.to_path_buf();
    }
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(dir)
}

/// Fetch (or reuse) every source, reconcile, and write artifacts.
pub fn run_cycle(
    config_path: &Path,
    config: &ReconConfig,
    options: &RunOptions,
    today: NaiveDate,
) -> Result<CycleReport, CliError> {
    let mut config = config.clone();
    if let Some(end) = options.end {
        config.end = Some(end);
    }

    let cache = RawCache::new(
        resolve_dir(config_path, &config.cache_dir),
        Duration::from_secs(config.refresh_interval_hours * 3600),
    );

    let client = FetchClient::new()?;
    let mut bodies: HashMap<String, String> = HashMap::new();
    let mut fetched = Vec::new();
    let mut reused = Vec::new();
    let mut input = ReconInput::default();

    for (name, source) in &config.sources {
        // Sources sharing a raw file fetch it once per cycle
        if !bodies.contains_key(&source.raw) {
            let (body, status) = cache.load_or_fetch(&source.raw, options.force, || {
                client.fetch_text(name, &source.url)
            })?;
            match status {
                CacheStatus::Fetched => fetched.push(name.clone()),
                CacheStatus::Fresh => reused.push(name.clone()),
            }
            bodies.insert(source.raw.clone(), body);
        }

        let body = &bodies[&source.raw];
        let table = match &source.layout {
            Layout::Narrow(cols) => {
                SourceTable::Narrow(load_narrow_rows(name, body, cols).map_err(recon_err)?)
            }
            Layout::Wide(cols) => {
                SourceTable::Wide(load_wide_grid(name, body, cols).map_err(recon_err)?)
            }
        };
        input.sources.insert(name.clone(), table);
    }

    let result = countyval_recon::run(&config, &input, today).map_err(recon_err)?;

    let output_dir = resolve_dir(config_path, &config.output_dir);
    let artifacts = write_artifacts(&result, &output_dir, &config.output.unknown_marker)?;

    info!(
        config = %config.name,
        end = %result.meta.end,
        fetched = fetched.len(),
        reused = reused.len(),
        artifacts = artifacts.len(),
        "refresh complete"
    );

    Ok(CycleReport { result, output_dir, artifacts, fetched, reused })
}

/// Write every per-metric grid and `summary.json` into `dir`.
pub fn write_artifacts(
    result: &ReconResult,
    dir: &Path,
    unknown_marker: &str,
) -> Result<Vec<PathBuf>, CliError> {
    let mut written = Vec::new();

    for (metric, metric_result) in &result.metrics {
        let mut grids: Vec<(String, &Grid)> = vec![
            (format!("{metric}_wide.csv"), &metric_result.consensus),
            (format!("{metric}_valid.csv"), &metric_result.validity),
        ];
        for (source, grid) in metric_result.sources.iter().zip(&metric_result.source_grids) {
            grids.push((format!("{metric}_{source}.csv"), grid));
        }

        for (file_name, grid) in grids {
            let path = dir.join(file_name);
            write_grid_file(grid, &path, unknown_marker)?;
            written.push(path);
        }
    }

    let json = serde_json::to_string_pretty(result)
        .map_err(|e| CliError::io(format!("failed to serialize summary: {e}")))?;
    let summary_path = dir.join(SUMMARY_FILE);
    write_atomic(&summary_path, json.as_bytes())?;
    written.push(summary_path);

    Ok(written)
}

pub fn write_grid_file(grid: &Grid, path: &Path, unknown_marker: &str) -> Result<(), CliError> {
    let mut buf = Vec::new();
    write_grid_csv(grid, &mut buf, unknown_marker).map_err(recon_err)?;
    write_atomic(path, &buf)
}
