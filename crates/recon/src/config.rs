use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ReconError;
use crate::grid::Metric;

pub const DEFAULT_EPOCH: &str = "2020-01-21";
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Maps every source identity to where it lives and how to read it.
///
/// Sources are kept in a `BTreeMap`, so every stage that walks them does so
/// in source-name order.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconConfig {
    pub name: String,
    /// First date column of every aligned grid.
    #[serde(default = "default_epoch")]
    pub epoch: NaiveDate,
    /// Last date column. Defaults to the run date.
    #[serde(default)]
    pub end: Option<NaiveDate>,
    /// Raw snapshots younger than this are reused instead of re-fetched.
    #[serde(default = "default_refresh_interval_hours")]
    pub refresh_interval_hours: u64,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default)]
    pub region_policy: RegionPolicy,
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

fn default_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 21).unwrap_or_default()
}

fn default_refresh_interval_hours() -> u64 {
    72
}

fn default_cache_dir() -> String {
    "raw".into()
}

fn default_output_dir() -> String {
    "validation".into()
}

/// How regions reported by only some sources are handled before consensus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionPolicy {
    /// Keep every region; sources missing it contribute unknown rows.
    #[default]
    Union,
    /// Keep only regions every source reports.
    Intersection,
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    /// File name of the raw snapshot inside `cache_dir`.
    pub raw: String,
    /// Source reports per-day new counts rather than running totals.
    #[serde(default)]
    pub daily_increments: bool,
    pub layout: Layout,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Layout {
    Narrow(NarrowColumns),
    Wide(WideColumns),
}

impl Layout {
    /// Metrics a source of this layout contributes.
    pub fn metrics(&self) -> Vec<Metric> {
        match self {
            Self::Narrow(_) => Metric::ALL.to_vec(),
            Self::Wide(w) => vec![w.metric],
        }
    }
}

/// Row-per-report table: one row per (region, date) observation.
#[derive(Debug, Clone, Deserialize)]
pub struct NarrowColumns {
    pub county: String,
    pub state: String,
    pub date: String,
    pub cases: String,
    pub deaths: String,
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

/// Region rows × date columns for a single metric.
#[derive(Debug, Clone, Deserialize)]
pub struct WideColumns {
    pub metric: Metric,
    pub county: String,
    pub state: String,
    /// Non-date columns to discard (e.g. FIPS codes).
    #[serde(default)]
    pub drop: Vec<String>,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default)]
    pub unknown_marker: String,
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.into()
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// Text written for unknown cells. Empty by default.
    #[serde(default)]
    pub unknown_marker: String,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.sources.is_empty() {
            return Err(ReconError::ConfigValidation(
                "at least 1 source is required".into(),
            ));
        }

        if self.refresh_interval_hours == 0 {
            return Err(ReconError::ConfigValidation(
                "refresh_interval_hours must be greater than 0".into(),
            ));
        }

        if let Some(end) = self.end {
            if end < self.epoch {
                return Err(ReconError::ConfigValidation(format!(
                    "end {end} is before epoch {}",
                    self.epoch
                )));
            }
        }

        // Two sources may share a raw file only when they fetch the same URL
        let mut raw_owner: HashMap<&str, (&str, &str)> = HashMap::new();

        for (source_name, source) in &self.sources {
            if source.url.trim().is_empty() {
                return Err(ReconError::ConfigValidation(format!(
                    "source '{source_name}': url is empty"
                )));
            }
            if source.raw.trim().is_empty() {
                return Err(ReconError::ConfigValidation(format!(
                    "source '{source_name}': raw is empty"
                )));
            }
            if source.raw.contains('/') || source.raw.contains('\\') || source.raw == ".." {
                return Err(ReconError::ConfigValidation(format!(
                    "source '{source_name}': raw '{}' must be a plain file name",
                    source.raw
                )));
            }
            if let Some((other, other_url)) = raw_owner.get(source.raw.as_str()) {
                if *other_url != source.url {
                    return Err(ReconError::ConfigValidation(format!(
                        "sources '{other}' and '{source_name}' share raw file '{}' but fetch different urls",
                        source.raw
                    )));
                }
            }
            raw_owner.insert(source.raw.as_str(), (source_name.as_str(), source.url.as_str()));

            if let Layout::Wide(wide) = &source.layout {
                for col in [&wide.county, &wide.state] {
                    if wide.drop.contains(col) {
                        return Err(ReconError::ConfigValidation(format!(
                            "source '{source_name}': region column '{col}' is listed in drop"
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Last date column for a run on `today`. An open end stretches past
    /// `today` to `latest_input`, so no reported column is dropped.
    pub fn window_end(&self, today: NaiveDate, latest_input: Option<NaiveDate>) -> NaiveDate {
        match self.end {
            Some(end) => end,
            None => latest_input.map_or(today, |latest| latest.max(today)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
