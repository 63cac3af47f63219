use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::RegionPolicy;
use crate::evidence::ReconSummary;
use crate::grid::{Grid, Metric};
use crate::pivot::NarrowRow;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One source's parsed snapshot.
#[derive(Debug, Clone)]
pub enum SourceTable {
    Narrow(Vec<NarrowRow>),
    /// Single-metric grid; the metric comes from the source's layout config.
    Wide(Grid),
}

impl SourceTable {
    /// Most recent date this table reports.
    pub fn latest_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Narrow(rows) => rows.iter().map(|r| r.date).max(),
            Self::Wide(grid) => grid.dates().iter().max().copied(),
        }
    }
}

/// Pre-loaded tables keyed by source name.
#[derive(Debug, Clone, Default)]
pub struct ReconInput {
    pub sources: BTreeMap<String, SourceTable>,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ReconResult {
    pub meta: ReconMeta,
    pub metrics: BTreeMap<Metric, MetricResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
    pub epoch: NaiveDate,
    pub end: NaiveDate,
    pub region_policy: RegionPolicy,
}

/// Everything produced for one metric. Grids are not serialized; the CLI
/// writes them out as CSV.
#[derive(Debug, Clone, Serialize)]
pub struct MetricResult {
    /// Contributing sources, in the order their grids were reconciled.
    pub sources: Vec<String>,
    /// Aligned (and cumulated, where configured) grid per source, parallel to `sources`.
    #[serde(skip)]
    pub source_grids: Vec<Grid>,
    #[serde(skip)]
    pub consensus: Grid,
    #[serde(skip)]
    pub validity: Grid,
    pub summary: ReconSummary,
}
