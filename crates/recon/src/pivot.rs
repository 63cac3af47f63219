use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use tracing::debug;

use crate::error::ReconError;
use crate::grid::{Cell, Grid, Metric, RegionKey};

/// One observation from a narrow (row-per-report) source.
///
/// Counts are kept as raw field text; [`pivot`] owns the numeric check.
#[derive(Debug, Clone)]
pub struct NarrowRow {
    pub region: RegionKey,
    pub date: NaiveDate,
    pub cases: String,
    pub deaths: String,
}

/// The two per-metric grids produced by a pivot.
#[derive(Debug, Clone)]
pub struct MetricGrids {
    pub cases: Grid,
    pub deaths: Grid,
}

impl MetricGrids {
    pub fn get(&self, metric: Metric) -> &Grid {
        match metric {
            Metric::Cases => &self.cases,
            Metric::Deaths => &self.deaths,
        }
    }
}

/// Group rows by (region, date), sum each metric, and pivot dates into columns.
pub fn pivot(rows: &[NarrowRow]) -> Result<MetricGrids, ReconError> {
    let mut sums: BTreeMap<(RegionKey, NaiveDate), [Cell; 2]> = BTreeMap::new();

    for row in rows {
        let cases = parse_count(row, Metric::Cases, &row.cases)?;
        let deaths = parse_count(row, Metric::Deaths, &row.deaths)?;
        let entry = sums
            .entry((row.region.clone(), row.date))
            .or_insert([None, None]);
        entry[0] = add(entry[0], cases);
        entry[1] = add(entry[1], deaths);
    }

    let dates: Vec<NaiveDate> = sums
        .keys()
        .map(|(_, date)| *date)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let column: HashMap<NaiveDate, usize> =
        dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();

    let mut cases_rows: BTreeMap<RegionKey, Vec<Cell>> = BTreeMap::new();
    let mut deaths_rows: BTreeMap<RegionKey, Vec<Cell>> = BTreeMap::new();
    for ((region, date), [cases, deaths]) in &sums {
        let idx = column[date];
        cases_rows
            .entry(region.clone())
            .or_insert_with(|| vec![None; dates.len()])[idx] = *cases;
        deaths_rows
            .entry(region.clone())
            .or_insert_with(|| vec![None; dates.len()])[idx] = *deaths;
    }

    let mut cases = Grid::new(dates.clone())?;
    for (region, cells) in cases_rows {
        cases.insert_row(region, cells)?;
    }
    let mut deaths = Grid::new(dates)?;
    for (region, cells) in deaths_rows {
        deaths.insert_row(region, cells)?;
    }

    debug!(
        rows = rows.len(),
        regions = cases.region_count(),
        dates = cases.date_count(),
        "pivoted narrow rows"
    );

    Ok(MetricGrids { cases, deaths })
}

/// Empty field = no report. Anything else must be a finite number.
fn parse_count(row: &NarrowRow, metric: Metric, raw: &str) -> Result<Cell, ReconError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(ReconError::Shape {
            region: row.region.clone(),
            date: row.date,
            metric,
            value: raw.to_string(),
        }),
    }
}

fn add(acc: Cell, value: Cell) -> Cell {
    match (acc, value) {
        (Some(a), Some(b)) => Some(a + b),
        (a, None) => a,
        (None, b) => b,
    }
}
