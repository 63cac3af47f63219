use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use chrono::NaiveDate;
use tracing::debug;

use crate::align::{align, cumulate};
use crate::config::{Layout, NarrowColumns, ReconConfig, RegionPolicy, WideColumns};
use crate::consensus::reconcile;
use crate::error::ReconError;
use crate::evidence::compute_summary;
use crate::grid::{Cell, Grid, Metric, RegionKey};
use crate::model::{MetricResult, ReconInput, ReconMeta, ReconResult, SourceTable};
use crate::pivot::{pivot, NarrowRow};

/// Region headers of every grid CSV this crate writes.
pub const GRID_COUNTY_HEADER: &str = "County";
pub const GRID_STATE_HEADER: &str = "State";
pub const GRID_DATE_FORMAT: &str = "%Y-%m-%d";

/// Run one reconciliation cycle. When the config leaves `end` open, the
/// window closes at `today` or the newest input date, whichever is later.
pub fn run(
    config: &ReconConfig,
    input: &ReconInput,
    today: NaiveDate,
) -> Result<ReconResult, ReconError> {
    if let Some(stray) = input.sources.keys().find(|k| !config.sources.contains_key(*k)) {
        return Err(ReconError::UnknownSource(format!(
            "source '{stray}' is not configured"
        )));
    }

    let latest_input = input.sources.values().filter_map(SourceTable::latest_date).max();
    let end = config.window_end(today, latest_input);
    if config.epoch > end {
        return Err(ReconError::InvalidWindow { start: config.epoch, end });
    }

    let mut per_metric: BTreeMap<Metric, Vec<(String, Grid)>> = BTreeMap::new();
    for (source_name, source) in &config.sources {
        let table = input.sources.get(source_name).ok_or_else(|| {
            ReconError::UnknownSource(format!("source '{source_name}' has no data"))
        })?;

        for (metric, grid) in align_source(source_name, &source.layout, table, config.epoch, end)? {
            let grid = if source.daily_increments {
                cumulate(&grid)?
            } else {
                grid
            };
            per_metric
                .entry(metric)
                .or_default()
                .push((source_name.clone(), grid));
        }
    }

    let mut metrics = BTreeMap::new();
    for (metric, aligned) in per_metric {
        let regions = region_set(config.region_policy, &aligned);
        let (sources, source_grids): (Vec<String>, Vec<Grid>) = aligned
            .into_iter()
            .map(|(name, grid)| {
                let conformed = grid.conform_regions(&regions);
                (name, conformed)
            })
            .unzip();

        let output = reconcile(&source_grids)?;
        let summary = compute_summary(&output.validity);
        debug!(%metric, sources = sources.len(), regions = regions.len(), "metric reconciled");

        metrics.insert(
            metric,
            MetricResult {
                sources,
                source_grids,
                consensus: output.consensus,
                validity: output.validity,
                summary,
            },
        );
    }

    Ok(ReconResult {
        meta: ReconMeta {
            config_name: config.name.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
            epoch: config.epoch,
            end,
            region_policy: config.region_policy,
        },
        metrics,
    })
}

/// Pivot (narrow) and align one source's table, yielding a grid per metric.
fn align_source(
    source_name: &str,
    layout: &Layout,
    table: &SourceTable,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<(Metric, Grid)>, ReconError> {
    match (layout, table) {
        (Layout::Narrow(_), SourceTable::Narrow(rows)) => {
            let grids = pivot(rows)?;
            Metric::ALL
                .iter()
                .map(|metric| -> Result<(Metric, Grid), ReconError> {
                    Ok((*metric, align(grids.get(*metric), start, Some(end))?))
                })
                .collect()
        }
        (Layout::Wide(cols), SourceTable::Wide(grid)) => {
            Ok(vec![(cols.metric, align(grid, start, Some(end))?)])
        }
        _ => Err(ReconError::ConfigValidation(format!(
            "source '{source_name}': table does not match its configured layout"
        ))),
    }
}

fn region_set(policy: RegionPolicy, grids: &[(String, Grid)]) -> BTreeSet<RegionKey> {
    match policy {
        RegionPolicy::Union => grids
            .iter()
            .flat_map(|(_, g)| g.regions().cloned())
            .collect(),
        RegionPolicy::Intersection => {
            let Some((_, first)) = grids.first() else {
                return BTreeSet::new();
            };
            first
                .regions()
                .filter(|r| grids.iter().all(|(_, g)| g.contains_region(r)))
                .cloned()
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// CSV loading
// ---------------------------------------------------------------------------

fn csv_reader(csv_data: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_data.as_bytes())
}

fn read_headers(reader: &mut csv::Reader<&[u8]>) -> Result<Vec<String>, ReconError> {
    Ok(reader
        .headers()
        .map_err(|e| ReconError::Io(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect())
}

fn column_index(source: &str, headers: &[String], name: &str) -> Result<usize, ReconError> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| ReconError::MissingColumn {
            source: source.into(),
            column: name.into(),
        })
}

/// Load a narrow (row-per-report) CSV. Count fields stay raw; [`pivot`]
/// checks them.
pub fn load_narrow_rows(
    source: &str,
    csv_data: &str,
    columns: &NarrowColumns,
) -> Result<Vec<NarrowRow>, ReconError> {
    let mut reader = csv_reader(csv_data);
    let headers = read_headers(&mut reader)?;

    let county_idx = column_index(source, &headers, &columns.county)?;
    let state_idx = column_index(source, &headers, &columns.state)?;
    let date_idx = column_index(source, &headers, &columns.date)?;
    let cases_idx = column_index(source, &headers, &columns.cases)?;
    let deaths_idx = column_index(source, &headers, &columns.deaths)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ReconError::Io(e.to_string()))?;

        let date_str = record.get(date_idx).unwrap_or("").trim();
        let date = NaiveDate::parse_from_str(date_str, &columns.date_format).map_err(|_| {
            ReconError::Format {
                source: source.into(),
                field: format!("{} date", columns.date),
                value: date_str.into(),
            }
        })?;

        rows.push(NarrowRow {
            region: RegionKey::new(
                record.get(county_idx).unwrap_or("").trim(),
                record.get(state_idx).unwrap_or("").trim(),
            ),
            date,
            cases: record.get(cases_idx).unwrap_or("").to_string(),
            deaths: record.get(deaths_idx).unwrap_or("").to_string(),
        });
    }

    debug!(source, rows = rows.len(), "loaded narrow rows");
    Ok(rows)
}

/// Load a wide (region rows × date columns) CSV for one metric.
pub fn load_wide_grid(
    source: &str,
    csv_data: &str,
    columns: &WideColumns,
) -> Result<Grid, ReconError> {
    load_wide(
        source,
        csv_data,
        &columns.county,
        &columns.state,
        &columns.drop,
        &columns.date_format,
        &columns.unknown_marker,
    )
}

/// Load a grid CSV in the format written by [`write_grid_csv`].
pub fn load_grid_csv(source: &str, csv_data: &str, unknown_marker: &str) -> Result<Grid, ReconError> {
    load_wide(
        source,
        csv_data,
        GRID_COUNTY_HEADER,
        GRID_STATE_HEADER,
        &[],
        GRID_DATE_FORMAT,
        unknown_marker,
    )
}

fn load_wide(
    source: &str,
    csv_data: &str,
    county: &str,
    state: &str,
    drop: &[String],
    date_format: &str,
    unknown_marker: &str,
) -> Result<Grid, ReconError> {
    let mut reader = csv_reader(csv_data);
    let headers = read_headers(&mut reader)?;

    let county_idx = column_index(source, &headers, county)?;
    let state_idx = column_index(source, &headers, state)?;

    // Every remaining column must be a date
    let mut date_columns: Vec<(usize, NaiveDate)> = Vec::new();
    for (idx, header) in headers.iter().enumerate() {
        if idx == county_idx || idx == state_idx || drop.iter().any(|d| d == header) {
            continue;
        }
        let date = NaiveDate::parse_from_str(header, date_format).map_err(|_| ReconError::Format {
            source: source.into(),
            field: "date header".into(),
            value: header.clone(),
        })?;
        date_columns.push((idx, date));
    }

    let mut grid = Grid::new(date_columns.iter().map(|(_, d)| *d).collect())?;

    for record in reader.records() {
        let record = record.map_err(|e| ReconError::Io(e.to_string()))?;
        let region = RegionKey::new(
            record.get(county_idx).unwrap_or("").trim(),
            record.get(state_idx).unwrap_or("").trim(),
        );
        if grid.contains_region(&region) {
            return Err(ReconError::DuplicateRegion {
                source: source.into(),
                region,
            });
        }

        let mut cells: Vec<Cell> = Vec::with_capacity(date_columns.len());
        for (idx, date) in &date_columns {
            let raw = record.get(*idx).unwrap_or("").trim();
            if raw.is_empty() || (!unknown_marker.is_empty() && raw == unknown_marker) {
                cells.push(None);
                continue;
            }
            match raw.parse::<f64>() {
                Ok(v) if v.is_finite() => cells.push(Some(v)),
                _ => {
                    return Err(ReconError::Format {
                        source: source.into(),
                        field: format!("count for {region} on {date}"),
                        value: raw.into(),
                    })
                }
            }
        }
        grid.insert_row(region, cells)?;
    }

    debug!(
        source,
        regions = grid.region_count(),
        dates = grid.date_count(),
        "loaded wide grid"
    );
    Ok(grid)
}

// ---------------------------------------------------------------------------
// CSV writing
// ---------------------------------------------------------------------------

/// Write `County,State,<ISO dates…>` followed by one row per region.
pub fn write_grid_csv<W: Write>(
    grid: &Grid,
    writer: W,
    unknown_marker: &str,
) -> Result<(), ReconError> {
    let mut out = csv::Writer::from_writer(writer);

    let mut header = vec![GRID_COUNTY_HEADER.to_string(), GRID_STATE_HEADER.to_string()];
    header.extend(grid.dates().iter().map(|d| d.format(GRID_DATE_FORMAT).to_string()));
    out.write_record(&header)
        .map_err(|e| ReconError::Io(e.to_string()))?;

    for (region, cells) in grid.rows() {
        let mut record = Vec::with_capacity(cells.len() + 2);
        record.push(region.county.clone());
        record.push(region.state.clone());
        record.extend(cells.iter().map(|cell| match cell {
            Some(v) => v.to_string(),
            None => unknown_marker.to_string(),
        }));
        out.write_record(&record)
            .map_err(|e| ReconError::Io(e.to_string()))?;
    }

    out.flush().map_err(|e| ReconError::Io(e.to_string()))
}
