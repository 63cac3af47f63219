use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::debug;

use crate::error::ReconError;
use crate::grid::{Cell, Grid};

/// Align a source grid to one column per calendar day in `[start, end]`.
///
/// `end = None` means today's local date. Unknown cells dated at or before
/// the source's last reported date become zero; later cells stay unknown
/// because the source has not reported them yet. Columns outside the
/// window are not carried over.
pub fn align(grid: &Grid, start: NaiveDate, end: Option<NaiveDate>) -> Result<Grid, ReconError> {
    let end = end.unwrap_or_else(|| chrono::Local::now().date_naive());
    if start > end {
        return Err(ReconError::InvalidWindow { start, end });
    }

    let last_reported = grid.last_reported_date();
    let window: Vec<NaiveDate> = start.iter_days().take_while(|d| *d <= end).collect();

    let source_column: HashMap<NaiveDate, usize> = grid
        .dates()
        .iter()
        .enumerate()
        .map(|(i, d)| (*d, i))
        .collect();
    let columns: Vec<Option<usize>> = window
        .iter()
        .map(|d| source_column.get(d).copied())
        .collect();

    let mut aligned = Grid::new(window.clone())?;
    for (region, cells) in grid.rows() {
        let row = window
            .iter()
            .zip(&columns)
            .map(|(date, column)| match column.and_then(|i| cells[i]) {
                Some(v) => Some(v),
                None if last_reported.is_some_and(|last| *date <= last) => Some(0.0),
                None => None,
            })
            .collect();
        aligned.insert_row(region.clone(), row)?;
    }

    debug!(
        regions = aligned.region_count(),
        inserted = columns.iter().filter(|c| c.is_none()).count(),
        last_reported = ?last_reported,
        %start,
        %end,
        "aligned grid"
    );

    Ok(aligned)
}

/// Running totals along each row. Unknown poisons the rest of its row.
pub fn cumulate(grid: &Grid) -> Result<Grid, ReconError> {
    let mut out = Grid::new(grid.dates().to_vec())?;
    for (region, cells) in grid.rows() {
        let mut total: Cell = Some(0.0);
        let row = cells
            .iter()
            .map(|cell| {
                total = match (total, cell) {
                    (Some(acc), Some(v)) => Some(acc + v),
                    _ => None,
                };
                total
            })
            .collect();
        out.insert_row(region.clone(), row)?;
    }
    Ok(out)
}
