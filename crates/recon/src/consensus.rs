use ordered_float::OrderedFloat;
use tracing::debug;

use crate::error::ReconError;
use crate::grid::{Cell, Grid};

/// Consensus and validity grids, shaped like the inputs.
#[derive(Debug, Clone)]
pub struct ConsensusOutput {
    pub consensus: Grid,
    pub validity: Grid,
}

/// Consensus value for one cell plus the share of sources that agree with it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub value: f64,
    pub validity: f64,
}

/// Reconcile N equally-shaped grids cell by cell.
///
/// Shapes are checked before any cell is computed. A cell that is unknown in
/// any input is unknown in both outputs.
pub fn reconcile(grids: &[Grid]) -> Result<ConsensusOutput, ReconError> {
    check_shapes(grids)?;
    let first = &grids[0];

    let mut consensus = Grid::new(first.dates().to_vec())?;
    let mut validity = Grid::new(first.dates().to_vec())?;
    let mut values = Vec::with_capacity(grids.len());

    for (region, _) in first.rows() {
        let rows: Vec<&[Cell]> = grids
            .iter()
            .map(|g| g.row(region).unwrap_or(&[]))
            .collect();

        let mut consensus_row = Vec::with_capacity(first.date_count());
        let mut validity_row = Vec::with_capacity(first.date_count());
        for col in 0..first.date_count() {
            values.clear();
            values.extend(rows.iter().map(|row| row.get(col).copied().flatten()));
            let verdict = values
                .iter()
                .copied()
                .collect::<Option<Vec<f64>>>()
                .and_then(|known| mode_or_median(&known));
            match verdict {
                Some(verdict) => {
                    consensus_row.push(Some(verdict.value));
                    validity_row.push(Some(verdict.validity));
                }
                None => {
                    consensus_row.push(None);
                    validity_row.push(None);
                }
            }
        }
        consensus.insert_row(region.clone(), consensus_row)?;
        validity.insert_row(region.clone(), validity_row)?;
    }

    debug!(
        sources = grids.len(),
        regions = consensus.region_count(),
        dates = consensus.date_count(),
        "reconciled grids"
    );

    Ok(ConsensusOutput { consensus, validity })
}

/// Median when every value is distinct, otherwise the mode.
///
/// Ties for the mode go to the smallest tied value. `None` for empty input.
pub fn mode_or_median(values: &[f64]) -> Option<Verdict> {
    if values.is_empty() {
        return None;
    }

    let mut sorted: Vec<OrderedFloat<f64>> = values.iter().copied().map(OrderedFloat).collect();
    sorted.sort();

    // Runs of equal values in sorted order; the first longest run is the
    // smallest among the most frequent.
    let mut best = (sorted[0], 0usize);
    let mut distinct = 0usize;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j < sorted.len() && sorted[j] == sorted[i] {
            j += 1;
        }
        distinct += 1;
        if j - i > best.1 {
            best = (sorted[i], j - i);
        }
        i = j;
    }

    let value = if distinct == sorted.len() {
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1].0 + sorted[mid].0) / 2.0
        } else {
            sorted[mid].0
        }
    } else {
        best.0.into_inner()
    };

    let agreeing = values.iter().filter(|v| **v == value).count();
    Some(Verdict {
        value,
        validity: agreeing as f64 / values.len() as f64,
    })
}

fn check_shapes(grids: &[Grid]) -> Result<(), ReconError> {
    let Some(first) = grids.first() else {
        return Err(ReconError::ShapeMismatch("no grids to reconcile".into()));
    };

    for (i, grid) in grids.iter().enumerate().skip(1) {
        if grid.dates() != first.dates() {
            return Err(ReconError::ShapeMismatch(format!(
                "grid {i} has {} date column(s) ({}), grid 0 has {} ({})",
                grid.date_count(),
                describe_dates(grid),
                first.date_count(),
                describe_dates(first),
            )));
        }
        if grid.region_count() != first.region_count() {
            return Err(ReconError::ShapeMismatch(format!(
                "grid {i} has {} region(s), grid 0 has {}",
                grid.region_count(),
                first.region_count(),
            )));
        }
        if let Some(region) = first.regions().find(|r| !grid.contains_region(r)) {
            return Err(ReconError::ShapeMismatch(format!(
                "region {region} missing from grid {i}"
            )));
        }
    }
    Ok(())
}

fn describe_dates(grid: &Grid) -> String {
    match (grid.dates().first(), grid.dates().last()) {
        (Some(a), Some(b)) => format!("{a}..{b}"),
        _ => "empty".into(),
    }
}
