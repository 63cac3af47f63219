use serde::Serialize;

use crate::grid::Grid;

/// Agreement statistics for one metric's validity grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconSummary {
    pub regions: usize,
    pub dates: usize,
    pub cells: usize,
    pub unknown_cells: usize,
    /// Every source agreed (validity 1).
    pub unanimous_cells: usize,
    /// Some but not all sources agreed.
    pub split_cells: usize,
    /// No source matched the consensus (median of distinct values).
    pub no_agreement_cells: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_validity: Option<f64>,
}

/// Compute summary statistics from a validity grid.
pub fn compute_summary(validity: &Grid) -> ReconSummary {
    let mut unknown_cells = 0;
    let mut unanimous_cells = 0;
    let mut split_cells = 0;
    let mut no_agreement_cells = 0;
    let mut known = 0usize;
    let mut total = 0.0;

    for (_, row) in validity.rows() {
        for cell in row {
            match cell {
                None => unknown_cells += 1,
                Some(v) => {
                    known += 1;
                    total += v;
                    if *v >= 1.0 {
                        unanimous_cells += 1;
                    } else if *v <= 0.0 {
                        no_agreement_cells += 1;
                    } else {
                        split_cells += 1;
                    }
                }
            }
        }
    }

    ReconSummary {
        regions: validity.region_count(),
        dates: validity.date_count(),
        cells: validity.region_count() * validity.date_count(),
        unknown_cells,
        unanimous_cells,
        split_cells,
        no_agreement_cells,
        mean_validity: (known > 0).then(|| total / known as f64),
    }
}
