use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// County plus its parent state. Orders by county, then state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionKey {
    pub county: String,
    pub state: String,
}

impl RegionKey {
    pub fn new(county: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            county: county.into(),
            state: state.into(),
        }
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.county, self.state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Cases,
    Deaths,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::Cases, Metric::Deaths];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cases => "cases",
            Self::Deaths => "deaths",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Grid
// ---------------------------------------------------------------------------

/// One grid cell. `None` is "unknown", never a stand-in for zero.
pub type Cell = Option<f64>;

/// Region × date table. Every row holds exactly one cell per date column.
///
/// Date columns are unique but only guaranteed chronological once the grid
/// has been through [`crate::align::align`].
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    dates: Vec<NaiveDate>,
    rows: BTreeMap<RegionKey, Vec<Cell>>,
}

impl Grid {
    /// Empty grid with the given date columns.
    pub fn new(dates: Vec<NaiveDate>) -> Result<Self, ReconError> {
        let mut seen = HashSet::with_capacity(dates.len());
        for date in &dates {
            if !seen.insert(*date) {
                return Err(ReconError::DuplicateDate(*date));
            }
        }
        Ok(Self {
            dates,
            rows: BTreeMap::new(),
        })
    }

    /// Insert (or replace) a region row.
    pub fn insert_row(&mut self, region: RegionKey, cells: Vec<Cell>) -> Result<(), ReconError> {
        if cells.len() != self.dates.len() {
            return Err(ReconError::RowLength {
                region,
                expected: self.dates.len(),
                found: cells.len(),
            });
        }
        self.rows.insert(region, cells);
        Ok(())
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn regions(&self) -> impl Iterator<Item = &RegionKey> {
        self.rows.keys()
    }

    pub fn rows(&self) -> impl Iterator<Item = (&RegionKey, &[Cell])> {
        self.rows.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn row(&self, region: &RegionKey) -> Option<&[Cell]> {
        self.rows.get(region).map(|v| v.as_slice())
    }

    pub fn contains_region(&self, region: &RegionKey) -> bool {
        self.rows.contains_key(region)
    }

    pub fn date_index(&self, date: NaiveDate) -> Option<usize> {
        self.dates.iter().position(|d| *d == date)
    }

    /// Cell at (region, date). Outer `None` when the region or date is absent.
    pub fn cell(&self, region: &RegionKey, date: NaiveDate) -> Option<Cell> {
        let idx = self.date_index(date)?;
        self.rows.get(region).map(|row| row[idx])
    }

    pub fn region_count(&self) -> usize {
        self.rows.len()
    }

    pub fn date_count(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Latest date column holding at least one known cell.
    pub fn last_reported_date(&self) -> Option<NaiveDate> {
        self.dates
            .iter()
            .enumerate()
            .filter(|(idx, _)| self.rows.values().any(|row| row[*idx].is_some()))
            .map(|(_, date)| *date)
            .max()
    }

    /// Copy restricted to `regions`; regions this grid lacks become all-unknown rows.
    pub fn conform_regions(&self, regions: &BTreeSet<RegionKey>) -> Grid {
        let rows = regions
            .iter()
            .map(|region| {
                let cells = self
                    .rows
                    .get(region)
                    .cloned()
                    .unwrap_or_else(|| vec![None; self.dates.len()]);
                (region.clone(), cells)
            })
            .collect();
        Grid {
            dates: self.dates.clone(),
            rows,
        }
    }
}
