use std::fmt;

use chrono::NaiveDate;

use crate::grid::{Metric, RegionKey};

#[derive(Debug)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (no sources, bad window, bad raw name, etc.).
    ConfigValidation(String),
    /// A source is configured but has no table, or has a table but no config.
    UnknownSource(String),
    /// Missing required column in a source table.
    MissingColumn { source: String, column: String },
    /// A date or numeric field cannot be parsed.
    Format { source: String, field: String, value: String },
    /// A narrow row carries a non-numeric count for a (region, date) cell.
    Shape {
        region: RegionKey,
        date: NaiveDate,
        metric: Metric,
        value: String,
    },
    /// Grids handed to consensus disagree in region set, dates, or shape.
    ShapeMismatch(String),
    /// The same region appears twice in a wide table.
    DuplicateRegion { source: String, region: RegionKey },
    /// The same date column appears twice in a grid.
    DuplicateDate(NaiveDate),
    /// A row does not carry one cell per date column.
    RowLength { region: RegionKey, expected: usize, found: usize },
    /// Alignment window ends before it starts.
    InvalidWindow { start: NaiveDate, end: NaiveDate },
    /// IO error (CSV read, etc.).
    Io(String),
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::UnknownSource(msg) => write!(f, "unknown source: {msg}"),
            Self::MissingColumn { source, column } => {
                write!(f, "source '{source}': missing column '{column}'")
            }
            Self::Format { source, field, value } => {
                write!(f, "source '{source}': cannot parse {field} '{value}'")
            }
            Self::Shape { region, date, metric, value } => {
                write!(f, "{region} on {date}: non-numeric {metric} count '{value}'")
            }
            Self::ShapeMismatch(msg) => write!(f, "grid shape mismatch: {msg}"),
            Self::DuplicateRegion { source, region } => {
                write!(f, "source '{source}': duplicate region {region}")
            }
            Self::DuplicateDate(date) => write!(f, "duplicate date column {date}"),
            Self::RowLength { region, expected, found } => {
                write!(f, "{region}: expected {expected} cell(s), found {found}")
            }
            Self::InvalidWindow { start, end } => {
                write!(f, "invalid date window: {start} is after {end}")
            }
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for ReconError {}
