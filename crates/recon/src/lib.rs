//! `countyval-recon`: multi-source county time-series reconciliation engine.
//!
//! Pure engine crate: receives pre-loaded source tables, returns consensus
//! and validity grids. No network or filesystem writes.

pub mod align;
pub mod config;
pub mod consensus;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod grid;
pub mod model;
pub mod pivot;

pub use align::{align, cumulate};
pub use config::ReconConfig;
pub use consensus::reconcile;
pub use engine::run;
pub use error::ReconError;
pub use grid::{Cell, Grid, Metric, RegionKey};
pub use model::{ReconInput, ReconResult, SourceTable};
pub use pivot::{pivot, NarrowRow};
