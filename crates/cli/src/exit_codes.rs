//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain     | Description                                   |
//! |---------|------------|-----------------------------------------------|
//! | 0       | Universal  | Success                                       |
//! | 1       | Universal  | General error (unspecified)                   |
//! | 2       | Universal  | CLI usage error (bad args, missing file)      |
//! | 3-9     | recon      | Config, table format, and grid shape failures |
//! | 50-59   | fetch      | Raw source downloads                          |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

use countyval_recon::ReconError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Recon (3-9)
// =============================================================================

/// Config file failed to parse or validate.
pub const EXIT_RECON_INVALID_CONFIG: u8 = 3;

/// A date or count in a source table could not be parsed.
pub const EXIT_RECON_FORMAT: u8 = 4;

/// A narrow source has a non-numeric count (pivot failed).
pub const EXIT_RECON_SHAPE: u8 = 5;

/// Source grids disagree in regions or dates (consensus refused to run).
pub const EXIT_RECON_SHAPE_MISMATCH: u8 = 6;

/// Reading a source snapshot or writing an artifact failed.
pub const EXIT_RECON_IO: u8 = 7;

// =============================================================================
// Fetch (50-59)
// =============================================================================

/// Network error (DNS, connection refused, timeout).
pub const EXIT_FETCH_NETWORK: u8 = 50;

/// Upstream returned an error status (4xx other than 429, or 5xx after retries).
pub const EXIT_FETCH_UPSTREAM: u8 = 51;

/// Rate limited (429) after all retries.
pub const EXIT_FETCH_RATE_LIMIT: u8 = 52;

/// Map an engine error onto its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_)
        | ReconError::ConfigValidation(_)
        | ReconError::UnknownSource(_)
        | ReconError::InvalidWindow { .. } => EXIT_RECON_INVALID_CONFIG,
        ReconError::MissingColumn { .. }
        | ReconError::Format { .. }
        | ReconError::DuplicateRegion { .. }
        | ReconError::DuplicateDate(_) => EXIT_RECON_FORMAT,
        ReconError::Shape { .. } | ReconError::RowLength { .. } => EXIT_RECON_SHAPE,
        ReconError::ShapeMismatch(_) => EXIT_RECON_SHAPE_MISMATCH,
        ReconError::Io(_) => EXIT_RECON_IO,
    }
}
