//! On-disk raw snapshot cache.
//!
//! Each source's download lives at `<cache_dir>/<raw>`. A snapshot younger
//! than the refresh interval is served from disk; anything older is
//! re-fetched and replaced atomically.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info};

use crate::exit_codes;
use crate::CliError;

/// Where a snapshot came from on this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Fresh,
    Fetched,
}

pub struct RawCache {
    dir: PathBuf,
    max_age: Duration,
}

impl RawCache {
    pub fn new(dir: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self { dir: dir.into(), max_age }
    }

    pub fn path(&self, raw: &str) -> PathBuf {
        self.dir.join(raw)
    }

    /// True when `raw` exists and was written less than `max_age` before `now`.
    pub fn is_fresh(&self, raw: &str, now: SystemTime) -> bool {
        let modified = match fs::metadata(self.path(raw)).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => return false,
        };
        match now.duration_since(modified) {
            Ok(age) => age < self.max_age,
            // mtime in the future: treat as just written
            Err(_) => true,
        }
    }

    /// Return the cached snapshot when fresh, otherwise call `fetch` and
    /// store its result. `force` skips the freshness check.
    pub fn load_or_fetch(
        &self,
        raw: &str,
        force: bool,
        fetch: impl FnOnce() -> Result<String, CliError>,
    ) -> Result<(String, CacheStatus), CliError> {
        let path = self.path(raw);

        if !force && self.is_fresh(raw, SystemTime::now()) {
            let body = fs::read_to_string(&path).map_err(|e| {
                CliError::io(format!("failed to read {}: {e}", path.display()))
            })?;
            debug!(raw, "raw snapshot is fresh");
            return Ok((body, CacheStatus::Fresh));
        }

        let body = fetch()?;
        write_atomic(&path, body.as_bytes())?;
        info!(raw, bytes = body.len(), "raw snapshot refreshed");
        Ok((body, CacheStatus::Fetched))
    }
}

/// Write `bytes` to a sibling `.tmp` file, then rename it over `path`.
/// Readers never observe a half-written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CliError> {
    let io_err = |what: &str, e: std::io::Error| CliError {
        code: exit_codes::EXIT_RECON_IO,
        message: format!("failed to {what} {}: {e}", path.display()),
        hint: None,
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| io_err("create directory for", e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{file_name}.tmp"));

    let written = fs::File::create(&tmp)
        .map_err(|e| io_err("create temp file for", e))
        .and_then(|mut file| {
            file.write_all(bytes).map_err(|e| io_err("write", e))?;
            file.sync_all().map_err(|e| io_err("sync", e))
        })
        .and_then(|()| fs::rename(&tmp, path).map_err(|e| io_err("replace", e)));

    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}
