//! Raw source downloads.
//!
//! `FetchClient` wraps a blocking `reqwest` client with retry, backoff, and
//! error classification. Every failure maps onto one of the fetch exit codes
//! (50-59) so `countyval run` reports network trouble distinctly from bad data.

use std::io::Read;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::exit_codes;
use crate::CliError;

// ── Constants ───────────────────────────────────────────────────────

pub const MAX_RETRIES: u32 = 3;
pub const USER_AGENT: &str = concat!("countyval/", env!("CARGO_PKG_VERSION"));
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound on a single raw snapshot.
pub const MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

// ── FetchClient ─────────────────────────────────────────────────────

pub struct FetchClient {
    http: reqwest::blocking::Client,
    initial_backoff: Duration,
}

impl FetchClient {
    pub fn new() -> Result<Self, CliError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CliError {
                code: exit_codes::EXIT_FETCH_NETWORK,
                message: format!("failed to build HTTP client: {e}"),
                hint: None,
            })?;

        Ok(Self {
            http,
            initial_backoff: Duration::from_secs(1),
        })
    }

    /// Override the first retry delay. Later delays double from it.
    #[cfg(test)]
    pub fn with_backoff(mut self, initial: Duration) -> Self {
        self.initial_backoff = initial;
        self
    }

    /// GET `url` and return the body as text.
    ///
    /// 429, 5xx, and transport errors are retried up to [`MAX_RETRIES`]
    /// times. Any other 4xx fails immediately.
    pub fn fetch_text(&self, source: &str, url: &str) -> Result<String, CliError> {
        let mut backoff = self.initial_backoff;

        for attempt in 0..=MAX_RETRIES {
            match self.http.get(url).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();

                    // Other 4xx (not 429): fail immediately
                    if (400..500).contains(&status) && status != 429 {
                        return Err(CliError {
                            code: exit_codes::EXIT_FETCH_UPSTREAM,
                            message: format!("{source} error ({status}) fetching {url}"),
                            hint: Some("check the source url in the config".into()),
                        });
                    }

                    // Retryable: 429, 5xx
                    if status == 429 || status >= 500 {
                        if attempt == MAX_RETRIES {
                            let (code, what) = if status == 429 {
                                (exit_codes::EXIT_FETCH_RATE_LIMIT, "rate limited")
                            } else {
                                (exit_codes::EXIT_FETCH_UPSTREAM, "upstream error")
                            };
                            return Err(CliError {
                                code,
                                message: format!(
                                    "{source} {what} after {MAX_RETRIES} retries ({status})"
                                ),
                                hint: None,
                            });
                        }

                        // Respect Retry-After header for 429
                        let wait = if status == 429 {
                            resp.headers()
                                .get("retry-after")
                                .and_then(|v| v.to_str().ok())
                                .and_then(|v| v.trim().parse::<u64>().ok())
                                .map(Duration::from_secs)
                                .unwrap_or(backoff)
                        } else {
                            backoff
                        };

                        warn!(
                            source,
                            status,
                            retry = attempt + 1,
                            max = MAX_RETRIES,
                            wait_ms = wait.as_millis() as u64,
                            "retrying fetch"
                        );
                        thread::sleep(wait);
                        backoff *= 2;
                        continue;
                    }

                    let text = read_body(source, resp)?;
                    debug!(source, bytes = text.len(), "fetched raw snapshot");
                    return Ok(text);
                }
                Err(e) => {
                    // Network/timeout errors: retry
                    if attempt == MAX_RETRIES {
                        return Err(CliError {
                            code: exit_codes::EXIT_FETCH_NETWORK,
                            message: format!(
                                "{source} unreachable after {MAX_RETRIES} retries: {e}"
                            ),
                            hint: None,
                        });
                    }

                    warn!(
                        source,
                        retry = attempt + 1,
                        max = MAX_RETRIES,
                        error = %e,
                        "retrying fetch"
                    );
                    thread::sleep(backoff);
                    backoff *= 2;
                }
            }
        }

        Err(CliError {
            code: exit_codes::EXIT_FETCH_NETWORK,
            message: format!("{source} fetch gave up"),
            hint: None,
        })
    }
}

/// Read a successful response, refusing bodies over [`MAX_BODY_BYTES`].
fn read_body(source: &str, resp: reqwest::blocking::Response) -> Result<String, CliError> {
    let too_large = || CliError {
        code: exit_codes::EXIT_FETCH_UPSTREAM,
        message: format!("{source} response exceeds {MAX_BODY_BYTES} bytes"),
        hint: None,
    };

    if resp.content_length().is_some_and(|len| len > MAX_BODY_BYTES) {
        return Err(too_large());
    }

    let mut body = Vec::new();
    resp.take(MAX_BODY_BYTES + 1)
        .read_to_end(&mut body)
        .map_err(|e| CliError {
            code: exit_codes::EXIT_FETCH_NETWORK,
            message: format!("failed to read {source} response body: {e}"),
            hint: None,
        })?;
    if body.len() as u64 > MAX_BODY_BYTES {
        return Err(too_large());
    }

    let text = String::from_utf8(body).map_err(|e| CliError {
        code: exit_codes::EXIT_FETCH_UPSTREAM,
        message: format!("{source} response is not UTF-8: {e}"),
        hint: None,
    })?;

    // Some exports carry a BOM
    Ok(match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}
