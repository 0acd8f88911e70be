// src/readiness.rs

//! Startup verification by watching the service's own log

use crate::config::Timings;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Line Tomcat prints once every context has been deployed
pub const STARTUP_MARKER: &str = "Server startup in";

/// Durations below this are not taken from bare tokens, to avoid picking up
/// ports, years or thread counts
const MIN_BARE_STARTUP_MS: i64 = 1000;

/// What one look at the log found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogVerdict {
    /// Neither marker nor signature yet
    Pending,
    /// The transient failure signature appeared first
    Transient,
    /// The startup marker appeared first; carries the whole line
    Started(String),
}

/// Final classification of a readiness wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Started, with the startup time in milliseconds
    Ready(i64),
    /// Known transient failure; retry later
    Deferred,
    /// Did not start in time, or the marker carried no usable duration
    Failed(i64),
}

/// Scan log text line by line; the first marker or signature wins
pub fn scan_log(text: &str, defer_signature: &str) -> LogVerdict {
    for line in text.lines() {
        if !defer_signature.is_empty() && line.contains(defer_signature) {
            return LogVerdict::Transient;
        }
        if line.contains(STARTUP_MARKER) {
            return LogVerdict::Started(line.to_string());
        }
    }
    LogVerdict::Pending
}

/// Extract the startup time from a marker line
///
/// Accepts `Server startup in [4512] milliseconds` (also `[4,512]`) and, failing
/// that, any whitespace-separated integer above one thousand. Durations must be
/// positive.
pub fn parse_startup_time(line: &str) -> Option<i64> {
    let after_marker = line
        .find(STARTUP_MARKER)
        .map(|i| &line[i + STARTUP_MARKER.len()..])
        .unwrap_or(line);

    if let Some(open) = after_marker.find('[') {
        if let Some(len) = after_marker[open + 1..].find(']') {
            let inner: String = after_marker[open + 1..open + 1 + len]
                .chars()
                .filter(|c| *c != ',')
                .collect();
            if let Ok(ms) = inner.trim().parse::<i64>() {
                return (ms > 0).then_some(ms);
            }
        }
    }

    line.split_whitespace()
        .filter_map(|token| token.parse::<i64>().ok())
        .find(|ms| *ms > MIN_BARE_STARTUP_MS)
}

/// Polls the startup log until the service starts, fails, or time runs out
#[derive(Debug, Clone)]
pub struct ReadinessMonitor {
    log_path: PathBuf,
    defer_signature: String,
    budget: Duration,
    timings: Timings,
}

impl ReadinessMonitor {
    pub fn new(log_path: &Path, defer_signature: &str, budget: Duration, timings: Timings) -> Self {
        Self {
            log_path: log_path.to_path_buf(),
            defer_signature: defer_signature.to_string(),
            budget,
            timings,
        }
    }

    /// Look at the log once
    pub fn check(&self) -> LogVerdict {
        match fs::read(&self.log_path) {
            Ok(bytes) => scan_log(&String::from_utf8_lossy(&bytes), &self.defer_signature),
            Err(e) => {
                debug!("Could not read {}: {}", self.log_path.display(), e);
                LogVerdict::Pending
            }
        }
    }

    /// Block until a verdict is reached or the budget is spent
    pub fn wait(&self) -> Readiness {
        thread::sleep(self.timings.settle);
        let mut elapsed = self.timings.settle;

        loop {
            match self.check() {
                LogVerdict::Transient => {
                    warn!("Transient failure signature found in {}", self.log_path.display());
                    return Readiness::Deferred;
                }
                LogVerdict::Started(line) => {
                    return match parse_startup_time(&line) {
                        Some(ms) => {
                            info!("Tomcat started in {} ms", ms);
                            Readiness::Ready(ms)
                        }
                        None => {
                            warn!("Startup marker without a duration: {}", line);
                            Readiness::Failed(-1)
                        }
                    };
                }
                LogVerdict::Pending => {}
            }

            if elapsed >= self.budget {
                break;
            }
            thread::sleep(self.timings.poll_interval);
            elapsed += self.timings.poll_interval.max(Duration::from_millis(1));
            debug!("Checking logs again, {}s elapsed", elapsed.as_secs());
        }

        warn!("Tomcat did not start within {}s", self.budget.as_secs());
        Readiness::Failed(-1)
    }
}
