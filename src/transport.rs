// src/transport.rs

//! Locating patch archives
//!
//! A locator is tried, in order, as a path on this host, as a file in the
//! local cache directory, and finally against the remote URL templates. A
//! remote fetch lands in the cache directory.

use crate::config::AgentConfig;
use crate::error::{Error, Result};
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Archives can be large; allow slow mirrors
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Directory marker of locators from the legacy patch store
const LEGACY_PATCH_DIR: &str = "/patches/";

/// Anything that can turn a locator into a readable archive path
///
/// Relative locators are taken relative to `base`, the instance root.
pub trait ArchiveSource {
    fn resolve(&self, locator: &str, base: &Path) -> Result<PathBuf>;
}

/// Candidate download URLs for a locator, in the order they are tried
pub fn remote_candidates(web: &str, locator: &str) -> Vec<String> {
    let mut urls = Vec::new();
    if locator.contains(LEGACY_PATCH_DIR) {
        urls.push(format!("{}{}", web, locator.replacen(LEGACY_PATCH_DIR, "patches/", 1)));
    }
    urls.push(format!("{}sakai-builder/{}", web, file_name(locator)));
    urls
}

fn file_name(locator: &str) -> &str {
    locator.rsplit('/').next().unwrap_or(locator)
}

/// Size and modification time of a cached archive, for the log
fn cached_summary(path: &Path) -> Option<String> {
    let metadata = fs::metadata(path).ok()?;
    let modified: chrono::DateTime<chrono::Local> = metadata.modified().ok()?.into();
    Some(format!(
        "{} bytes, modified {}",
        metadata.len(),
        modified.format("%Y-%m-%d %H:%M:%S")
    ))
}

/// Resolves archives through the local filesystem and the archive web host
pub struct ArchiveFetcher {
    client: Client,
    cache_dir: PathBuf,
    web: String,
}

impl ArchiveFetcher {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .user_agent(config.user_agent())
            .build()
            .map_err(|e| Error::DownloadError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            cache_dir: config.cache_dir.clone(),
            web: config.archive_web.clone(),
        })
    }

    /// Download `url` to `dest`, returning false when this URL cannot serve it
    fn download(&self, url: &str, dest: &Path) -> Result<bool> {
        debug!("Trying to fetch patch: {}", url);
        let mut response = match self.client.get(url).send() {
            Ok(response) => response,
            Err(e) => {
                warn!("Could not download {}: {}", url, e);
                return Ok(false);
            }
        };

        if !response.status().is_success() {
            warn!("HTTP {} from {}", response.status(), url);
            return Ok(false);
        }

        let expected = response.content_length();
        let temp_path = dest.with_extension("part");
        let mut file = File::create(&temp_path)?;
        let written = match io::copy(&mut response, &mut file) {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(Error::DownloadError(format!("Failed to write {}: {}", url, e)));
            }
        };
        drop(file);

        if let Some(expected) = expected {
            if written < expected {
                let _ = fs::remove_file(&temp_path);
                return Err(Error::TruncatedTransfer {
                    url: url.to_string(),
                    expected,
                    actual: written,
                });
            }
        }

        fs::rename(&temp_path, dest)?;
        info!("Downloaded {} ({} bytes)", url, written);
        Ok(true)
    }
}

impl ArchiveSource for ArchiveFetcher {
    fn resolve(&self, locator: &str, base: &Path) -> Result<PathBuf> {
        let given = base.join(locator);
        if given.is_file() {
            debug!("Using archive at {}", given.display());
            return Ok(given);
        }

        let cached = self.cache_dir.join(file_name(locator));
        if cached.is_file() {
            info!(
                "Reusing cached archive {} ({})",
                cached.display(),
                cached_summary(&cached).unwrap_or_else(|| "metadata unavailable".to_string())
            );
            return Ok(cached);
        }

        fs::create_dir_all(&self.cache_dir)?;
        for url in remote_candidates(&self.web, locator) {
            if self.download(&url, &cached)? {
                return Ok(cached);
            }
        }

        Err(Error::ArchiveNotFound(locator.to_string()))
    }
}
