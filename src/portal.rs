// src/portal.rs

//! Conversation with the controlling portal
//!
//! This module provides:
//! - Manifest fetch: which patch, if any, this host should apply
//! - Claim and result reports, form-encoded POSTs carrying an outcome code

use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::orchestrator::Outcome;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Bodies this short carry no manifest
const MIN_MANIFEST_BODY: usize = 5;

/// Patch manifest as returned by the portal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub patch_id: String,
    pub tomcat_dir: String,
    /// Space-separated archive locators
    #[serde(default)]
    pub files: String,
    /// Raw `key=value` property changes
    #[serde(default, rename = "sakaiprops")]
    pub properties: String,
}

impl Manifest {
    /// Decode a response body; `None` means there is nothing to do
    pub fn from_body(body: &str) -> Result<Option<Self>> {
        let body = body.trim();
        if body.len() <= MIN_MANIFEST_BODY {
            return Ok(None);
        }

        let value: serde_json::Value =
            serde_json::from_str(body).map_err(|e| Error::Manifest(e.to_string()))?;
        match &value {
            serde_json::Value::Object(map) if map.is_empty() => return Ok(None),
            serde_json::Value::Object(_) => {}
            _ => return Ok(None),
        }

        let manifest = serde_json::from_value(value).map_err(|e| Error::Manifest(e.to_string()))?;
        Ok(Some(manifest))
    }
}

/// Receives claim and result reports
pub trait ReportSink {
    fn report(&self, outcome: &Outcome, patch_id: &str, output: &str) -> Result<()>;
}

/// Form fields of one report
pub fn report_form(
    outcome: &Outcome,
    patch_id: &str,
    output: &str,
    timestamp: i64,
) -> Vec<(&'static str, String)> {
    vec![
        ("result_value", outcome.code().to_string()),
        ("start_uptime", outcome.startup_field()),
        ("last_attempt", timestamp.to_string()),
        ("patch_id", patch_id.to_string()),
        ("result", output.to_string()),
    ]
}

/// HTTP client for the portal
pub struct PortalClient {
    client: Client,
    token: String,
    portal_url: String,
    report_url: String,
}

impl PortalClient {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(config.user_agent())
            .build()
            .map_err(|e| Error::DownloadError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            token: config.token.clone(),
            portal_url: config.portal_url.clone(),
            report_url: config.report_url.clone(),
        })
    }

    /// Ask the portal for work addressed to any of `ips`
    pub fn fetch_manifest(&self, ips: &[String]) -> Result<Option<Manifest>> {
        let ips_json = serde_json::to_string(ips)
            .map_err(|e| Error::Manifest(format!("Could not encode addresses: {}", e)))?;
        debug!("Checking for patches for {}", ips_json);

        let response = self
            .client
            .get(&self.portal_url)
            .query(&[("ips", ips_json.as_str())])
            .header("X-Auth-Token", &self.token)
            .header("Content-Type", "text/plain")
            .send()
            .map_err(|e| Error::DownloadError(format!("Portal request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "HTTP {} from {}",
                response.status(),
                self.portal_url
            )));
        }

        let body = response
            .text()
            .map_err(|e| Error::DownloadError(format!("Could not read portal response: {}", e)))?;
        let manifest = Manifest::from_body(&body)?;
        if let Some(manifest) = &manifest {
            info!("Portal returned patch {} for {}", manifest.patch_id, manifest.tomcat_dir);
        }
        Ok(manifest)
    }
}

impl ReportSink for PortalClient {
    fn report(&self, outcome: &Outcome, patch_id: &str, output: &str) -> Result<()> {
        let form = report_form(outcome, patch_id, output, chrono::Utc::now().timestamp());
        debug!("Reporting {:?} for patch {}", outcome, patch_id);

        let response = self
            .client
            .post(&self.report_url)
            .form(&form)
            .send()
            .map_err(|e| Error::DownloadError(format!("Could not POST update: {}", e)))?;

        if !response.status().is_success() {
            warn!("Portal answered report with HTTP {}", response.status());
        }
        Ok(())
    }
}
