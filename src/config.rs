// src/config.rs

//! Run configuration
//!
//! Everything the agent needs to know is gathered here once, at startup, and
//! handed to each component by reference:
//! - `AgentConfig`: values that come from the command line
//! - `InstanceLayout`: the fixed relative structure of a Tomcat instance
//! - `Timings`: fixed waits used while stopping and starting the service

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default portal endpoint that hands out patch manifests
pub const DEFAULT_PORTAL_URL: &str = "https://admin.longsight.com/longsight/json/patches";

/// Default endpoint for claim and result reports
pub const DEFAULT_REPORT_URL: &str = "https://admin.longsight.com/longsight/remote/patch/update";

/// Default base URL for remote archives
pub const DEFAULT_ARCHIVE_WEB: &str = "https://s3.amazonaws.com/longsight-patches/";

/// Default readiness budget in seconds
pub const DEFAULT_WAIT_SECONDS: u64 = 280;

/// Log text that marks a transient configuration mismatch worth retrying later
pub const DEFAULT_DEFER_SIGNATURE: &str = "Migration checksum mismatch";

/// Immutable configuration for one agent invocation
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Security token sent to the portal
    pub token: String,
    /// Manifest endpoint
    pub portal_url: String,
    /// Claim/result endpoint
    pub report_url: String,
    /// Local directory where downloaded archives are cached
    pub cache_dir: PathBuf,
    /// Base URL for remote archive downloads, with trailing slash
    pub archive_web: String,
    /// Overrides the auto-detected host address when set
    pub ip_override: Option<String>,
    /// Total time to wait for the service to report startup
    pub startup_wait: Duration,
    /// Transient failure signature searched for in the startup log
    pub defer_signature: String,
}

impl AgentConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            portal_url: DEFAULT_PORTAL_URL.to_string(),
            report_url: DEFAULT_REPORT_URL.to_string(),
            cache_dir: PathBuf::from("/tmp"),
            archive_web: DEFAULT_ARCHIVE_WEB.to_string(),
            ip_override: None,
            startup_wait: Duration::from_secs(DEFAULT_WAIT_SECONDS),
            defer_signature: DEFAULT_DEFER_SIGNATURE.to_string(),
        }
    }

    /// User agent sent with every HTTP request
    pub fn user_agent(&self) -> String {
        format!("tomcat-patcher/{}", env!("CARGO_PKG_VERSION"))
    }
}

/// Fixed waits around stopping and starting the service
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    /// Wait after the graceful stop command before the first kill pass
    pub stop_grace: Duration,
    /// Pause between the two kill passes
    pub kill_pause: Duration,
    /// Wait after start before the first log check
    pub settle: Duration,
    /// Interval between log checks
    pub poll_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(10),
            kill_pause: Duration::from_secs(10),
            settle: Duration::from_secs(40),
            poll_interval: Duration::from_secs(10),
        }
    }
}

impl Timings {
    /// No waiting at all; used by tests driving fake services
    pub fn immediate() -> Self {
        Self {
            stop_grace: Duration::ZERO,
            kill_pause: Duration::ZERO,
            settle: Duration::ZERO,
            poll_interval: Duration::ZERO,
        }
    }
}

/// Relative layout of a Tomcat instance
#[derive(Debug, Clone)]
pub struct InstanceLayout {
    root: PathBuf,
}

/// Candidate property files, least to most preferred write target
pub const PROPERTY_FILES: [&str; 4] = [
    "instance.properties",
    "dev.properties",
    "local.properties",
    "sakai.properties",
];

impl InstanceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Service control script
    pub fn control_script(&self) -> PathBuf {
        self.root.join("bin").join("catalina.sh")
    }

    /// Environment script that may define CATALINA_HOME
    pub fn setenv_script(&self) -> PathBuf {
        self.root.join("bin").join("setenv.sh")
    }

    /// Live startup log
    pub fn startup_log(&self) -> PathBuf {
        self.root.join("logs").join("catalina.out")
    }

    /// Where the previous startup log is moved before a restart
    pub fn rotated_log(&self, patch_id: &str) -> PathBuf {
        self.root
            .join("logs")
            .join(format!("catalina.out-pre-patch-{}", patch_id))
    }

    /// Candidate property files in priority order
    pub fn property_files(&self) -> Vec<PathBuf> {
        let dir = self.root.join("sakai");
        PROPERTY_FILES.iter().map(|name| dir.join(name)).collect()
    }

    /// The instance's own shared library directory
    pub fn lib_dir(&self) -> PathBuf {
        self.root.join("lib")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::new("secret");
        assert_eq!(config.token, "secret");
        assert_eq!(config.startup_wait, Duration::from_secs(280));
        assert_eq!(config.cache_dir, PathBuf::from("/tmp"));
        assert!(config.archive_web.ends_with('/'));
        assert!(config.user_agent().starts_with("tomcat-patcher/"));
    }

    #[test]
    fn test_layout_paths() {
        let layout = InstanceLayout::new("/opt/tomcat");
        assert_eq!(
            layout.control_script(),
            PathBuf::from("/opt/tomcat/bin/catalina.sh")
        );
        assert_eq!(
            layout.rotated_log("42"),
            PathBuf::from("/opt/tomcat/logs/catalina.out-pre-patch-42")
        );

        let files = layout.property_files();
        assert_eq!(files.len(), 4);
        assert_eq!(
            files.last().unwrap(),
            &PathBuf::from("/opt/tomcat/sakai/sakai.properties")
        );
    }
}
