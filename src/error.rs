// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// How far a failure gets before the run is abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Environment or configuration mistake; nothing has been claimed or touched yet
    Setup,
    /// The instance may already be stopped or partially patched; a terminal report is owed
    MidRun,
}

/// Core error types for the patcher
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Instance root does not exist on this host
    #[error("Instance directory does not exist: {0}")]
    InstanceNotFound(PathBuf),

    /// Instance has no control script to inspect or run
    #[error("Control script not found: {0}")]
    ControlScriptMissing(PathBuf),

    /// The agent does not own the instance's files
    #[error("Instance owned by uid {owner}, patcher runs as uid {patcher}")]
    OwnershipMismatch { owner: u32, patcher: u32 },

    /// Archive could not be opened or decoded
    #[error("Could not read archive {path}: {reason}")]
    ArchiveRead { path: PathBuf, reason: String },

    /// Archive could not be located locally or remotely
    #[error("Could not find the patch file: {0}")]
    ArchiveNotFound(String),

    /// Directory creation during extraction failed
    #[error("Could not create directory {path}: {source}")]
    ArchiveWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Removing a stale directory failed
    #[error("Could not remove {path}: {source}")]
    Eviction {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing a property file failed
    #[error("Property file {path}: {source}")]
    PropertyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Control script could not be run
    #[error("Could not run {command}: {source}")]
    Command {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// HTTP errors talking to the portal or the archive host
    #[error("Download error: {0}")]
    DownloadError(String),

    /// Downloaded archive is shorter than advertised
    #[error("Truncated transfer of {url}: expected {expected} bytes, got {actual}")]
    TruncatedTransfer {
        url: String,
        expected: u64,
        actual: u64,
    },

    /// Portal returned something we cannot use
    #[error("Invalid manifest: {0}")]
    Manifest(String),
}

impl Error {
    /// Classify the error for the orchestrator's abort/report decision
    pub fn severity(&self) -> Severity {
        match self {
            Error::InstanceNotFound(_)
            | Error::ControlScriptMissing(_)
            | Error::OwnershipMismatch { .. }
            | Error::Manifest(_) => Severity::Setup,
            _ => Severity::MidRun,
        }
    }
}

/// Result type alias using the patcher's Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_errors() {
        assert_eq!(
            Error::InstanceNotFound(PathBuf::from("/opt/tomcat")).severity(),
            Severity::Setup
        );
        assert_eq!(
            Error::OwnershipMismatch { owner: 0, patcher: 1000 }.severity(),
            Severity::Setup
        );
    }

    #[test]
    fn test_mid_run_errors() {
        let err = Error::Eviction {
            path: PathBuf::from("components/foo"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert_eq!(err.severity(), Severity::MidRun);
        assert!(err.to_string().contains("components/foo"));
    }
}
