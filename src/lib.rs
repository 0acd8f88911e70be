// src/lib.rs

//! Tomcat Patcher
//!
//! Unattended host agent that applies a versioned patch to a running Tomcat
//! instance, restarts it and verifies that it came back up.
//!
//! # Architecture
//!
//! - Portal-driven: a manifest names the patch, the instance and its archives
//! - Two-pass archives: a dry scan plans eviction, a second pass extracts
//! - Property injection: stale keys commented out, new value written once
//! - Lifecycle: stop, patch, start, then poll the startup log for a verdict

pub mod archive;
pub mod config;
pub mod connectors;
mod error;
pub mod eviction;
pub mod netinfo;
pub mod orchestrator;
pub mod output;
pub mod portal;
pub mod process;
pub mod properties;
pub mod readiness;
pub mod transport;

pub use error::{Error, Result, Severity};
