// src/orchestrator.rs

//! One patch run, start to finish
//!
//! Stop the service, patch properties, evict and extract each archive, start
//! the service and wait for it to come up. The portal hears about the run
//! twice: a claim before anything destructive happens, and exactly one
//! terminal report.

use crate::archive::{ProtectedFiles, scan_archive};
use crate::config::{AgentConfig, InstanceLayout, Timings};
use crate::connectors::prune_duplicate_connectors;
use crate::error::{Error, Result};
use crate::eviction::{execute_plan, plan_eviction};
use crate::output::OutputLog;
use crate::portal::{Manifest, ReportSink};
use crate::process::{ServiceControl, StopOutcome};
use crate::properties::PropertyPatcher;
use crate::readiness::{Readiness, ReadinessMonitor};
use crate::transport::ArchiveSource;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// At most this many archives are applied per patch
const MAX_ARCHIVES: usize = 10;

/// A locator list this short is treated as empty
const MIN_FILES_FIELD: usize = 3;

/// One unit of work, fixed for the duration of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchDescriptor {
    pub patch_id: String,
    pub instance_root: PathBuf,
    pub archives: Vec<String>,
    pub properties: Option<String>,
}

impl PatchDescriptor {
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let archives = if manifest.files.trim().len() > MIN_FILES_FIELD {
            manifest
                .files
                .split_whitespace()
                .take(MAX_ARCHIVES)
                .map(str::to_string)
                .collect()
        } else {
            Vec::new()
        };

        let properties = Some(manifest.properties.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        Self {
            patch_id: manifest.patch_id.clone(),
            instance_root: PathBuf::from(&manifest.tomcat_dir),
            archives,
            properties,
        }
    }
}

/// Classification reported to the portal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Work has been claimed and is under way
    Claimed,
    /// Patched and started cleanly
    Success { startup_ms: i64 },
    /// The service did not come back up, or the patch could not be applied
    ServiceDown,
    /// The service could not be stopped
    NoShutdown,
    /// A known transient condition; try again later
    Deferred,
}

impl Outcome {
    /// Code sent as `result_value`
    pub fn code(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "1",
            Outcome::ServiceDown => "2",
            Outcome::NoShutdown => "4",
            Outcome::Deferred => "8",
            Outcome::Claimed => "10",
        }
    }

    /// Value sent as `start_uptime`
    pub fn startup_field(&self) -> String {
        match self {
            Outcome::Claimed => "0".to_string(),
            Outcome::Success { startup_ms } => startup_ms.to_string(),
            _ => "-1".to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

impl From<Readiness> for Outcome {
    fn from(readiness: Readiness) -> Self {
        match readiness {
            Readiness::Ready(startup_ms) => Outcome::Success { startup_ms },
            Readiness::Deferred => Outcome::Deferred,
            Readiness::Failed(_) => Outcome::ServiceDown,
        }
    }
}

/// Check the instance exists and belongs to the user running the agent
pub fn verify_instance(layout: &InstanceLayout) -> Result<()> {
    if !layout.root().is_dir() {
        return Err(Error::InstanceNotFound(layout.root().to_path_buf()));
    }

    let script = layout.control_script();
    let owner = fs::metadata(&script)
        .map_err(|_| Error::ControlScriptMissing(script.clone()))?
        .uid();
    let patcher = nix::unistd::geteuid().as_raw();
    debug!("Instance owned by uid {}, patcher uid {}", owner, patcher);

    if owner != patcher {
        return Err(Error::OwnershipMismatch { owner, patcher });
    }
    Ok(())
}

/// Sequences a patch run against one instance
pub struct Orchestrator<'a, R: ReportSink, A: ArchiveSource> {
    config: &'a AgentConfig,
    reporter: &'a R,
    source: &'a A,
    timings: Timings,
    protected: ProtectedFiles,
}

impl<'a, R: ReportSink, A: ArchiveSource> Orchestrator<'a, R, A> {
    pub fn new(config: &'a AgentConfig, reporter: &'a R, source: &'a A, timings: Timings) -> Self {
        Self {
            config,
            reporter,
            source,
            timings,
            protected: ProtectedFiles::default(),
        }
    }

    pub fn with_protected(mut self, protected: ProtectedFiles) -> Self {
        self.protected = protected;
        self
    }

    /// Run one patch end to end and report its outcome
    ///
    /// Setup errors return before the claim is sent. Errors after the claim
    /// are reported as `ServiceDown` and then returned.
    pub fn run(
        &self,
        descriptor: &PatchDescriptor,
        service: &impl ServiceControl,
    ) -> Result<Outcome> {
        let layout = InstanceLayout::new(&descriptor.instance_root);
        verify_instance(&layout)?;

        self.reporter
            .report(&Outcome::Claimed, &descriptor.patch_id, "")?;
        info!("Claimed patch {} for {}", descriptor.patch_id, layout.root().display());

        let mut output = OutputLog::new();
        match self.execute(descriptor, &layout, service, &mut output) {
            Ok(outcome) => {
                info!("Patch {} finished: {:?}", descriptor.patch_id, outcome);
                self.reporter
                    .report(&outcome, &descriptor.patch_id, output.as_str())?;
                Ok(outcome)
            }
            Err(e) => {
                error!("Patch {} failed: {}", descriptor.patch_id, e);
                output.append(&format!("Patch failed: {}", e));
                if let Err(report_err) =
                    self.reporter
                        .report(&Outcome::ServiceDown, &descriptor.patch_id, output.as_str())
                {
                    warn!("Could not report failure: {}", report_err);
                }
                Err(e)
            }
        }
    }

    fn execute(
        &self,
        descriptor: &PatchDescriptor,
        layout: &InstanceLayout,
        service: &impl ServiceControl,
        output: &mut OutputLog,
    ) -> Result<Outcome> {
        if service.stop(output)? == StopOutcome::StillRunning {
            return Ok(Outcome::NoShutdown);
        }

        if let Some(properties) = &descriptor.properties {
            let applied = PropertyPatcher::new(layout.property_files())
                .apply(properties, &descriptor.patch_id)?;
            info!("Applied {} property changes", applied);
        }

        for locator in &descriptor.archives {
            self.apply_archive(locator, layout.root())?;
        }

        prune_duplicate_connectors(layout);

        service.start(&descriptor.patch_id, output)?;

        let monitor = ReadinessMonitor::new(
            &layout.startup_log(),
            &self.config.defer_signature,
            self.config.startup_wait,
            self.timings,
        );
        Ok(monitor.wait().into())
    }

    /// Dry scan, evict, then extract one archive
    pub fn apply_archive(&self, locator: &str, root: &Path) -> Result<()> {
        let archive = self.source.resolve(locator, root)?;
        info!("Applying archive {}", archive.display());

        let bucket = scan_archive(&archive, root, &self.protected, false)?;
        let plan = plan_eviction(&bucket);
        execute_plan(&plan, root)?;
        scan_archive(&archive, root, &self.protected, true)?;
        Ok(())
    }
}
