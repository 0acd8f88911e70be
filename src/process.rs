// src/process.rs

//! Stopping and starting the service
//!
//! The control script does the graceful work. Anything that survives it is
//! found through a typed query of the OS process table and killed.

use crate::config::{InstanceLayout, Timings};
use crate::error::{Error, Result};
use crate::output::OutputLog;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use sysinfo::{
    Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System, UpdateKind,
};
use tracing::{debug, info, warn};

/// Executable name of the service's JVM
const SERVICE_EXECUTABLE: &str = "java";

/// JVM property naming the instance directory
const BASE_PROPERTY: &str = "-Dcatalina.base=";

/// Result of a stop attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// A matching process survived both kill passes
    StillRunning,
}

/// Lifecycle operations the orchestrator needs from the service
pub trait ServiceControl {
    /// Stop the service, killing it if the graceful stop is not enough
    fn stop(&self, output: &mut OutputLog) -> Result<StopOutcome>;

    /// Rotate the startup log aside and issue the start command
    fn start(&self, patch_id: &str, output: &mut OutputLog) -> Result<()>;
}

/// Identifies processes belonging to one instance
#[derive(Debug, Clone)]
pub struct ProcessQuery {
    root: PathBuf,
}

impl ProcessQuery {
    pub fn new(root: &Path) -> Self {
        let root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        Self { root }
    }

    fn is_instance_path(&self, path: &Path) -> bool {
        let resolved = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        resolved.starts_with(&self.root)
    }

    /// Does a process with these attributes belong to the instance?
    pub fn matches(&self, executable: &OsStr, cwd: Option<&Path>, args: &[OsString]) -> bool {
        if executable != SERVICE_EXECUTABLE {
            return false;
        }

        if cwd.is_some_and(|dir| self.is_instance_path(dir)) {
            return true;
        }

        args.iter().any(|arg| {
            arg.to_str()
                .and_then(|a| a.strip_prefix(BASE_PROPERTY))
                .is_some_and(|base| {
                    let base = Path::new(base.trim_end_matches('/'));
                    fs::canonicalize(base).unwrap_or_else(|_| base.to_path_buf()) == self.root
                })
        })
    }

    /// Live processes of the instance, excluding this agent
    pub fn find(&self, system: &mut System) -> Vec<Pid> {
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_exe(UpdateKind::Always)
                .with_cwd(UpdateKind::Always)
                .with_cmd(UpdateKind::Always),
        );
        let own_pid = sysinfo::get_current_pid().ok();

        system
            .processes()
            .iter()
            .filter(|(pid, _)| Some(**pid) != own_pid)
            .filter(|(_, process)| process.status() != ProcessStatus::Zombie)
            .filter(|(_, process)| {
                let executable = process
                    .exe()
                    .and_then(Path::file_name)
                    .unwrap_or_else(|| process.name());
                self.matches(executable, process.cwd(), process.cmd())
            })
            .map(|(pid, _)| *pid)
            .collect()
    }
}

/// Drives a Tomcat instance through its `bin/catalina.sh` script
pub struct CatalinaService {
    layout: InstanceLayout,
    timings: Timings,
    query: ProcessQuery,
}

impl CatalinaService {
    pub fn new(layout: InstanceLayout, timings: Timings) -> Self {
        let query = ProcessQuery::new(layout.root());
        Self {
            layout,
            timings,
            query,
        }
    }

    fn run_script(&self, args: &[&str], output: &mut OutputLog) -> Result<()> {
        let script = self.layout.control_script();
        let result = Command::new(&script)
            .args(args)
            .current_dir(self.layout.root())
            .output()
            .map_err(|source| Error::Command {
                command: format!("{} {}", script.display(), args.join(" ")),
                source,
            })?;

        debug!(
            "{} {}: {}",
            script.display(),
            args.join(" "),
            String::from_utf8_lossy(&result.stdout)
        );
        output.append_output(&result);

        if !result.status.success() {
            warn!("{} {} exited with {}", script.display(), args.join(" "), result.status);
        }
        Ok(())
    }

    /// Kill every surviving instance process, returning how many were signalled
    fn kill_survivors(&self, system: &mut System) -> usize {
        let pids = self.query.find(system);
        let mut killed = 0;
        for pid in pids {
            if let Some(process) = system.process(pid) {
                info!("Hard killing process {}", pid);
                if process.kill_with(Signal::Kill).unwrap_or_else(|| process.kill()) {
                    killed += 1;
                } else {
                    warn!("Could not signal process {}", pid);
                }
            }
        }
        killed
    }
}

impl ServiceControl for CatalinaService {
    fn stop(&self, output: &mut OutputLog) -> Result<StopOutcome> {
        if let Err(e) = self.run_script(&["stop", "12", "-force"], output) {
            warn!("Error when shutting down Tomcat: {}", e);
        }

        let mut system = System::new();
        thread::sleep(self.timings.stop_grace);
        self.kill_survivors(&mut system);
        thread::sleep(self.timings.kill_pause);
        self.kill_survivors(&mut system);
        thread::sleep(self.timings.kill_pause);

        let survivors = self.query.find(&mut system);
        if survivors.is_empty() {
            info!("Tomcat stopped");
            Ok(StopOutcome::Stopped)
        } else {
            warn!("Tomcat processes survived shutdown: {:?}", survivors);
            Ok(StopOutcome::StillRunning)
        }
    }

    fn start(&self, patch_id: &str, output: &mut OutputLog) -> Result<()> {
        rotate_log(&self.layout, patch_id);
        self.run_script(&["start"], output)?;
        info!("Tomcat start issued");
        Ok(())
    }
}

/// Move the previous startup log aside so readiness only sees fresh output
pub fn rotate_log(layout: &InstanceLayout, patch_id: &str) {
    let from = layout.startup_log();
    let to = layout.rotated_log(patch_id);
    match fs::rename(&from, &to) {
        Ok(()) => debug!("Rotated {} to {}", from.display(), to.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not rotate {}: {}", from.display(), e),
    }
}
