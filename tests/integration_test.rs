// tests/integration_test.rs

//! Integration tests for the patcher
//!
//! These tests drive whole patch runs against scratch instance directories,
//! with the service and the portal replaced by in-memory fakes.

use flate2::Compression;
use flate2::write::GzEncoder;
use std::cell::RefCell;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tomcat_patcher::config::{AgentConfig, InstanceLayout, Timings};
use tomcat_patcher::orchestrator::{Orchestrator, Outcome, PatchDescriptor};
use tomcat_patcher::output::OutputLog;
use tomcat_patcher::portal::ReportSink;
use tomcat_patcher::process::{ServiceControl, StopOutcome};
use tomcat_patcher::readiness::{Readiness, ReadinessMonitor};
use tomcat_patcher::transport::ArchiveSource;
use tomcat_patcher::{Error, Result};

struct LocalFiles;

impl ArchiveSource for LocalFiles {
    fn resolve(&self, locator: &str, base: &Path) -> Result<PathBuf> {
        let path = base.join(locator);
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::ArchiveNotFound(locator.to_string()))
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    reports: RefCell<Vec<(Outcome, String)>>,
}

impl ReportSink for RecordingSink {
    fn report(&self, outcome: &Outcome, patch_id: &str, _output: &str) -> Result<()> {
        self.reports
            .borrow_mut()
            .push((*outcome, patch_id.to_string()));
        Ok(())
    }
}

/// Writes a canned startup log when started
struct ScriptedTomcat {
    log: PathBuf,
    startup_output: String,
}

impl ServiceControl for ScriptedTomcat {
    fn stop(&self, _output: &mut OutputLog) -> Result<StopOutcome> {
        Ok(StopOutcome::Stopped)
    }

    fn start(&self, _patch_id: &str, output: &mut OutputLog) -> Result<()> {
        fs::create_dir_all(self.log.parent().unwrap())?;
        fs::write(&self.log, &self.startup_output)?;
        output.append("Tomcat started.");
        Ok(())
    }
}

fn instance() -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir_all(root.path().join("bin")).unwrap();
    fs::write(root.path().join("bin/catalina.sh"), "#!/bin/sh\n").unwrap();
    root
}

fn write_tree(root: &Path, files: &[&str]) {
    for rel in files {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, format!("old {}", rel)).unwrap();
    }
}

fn build_archive(dir: &Path, name: &str, files: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for rel in files {
        let content = format!("new {}", rel);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(content.len() as u64);
        builder
            .append_data(&mut header, rel, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
    path
}

fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn config() -> AgentConfig {
    let mut config = AgentConfig::new("token");
    config.startup_wait = Duration::from_millis(5);
    config
}

#[test]
fn test_component_group_is_replaced() {
    let root = instance();
    let work = tempfile::tempdir().unwrap();
    write_tree(
        root.path(),
        &[
            "components/foo-pack/WEB-INF/a.xml",
            "components/foo-pack/WEB-INF/b.xml",
            "components/foo-pack/WEB-INF/lib/foo-api-1.0.jar",
            "components/foo-pack/WEB-INF/lib/foo-impl-1.0.jar",
            "components/foo-pack/WEB-INF/lib/stale-9.jar",
        ],
    );
    let archive = build_archive(
        work.path(),
        "foo.tar.gz",
        &[
            "components/foo-pack/WEB-INF/a.xml",
            "components/foo-pack/WEB-INF/b.xml",
            "components/foo-pack/WEB-INF/c.xml",
            "components/foo-pack/WEB-INF/lib/foo-api-2.0.jar",
            "components/foo-pack/WEB-INF/lib/foo-impl-2.0.jar",
        ],
    );

    let config = config();
    let sink = RecordingSink::default();
    let orchestrator = Orchestrator::new(&config, &sink, &LocalFiles, Timings::immediate());
    orchestrator
        .apply_archive(archive.to_str().unwrap(), root.path())
        .unwrap();

    let pack = root.path().join("components/foo-pack/WEB-INF");
    assert_eq!(listing(&pack), vec!["a.xml", "b.xml", "c.xml", "lib"]);
    assert_eq!(
        listing(&pack.join("lib")),
        vec!["foo-api-2.0.jar", "foo-impl-2.0.jar"]
    );
    assert_eq!(
        fs::read_to_string(pack.join("a.xml")).unwrap(),
        "new components/foo-pack/WEB-INF/a.xml"
    );
}

#[test]
fn test_small_component_group_is_merged() {
    let root = instance();
    let work = tempfile::tempdir().unwrap();
    write_tree(root.path(), &["components/small-pack/keep.xml"]);
    let archive = build_archive(
        work.path(),
        "small.tar.gz",
        &[
            "components/small-pack/a.xml",
            "components/small-pack/b.xml",
            "components/small-pack/c.xml",
        ],
    );

    let config = config();
    let sink = RecordingSink::default();
    let orchestrator = Orchestrator::new(&config, &sink, &LocalFiles, Timings::immediate());
    orchestrator
        .apply_archive(archive.to_str().unwrap(), root.path())
        .unwrap();

    assert_eq!(
        listing(&root.path().join("components/small-pack")),
        vec!["a.xml", "b.xml", "c.xml", "keep.xml"]
    );
}

#[test]
fn test_exploded_webapp_is_removed() {
    let root = instance();
    let work = tempfile::tempdir().unwrap();
    write_tree(
        root.path(),
        &[
            "webapps/bar/index.jsp",
            "webapps/bar/WEB-INF/web.xml",
            "webapps/baz/index.jsp",
        ],
    );
    let archive = build_archive(work.path(), "bar.tar.gz", &["webapps/bar.war"]);

    let config = config();
    let sink = RecordingSink::default();
    let orchestrator = Orchestrator::new(&config, &sink, &LocalFiles, Timings::immediate());
    orchestrator
        .apply_archive(archive.to_str().unwrap(), root.path())
        .unwrap();

    assert_eq!(listing(&root.path().join("webapps")), vec!["bar.war", "baz"]);
}

#[test]
fn test_old_library_versions_are_replaced() {
    let root = instance();
    let work = tempfile::tempdir().unwrap();
    write_tree(root.path(), &["lib/commons-text-1.9.jar", "lib/commons-io-2.11.0.jar"]);
    let archive = build_archive(work.path(), "libs.tar.gz", &["lib/commons-text-1.11.0.jar"]);

    let config = config();
    let sink = RecordingSink::default();
    let orchestrator = Orchestrator::new(&config, &sink, &LocalFiles, Timings::immediate());
    orchestrator
        .apply_archive(archive.to_str().unwrap(), root.path())
        .unwrap();

    // commons-text-*.*.*.jar does not match the two-part 1.9 name
    assert_eq!(
        listing(&root.path().join("lib")),
        vec![
            "commons-io-2.11.0.jar",
            "commons-text-1.11.0.jar",
            "commons-text-1.9.jar",
        ]
    );

    let archive = build_archive(work.path(), "libs2.tar.gz", &["lib/commons-io-2.16.1.jar"]);
    orchestrator
        .apply_archive(archive.to_str().unwrap(), root.path())
        .unwrap();
    assert!(!root.path().join("lib/commons-io-2.11.0.jar").exists());
    assert!(root.path().join("lib/commons-io-2.16.1.jar").exists());
}

#[test]
fn test_startup_marker_reports_duration() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("catalina.out");
    fs::write(
        &log,
        "INFO [main] Deployment of web application archive finished\n\
         INFO [main] org.apache.catalina.startup.Catalina.start Server startup in [4512] milliseconds\n",
    )
    .unwrap();

    let monitor = ReadinessMonitor::new(
        &log,
        "Migration checksum mismatch",
        Duration::from_secs(1),
        Timings::immediate(),
    );
    assert_eq!(monitor.wait(), Readiness::Ready(4512));
}

#[test]
fn test_transient_signature_defers() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("catalina.out");
    fs::write(
        &log,
        "ERROR FlywayException: Validate failed: Migration checksum mismatch for migration version 23\n\
         INFO Server startup in [9000] milliseconds\n",
    )
    .unwrap();

    let monitor = ReadinessMonitor::new(
        &log,
        "Migration checksum mismatch",
        Duration::from_secs(3600),
        Timings::immediate(),
    );
    assert_eq!(monitor.wait(), Readiness::Deferred);
}

#[test]
fn test_budget_exhausted_fails() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("catalina.out");
    fs::write(&log, "INFO still deploying\n").unwrap();

    let timings = Timings {
        poll_interval: Duration::from_millis(5),
        ..Timings::immediate()
    };
    let monitor = ReadinessMonitor::new(
        &log,
        "Migration checksum mismatch",
        Duration::from_millis(20),
        timings,
    );
    assert_eq!(monitor.wait(), Readiness::Failed(-1));
}

#[test]
fn test_full_patch_run() {
    let root = instance();
    let work = tempfile::tempdir().unwrap();
    write_tree(root.path(), &["webapps/bar/index.jsp"]);
    fs::create_dir_all(root.path().join("sakai")).unwrap();
    fs::write(root.path().join("sakai/sakai.properties"), "portal.cdn.version=100\n").unwrap();
    fs::create_dir_all(root.path().join("logs")).unwrap();
    fs::write(
        root.path().join("logs/catalina.out"),
        "Server startup in [1] milliseconds\n",
    )
    .unwrap();

    let archive = build_archive(work.path(), "bar.tar.gz", &["webapps/bar.war"]);
    let layout = InstanceLayout::new(root.path());
    let service = ScriptedTomcat {
        log: layout.startup_log(),
        startup_output: "Server startup in [4512] milliseconds\n".to_string(),
    };
    let descriptor = PatchDescriptor {
        patch_id: "63547".to_string(),
        instance_root: root.path().to_path_buf(),
        archives: vec![archive.to_string_lossy().into_owned()],
        properties: Some("portal.cdn.version=547".to_string()),
    };

    let config = config();
    let sink = RecordingSink::default();
    let orchestrator = Orchestrator::new(&config, &sink, &LocalFiles, Timings::immediate());
    let outcome = orchestrator.run(&descriptor, &service).unwrap();

    assert_eq!(outcome, Outcome::Success { startup_ms: 4512 });
    assert_eq!(
        *sink.reports.borrow(),
        vec![
            (Outcome::Claimed, "63547".to_string()),
            (Outcome::Success { startup_ms: 4512 }, "63547".to_string()),
        ]
    );
    assert!(!root.path().join("webapps/bar").exists());
    assert!(root.path().join("webapps/bar.war").exists());

    let props = fs::read_to_string(root.path().join("sakai/sakai.properties")).unwrap();
    assert!(props.contains("#portal.cdn.version=100"));
    assert!(props.ends_with("portal.cdn.version=547\n"));
}

#[test]
fn test_patch_run_deferred() {
    let root = instance();
    let layout = InstanceLayout::new(root.path());
    let service = ScriptedTomcat {
        log: layout.startup_log(),
        startup_output: "SEVERE Migration checksum mismatch\n".to_string(),
    };
    let descriptor = PatchDescriptor {
        patch_id: "8".to_string(),
        instance_root: root.path().to_path_buf(),
        archives: Vec::new(),
        properties: None,
    };

    let config = config();
    let sink = RecordingSink::default();
    let orchestrator = Orchestrator::new(&config, &sink, &LocalFiles, Timings::immediate());

    assert_eq!(orchestrator.run(&descriptor, &service).unwrap(), Outcome::Deferred);
    assert_eq!(sink.reports.borrow().len(), 2);
}
