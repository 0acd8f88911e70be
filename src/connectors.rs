// src/connectors.rs

//! Duplicate JDBC driver cleanup
//!
//! When the shared Tomcat installation (`CATALINA_HOME`) already ships a MySQL
//! connector, copies in the instance's own `lib/` would load a second driver.

use crate::config::InstanceLayout;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MYSQL_CONNECTOR: &str = "mysql-connector";
const MARIADB_CONNECTOR: &str = "mariadb";

/// `CATALINA_HOME` as assigned in a setenv script
pub fn catalina_home(setenv: &str) -> Option<PathBuf> {
    setenv.lines().find_map(|line| {
        let line = line.trim().trim_start_matches("export ").trim();
        let (name, value) = line.split_once('=')?;
        if name.trim() != "CATALINA_HOME" {
            return None;
        }
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        (!value.is_empty()).then(|| PathBuf::from(value))
    })
}

fn file_names(dir: &Path) -> Vec<String> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(e) => {
            debug!("Could not read {}: {}", dir.display(), e);
            Vec::new()
        }
    }
}

/// Remove instance-local connectors shadowed by the shared installation
///
/// Returns the number of files removed.
pub fn prune_duplicate_connectors(layout: &InstanceLayout) -> usize {
    let setenv = match fs::read_to_string(layout.setenv_script()) {
        Ok(content) => content,
        Err(e) => {
            debug!("No setenv script to inspect: {}", e);
            return 0;
        }
    };

    let Some(home) = catalina_home(&setenv) else {
        return 0;
    };

    let shared_has_connector = file_names(&home.join("lib"))
        .iter()
        .any(|name| name.contains(MYSQL_CONNECTOR));
    if !shared_has_connector {
        return 0;
    }

    let lib_dir = layout.lib_dir();
    let mut removed = 0;
    for name in file_names(&lib_dir) {
        if name.contains(MYSQL_CONNECTOR) || name.contains(MARIADB_CONNECTOR) {
            let path = lib_dir.join(&name);
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!("Removed duplicate connector {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("Could not remove {}: {}", path.display(), e),
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalina_home_parsing() {
        let script = "JAVA_OPTS=-Xmx2g\nexport CATALINA_HOME=\"/opt/tomcat-9\"\n";
        assert_eq!(catalina_home(script), Some(PathBuf::from("/opt/tomcat-9")));
        assert_eq!(catalina_home("CATALINA_BASE=/x\n"), None);
    }

    #[test]
    fn test_prunes_when_shared_connector_present() {
        let home = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(home.path().join("lib")).unwrap();
        fs::write(home.path().join("lib/mysql-connector-j-8.0.33.jar"), "").unwrap();

        let layout = InstanceLayout::new(root.path());
        fs::create_dir_all(root.path().join("bin")).unwrap();
        fs::create_dir_all(layout.lib_dir()).unwrap();
        fs::write(
            layout.setenv_script(),
            format!("CATALINA_HOME={}\n", home.path().display()),
        )
        .unwrap();
        for name in [
            "mysql-connector-java-5.1.49.jar",
            "mariadb-java-client-2.7.jar",
            "ojdbc8.jar",
        ] {
            fs::write(layout.lib_dir().join(name), "").unwrap();
        }

        assert_eq!(prune_duplicate_connectors(&layout), 2);
        assert_eq!(file_names(&layout.lib_dir()), vec!["ojdbc8.jar".to_string()]);
    }

    #[test]
    fn test_keeps_local_connector_without_shared_one() {
        let home = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let layout = InstanceLayout::new(root.path());
        fs::create_dir_all(root.path().join("bin")).unwrap();
        fs::create_dir_all(layout.lib_dir()).unwrap();
        fs::write(
            layout.setenv_script(),
            format!("CATALINA_HOME={}\n", home.path().display()),
        )
        .unwrap();
        fs::write(layout.lib_dir().join("mysql-connector-java-5.1.49.jar"), "").unwrap();

        assert_eq!(prune_duplicate_connectors(&layout), 0);
        assert!(layout.lib_dir().join("mysql-connector-java-5.1.49.jar").exists());
    }

    #[test]
    fn test_missing_setenv_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(prune_duplicate_connectors(&InstanceLayout::new(root.path())), 0);
    }
}
