// src/eviction.rs

//! Removal of artifacts made stale by an incoming archive
//!
//! The plan is derived from the bucket produced by a dry scan of the same
//! archive that is about to be extracted, then executed before the write
//! pass runs.

use crate::archive::{EntryBucket, is_library_path};
use crate::error::{Error, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Root of modular component directories
const COMPONENTS_ROOT: &str = "components";

/// Root of deployed web applications
const WEBAPPS_ROOT: &str = "webapps";

/// Suffix of archived web applications
const WAR_SUFFIX: &str = ".war";

/// Components that carry operator configuration and are never wiped
const PROVIDER_PACK: &str = "sakai-provider-pack";

/// A component group is only wiped when the archive carries more files than this
const COMPONENT_FILE_THRESHOLD: u32 = 3;

/// Federated component whose arrival displaces its plain counterpart
const FEDERATED_REVIEW_PACK: &str = "sakai-content-review-pack-federated";
const PLAIN_REVIEW_PACK: &str = "components/sakai-content-review-pack";

/// Libraries whose names carry no version and are matched literally
const UNVERSIONED_LIBRARY_MARKER: &str = "gradebook2";

const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";

/// One removal step, relative to the instance root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictionAction {
    /// Remove a directory tree
    RemoveDir(PathBuf),
    /// Remove regular files matching a glob
    RemoveMatching(String),
}

/// Ordered removals for one archive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    actions: Vec<EvictionAction>,
}

impl EvictionPlan {
    pub fn actions(&self) -> &[EvictionAction] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn push(&mut self, action: EvictionAction) {
        if !self.actions.contains(&action) {
            self.actions.push(action);
        }
    }
}

/// Collapse every run of decimal digits to a single `*`
///
/// `jaxb-impl-2.3.3.jar` becomes `jaxb-impl-*.*.*.jar`.
pub fn replace_version_digits(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_digits = false;

    for c in name.chars() {
        if c.is_ascii_digit() {
            if !in_digits {
                out.push('*');
                in_digits = true;
            }
        } else {
            out.push(c);
            in_digits = false;
        }
    }
    out
}

/// Version-agnostic glob for a library path taken from an archive
pub fn library_glob(library_path: &str) -> String {
    let pattern = if library_path.contains(UNVERSIONED_LIBRARY_MARKER) {
        library_path.to_string()
    } else {
        replace_version_digits(library_path)
    };
    pattern.replacen(SNAPSHOT_SUFFIX, "", 1)
}

/// Only plain relative paths may be removed
fn is_confined(rel: &str) -> bool {
    !rel.is_empty()
        && Path::new(rel)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// Decide which installed paths the archive makes obsolete
pub fn plan_eviction(bucket: &EntryBucket) -> EvictionPlan {
    let mut plan = EvictionPlan::default();

    for (group, count) in bucket.iter() {
        if !is_confined(group) {
            warn!("Ignoring group outside the instance: {}", group);
            continue;
        }

        let is_component = group.starts_with(COMPONENTS_ROOT);
        let is_provider = group.contains(PROVIDER_PACK);

        if is_component && !is_provider && count > COMPONENT_FILE_THRESHOLD {
            plan.push(EvictionAction::RemoveDir(PathBuf::from(group)));
            if group.contains(FEDERATED_REVIEW_PACK) {
                plan.push(EvictionAction::RemoveDir(PathBuf::from(PLAIN_REVIEW_PACK)));
            }
        } else if group.starts_with(WEBAPPS_ROOT) && group.ends_with(WAR_SUFFIX) {
            let exploded = group.trim_end_matches(WAR_SUFFIX);
            plan.push(EvictionAction::RemoveDir(PathBuf::from(exploded)));
        } else if is_library_path(group) {
            plan.push(EvictionAction::RemoveMatching(library_glob(group)));
        }
    }

    debug!("Eviction plan: {:?}", plan.actions);
    plan
}

/// Carry out a plan under `root`
///
/// Directory removals that fail abort the run. Library matches that cannot
/// be removed are logged and skipped.
pub fn execute_plan(plan: &EvictionPlan, root: &Path) -> Result<()> {
    for action in plan.actions() {
        match action {
            EvictionAction::RemoveDir(rel) => remove_dir(root, rel)?,
            EvictionAction::RemoveMatching(pattern) => {
                let removed = remove_library_glob(root, pattern);
                debug!("Removed {} files matching {}", removed, pattern);
            }
        }
    }
    Ok(())
}

fn remove_dir(root: &Path, rel: &Path) -> Result<()> {
    let path = root.join(rel);
    match fs::remove_dir_all(&path) {
        Ok(()) => {
            info!("Removed stale directory {}", rel.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Nothing to remove at {}", rel.display());
            Ok(())
        }
        Err(source) => Err(Error::Eviction { path, source }),
    }
}

/// Remove every regular file under `root` matching `pattern`
///
/// Symbolic links are never removed, and neither is the file a matching link
/// points to, so a jar is never deleted through one of two equivalent paths.
/// Returns the number of files removed.
pub fn remove_library_glob(root: &Path, pattern: &str) -> usize {
    let full_pattern = format!(
        "{}/{}",
        glob::Pattern::escape(&root.to_string_lossy()),
        pattern
    );

    let matches: Vec<PathBuf> = match glob::glob(&full_pattern) {
        Ok(paths) => paths
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("Could not inspect glob match: {}", e);
                    None
                }
            })
            .collect(),
        Err(e) => {
            warn!("Invalid library pattern {}: {}", pattern, e);
            return 0;
        }
    };
    debug!("Found files matching {}: {:?}", pattern, matches);

    let canonical_root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let mut linked: HashSet<PathBuf> = HashSet::new();
    let mut candidates = Vec::new();

    for path in matches {
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) => {
                warn!("Could not stat {}: {}", path.display(), e);
                continue;
            }
        };

        if meta.file_type().is_symlink() {
            if let Ok(target) = fs::canonicalize(&path) {
                linked.insert(target);
            }
            debug!("Skipping link {}", path.display());
        } else if meta.is_file() {
            candidates.push(path);
        }
    }

    let mut removed = 0;
    for path in candidates {
        let resolved = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if linked.contains(&resolved) {
            debug!("Skipping link target {}", path.display());
            continue;
        }
        if !resolved.starts_with(&canonical_root) {
            warn!("Refusing to remove {} outside the instance", path.display());
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Removed old library {}", path.display());
                removed += 1;
            }
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
    removed
}
