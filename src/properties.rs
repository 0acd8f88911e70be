// src/properties.rs

//! Property injection across the instance's candidate property files
//!
//! Every uncommented line mentioning a changed key is commented out in every
//! existing candidate file, then the new `key=value` line is written once,
//! into the last existing candidate.
//!
//! Keys are found by substring containment, so changing `foo` also comments
//! out `foo.bar`. Files patched by earlier agents rely on this.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const COMMENT_MARKER: char = '#';

/// One `key=value` line from the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyChange {
    pub key: String,
    pub line: String,
}

impl PropertyChange {
    /// Parse a single change line; comments and lines without `=` yield nothing
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with(COMMENT_MARKER) {
            return None;
        }

        let (key, _) = line.split_once('=')?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }

        Some(Self {
            key: key.to_string(),
            line: line.to_string(),
        })
    }

    /// Parse raw newline-separated change text
    pub fn parse_all(raw: &str) -> Vec<Self> {
        raw.lines().filter_map(Self::parse).collect()
    }
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with(COMMENT_MARKER)
}

/// Applies property changes to an ordered set of candidate files
#[derive(Debug, Clone)]
pub struct PropertyPatcher {
    candidates: Vec<PathBuf>,
}

impl PropertyPatcher {
    /// `candidates` are ordered from least to most preferred write target
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }

    /// Apply every change in `raw`, returning how many were applied
    pub fn apply(&self, raw: &str, patch_id: &str) -> Result<usize> {
        let changes = PropertyChange::parse_all(raw);
        for change in &changes {
            self.apply_change(change, patch_id)?;
        }
        Ok(changes.len())
    }

    fn apply_change(&self, change: &PropertyChange, patch_id: &str) -> Result<()> {
        let existing: Vec<&PathBuf> = self.candidates.iter().filter(|p| p.is_file()).collect();
        let Some(target) = existing.last().copied() else {
            debug!("No property files exist; skipping {}", change.key);
            return Ok(());
        };

        for path in &existing {
            let is_target = *path == target;
            let content = read(path)?;
            let mut edit = comment_out(&content, change, is_target);

            if is_target && !edit.already_set {
                edit.lines.push(format!(
                    "{} Patch {} applied {}",
                    COMMENT_MARKER,
                    patch_id,
                    chrono::Local::now().format("%Y-%m-%d")
                ));
                edit.lines.push(change.line.clone());
                edit.modified = true;
                info!("Added {} to {}", change.line, path.display());
            }

            if edit.modified {
                let mut output = edit.lines.join("\n");
                output.push('\n');
                fs::write(path, output).map_err(|source| Error::PropertyFile {
                    path: (*path).clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

struct Edit {
    lines: Vec<String>,
    modified: bool,
    already_set: bool,
}

/// Comment out every active line mentioning the key
///
/// In the target file, the first line that already reads exactly as the
/// change is left active.
fn comment_out(content: &str, change: &PropertyChange, is_target: bool) -> Edit {
    let mut edit = Edit {
        lines: Vec::new(),
        modified: false,
        already_set: false,
    };

    for line in content.lines() {
        if !line.contains(&change.key) || is_comment(line) {
            edit.lines.push(line.to_string());
            continue;
        }

        if is_target && !edit.already_set && line.trim() == change.line {
            edit.already_set = true;
            edit.lines.push(line.to_string());
            continue;
        }

        debug!("Commenting out: {}", line);
        edit.lines.push(format!("{}{}", COMMENT_MARKER, line));
        edit.modified = true;
    }
    edit
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| Error::PropertyFile {
        path: path.to_path_buf(),
        source,
    })
}
