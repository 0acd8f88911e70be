// src/archive/mod.rs

//! Patch archive scanning and extraction
//!
//! A single traversal routine serves two purposes. With `write_files` off it
//! only counts regular files per installation group, so eviction can be
//! planned from complete knowledge of the incoming content. With
//! `write_files` on it also materializes every entry under the instance root.
//! Both passes share the same bucket logic so eviction and installation agree
//! on what a group is.

pub mod protected;

pub use protected::ProtectedFiles;

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path};
use tar::Archive;
use tracing::{debug, warn};
use xz2::read::XzDecoder;

/// Directories whose jars are tracked one by one
pub const LIBRARY_DIRS: [&str; 3] = ["shared/lib/", "common/lib/", "lib/"];

/// Suffix of versioned shared-library files
pub const LIBRARY_SUFFIX: &str = ".jar";

/// Entries must be longer than this to take part in bucket accounting
const MIN_GROUPED_PATH: &str = "components/a";

/// Archive compression, detected from the file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
    Xz,
}

impl Compression {
    pub fn detect(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if name.ends_with(".gz") || name.ends_with(".tgz") {
            Compression::Gzip
        } else if name.ends_with(".zst") {
            Compression::Zstd
        } else if name.ends_with(".xz") {
            Compression::Xz
        } else {
            Compression::None
        }
    }
}

/// Regular-file counts per installation group
///
/// Keys are the first two path segments of an entry, except for versioned
/// shared libraries, which are keyed by their full path with a count of one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryBucket {
    groups: BTreeMap<String, u32>,
}

impl EntryBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one regular-file entry
    pub fn record(&mut self, entry_path: &str) {
        if entry_path.len() <= MIN_GROUPED_PATH.len() {
            return;
        }

        if is_library_path(entry_path) {
            self.groups.insert(entry_path.to_string(), 1);
        } else if let Some(group) = group_key(entry_path) {
            *self.groups.entry(group).or_insert(0) += 1;
        }
    }

    pub fn get(&self, group: &str) -> Option<u32> {
        self.groups.get(group).copied()
    }

    /// Groups in sorted order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.groups.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// First two path segments, if the path has at least two
pub fn group_key(entry_path: &str) -> Option<String> {
    let mut parts = entry_path.split('/');
    match (parts.next(), parts.next()) {
        (Some(first), Some(second)) => Some(format!("{}/{}", first, second)),
        _ => None,
    }
}

/// Is this a jar living directly in one of the shared library trees?
pub fn is_library_path(entry_path: &str) -> bool {
    LIBRARY_DIRS.iter().any(|dir| entry_path.starts_with(dir))
        && entry_path.ends_with(LIBRARY_SUFFIX)
}

/// Strip a leading `./` and reject paths that could escape the instance root
pub fn normalize_entry_path(raw: &str) -> Option<String> {
    let trimmed = raw.strip_prefix("./").unwrap_or(raw);
    let trimmed = trimmed.trim_end_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        return None;
    }

    let escapes = Path::new(trimmed)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return None;
    }

    Some(trimmed.to_string())
}

/// Open an archive, decompressing according to its extension
fn open_archive(path: &Path) -> Result<Archive<Box<dyn Read>>> {
    let file = File::open(path).map_err(|e| read_error(path, e))?;

    let reader: Box<dyn Read> = match Compression::detect(path) {
        Compression::None => Box::new(file),
        Compression::Gzip => Box::new(GzDecoder::new(file)),
        Compression::Xz => Box::new(XzDecoder::new(file)),
        Compression::Zstd => {
            let decoder = zstd::Decoder::new(file).map_err(|e| read_error(path, e))?;
            Box::new(decoder)
        }
    };

    Ok(Archive::new(reader))
}

fn read_error(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::ArchiveRead {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Walk every entry of `archive_path`, optionally writing it under `root`
///
/// Returns the bucket counts for the archive. Per-entry write failures are
/// logged and skipped; a corrupt archive stream or a directory that cannot be
/// created aborts the scan.
pub fn scan_archive(
    archive_path: &Path,
    root: &Path,
    protected: &ProtectedFiles,
    write_files: bool,
) -> Result<EntryBucket> {
    debug!(
        "Scanning archive {} (write_files={})",
        archive_path.display(),
        write_files
    );

    let mut archive = open_archive(archive_path)?;
    let mut bucket = EntryBucket::new();

    for entry in archive
        .entries()
        .map_err(|e| read_error(archive_path, e))?
    {
        let mut entry = entry.map_err(|e| read_error(archive_path, e))?;

        let raw_path = entry
            .path()
            .map_err(|e| read_error(archive_path, e))?
            .to_string_lossy()
            .into_owned();
        let mode = entry.header().mode().unwrap_or(0o644) & 0o7777;
        let entry_type = entry.header().entry_type();

        let Some(rel_path) = normalize_entry_path(&raw_path) else {
            if raw_path.trim_start_matches("./").trim_end_matches('/').is_empty() {
                continue;
            }
            warn!("Skipping archive entry outside the instance: {}", raw_path);
            continue;
        };

        if entry_type.is_dir() {
            if write_files {
                create_directory(&root.join(&rel_path), mode)?;
            }
        } else if entry_type.is_file() {
            bucket.record(&rel_path);

            if protected.should_skip(&rel_path, root) {
                debug!("Keeping customized file: {}", rel_path);
                continue;
            }

            if write_files {
                let target = root.join(&rel_path);
                match write_file(&mut entry, &target, mode) {
                    Ok(bytes) => debug!("Extracted {} ({} bytes)", rel_path, bytes),
                    Err(e) => warn!("Could not extract {}: {}", rel_path, e),
                }
            }
        } else {
            warn!(
                "Unsupported entry type {:?} for {}",
                entry_type, rel_path
            );
        }
    }

    debug!("Archive {} has {} groups", archive_path.display(), bucket.len());
    Ok(bucket)
}

fn create_directory(path: &Path, mode: u32) -> Result<()> {
    if path.exists() {
        return Ok(());
    }

    fs::create_dir_all(path).map_err(|source| Error::ArchiveWrite {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Created directory {}", path.display());

    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        warn!("Could not chmod directory {}: {}", path.display(), e);
    }
    Ok(())
}

fn write_file(content: &mut impl Read, target: &Path, mode: u32) -> io::Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = File::create(target)?;
    let bytes = io::copy(content, &mut file)?;
    fs::set_permissions(target, fs::Permissions::from_mode(mode))?;
    Ok(bytes)
}
