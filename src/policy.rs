//! Containment policies.
//!
//! The extraction program is not trusted to honour its own flags. After it
//! exits, every entry it left in the destination directory is checked against
//! a [`PolicyChain`]; entries that violate a policy are deleted and recorded.

use std::fs;
use std::path::{Component, Path};

use path_jail::Jail;
use tracing::warn;
use walkdir::WalkDir;

use crate::error::Error;
use crate::format::FormatDescriptor;
use crate::limits::Limits;

/// What kind of filesystem object an extracted entry is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink { target: String },
    /// Fifo, socket, block or character device.
    Other { kind: String },
}

/// An entry found in a destination directory.
#[derive(Debug, Clone)]
pub struct EntryInfo {
    /// Path relative to the destination, `/`-separated.
    pub name: String,
    pub size: u64,
    pub kind: EntryKind,
}

/// State tracked during the audit for cumulative limit checks.
#[derive(Debug, Clone, Default)]
pub struct ExtractionState {
    /// Regular files kept so far.
    pub files_kept: usize,
    /// Directories kept so far.
    pub dirs_kept: usize,
    /// Bytes kept so far.
    pub bytes_kept: u64,
    /// Entries deleted for violating a policy.
    pub entries_removed: usize,
}

/// A security policy that validates entries.
pub trait Policy: Send + Sync {
    /// Returns `Ok(())` if the entry passes, or the violation.
    fn check(&self, entry: &EntryInfo, state: &ExtractionState) -> Result<(), Error>;
}

/// A chain of policies that all must pass.
pub struct PolicyChain {
    policies: Vec<Box<dyn Policy>>,
}

impl PolicyChain {
    pub fn new() -> Self {
        Self {
            policies: Vec::new(),
        }
    }

    /// Add a policy to the chain.
    pub fn with<P: Policy + 'static>(mut self, policy: P) -> Self {
        self.policies.push(Box::new(policy));
        self
    }

    /// Check all policies against an entry. The first violation wins.
    pub fn check_all(&self, entry: &EntryInfo, state: &ExtractionState) -> Result<(), Error> {
        for policy in &self.policies {
            policy.check(entry, state)?;
        }
        Ok(())
    }

    /// The standard chain for one destination directory.
    pub fn for_destination(
        destination: &Path,
        descriptor: &FormatDescriptor,
        limits: &Limits,
    ) -> Result<Self, Error> {
        Ok(PolicyChain::new()
            .with(EntryTypePolicy)
            .with(PathPolicy::new(destination)?)
            .with(ExclusionPolicy::new(descriptor.excluded_prefixes))
            .with(DepthPolicy::new(limits.max_path_depth))
            .with(SizePolicy::new(limits.max_single_file, limits.max_total_bytes))
            .with(CountPolicy::new(limits.max_file_count)))
    }
}

impl Default for PolicyChain {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Path Security Policy
// ============================================================================

/// Policy that rejects entries resolving outside the destination (Zip Slip).
pub struct PathPolicy {
    jail: Jail,
}

impl PathPolicy {
    pub fn new(destination: &Path) -> Result<Self, Error> {
        let jail = Jail::new(destination).map_err(|e| Error::PathEscape {
            entry: destination.display().to_string(),
            detail: e.to_string(),
        })?;
        Ok(Self { jail })
    }
}

impl Policy for PathPolicy {
    fn check(&self, entry: &EntryInfo, _state: &ExtractionState) -> Result<(), Error> {
        let escapes = Path::new(&entry.name)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(Error::PathEscape {
                entry: entry.name.clone(),
                detail: "non-normal path component".to_string(),
            });
        }

        self.jail.join(&entry.name).map_err(|e| Error::PathEscape {
            entry: entry.name.clone(),
            detail: e.to_string(),
        })?;

        Ok(())
    }
}

// ============================================================================
// Entry Type Policy
// ============================================================================

/// Policy that keeps only regular files and directories.
///
/// Symlinks are never kept, whatever they point at: a link that is harmless
/// now can be retargeted by a later extraction into the same tree.
pub struct EntryTypePolicy;

impl Policy for EntryTypePolicy {
    fn check(&self, entry: &EntryInfo, _state: &ExtractionState) -> Result<(), Error> {
        match &entry.kind {
            EntryKind::File | EntryKind::Directory => Ok(()),
            EntryKind::Symlink { target } => Err(Error::SymlinkNotAllowed {
                entry: entry.name.clone(),
                target: target.clone(),
            }),
            EntryKind::Other { kind } => Err(Error::UnsupportedEntryType {
                entry: entry.name.clone(),
                entry_type: kind.clone(),
            }),
        }
    }
}

// ============================================================================
// Exclusion Policy
// ============================================================================

/// Policy that removes subtrees the format says must not be extracted.
pub struct ExclusionPolicy {
    prefixes: &'static [&'static str],
}

impl ExclusionPolicy {
    pub fn new(prefixes: &'static [&'static str]) -> Self {
        Self { prefixes }
    }
}

impl Policy for ExclusionPolicy {
    fn check(&self, entry: &EntryInfo, _state: &ExtractionState) -> Result<(), Error> {
        for component in entry.name.split('/') {
            if let Some(prefix) = self.prefixes.iter().find(|p| component.starts_with(*p)) {
                return Err(Error::Excluded {
                    entry: entry.name.clone(),
                    pattern: format!("{}*", prefix),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Size Limits Policy
// ============================================================================

/// Policy that enforces size limits to defeat archive bombs.
pub struct SizePolicy {
    pub max_single_file: u64,
    pub max_total: u64,
}

impl SizePolicy {
    pub fn new(max_single_file: u64, max_total: u64) -> Self {
        Self {
            max_single_file,
            max_total,
        }
    }
}

impl Policy for SizePolicy {
    fn check(&self, entry: &EntryInfo, state: &ExtractionState) -> Result<(), Error> {
        if entry.kind != EntryKind::File {
            return Ok(());
        }

        if entry.size > self.max_single_file {
            return Err(Error::FileTooLarge {
                entry: entry.name.clone(),
                limit: self.max_single_file,
                size: entry.size,
            });
        }

        if state.bytes_kept + entry.size > self.max_total {
            return Err(Error::TotalSizeExceeded {
                limit: self.max_total,
                would_be: state.bytes_kept + entry.size,
            });
        }

        Ok(())
    }
}

// ============================================================================
// File Count Policy
// ============================================================================

/// Policy that enforces a maximum file count.
pub struct CountPolicy {
    pub max_files: usize,
}

impl CountPolicy {
    pub fn new(max_files: usize) -> Self {
        Self { max_files }
    }
}

impl Policy for CountPolicy {
    fn check(&self, entry: &EntryInfo, state: &ExtractionState) -> Result<(), Error> {
        if entry.kind == EntryKind::File && state.files_kept >= self.max_files {
            return Err(Error::FileCountExceeded {
                limit: self.max_files,
                attempted: state.files_kept + 1,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Path Depth Policy
// ============================================================================

/// Policy that enforces a maximum path depth.
pub struct DepthPolicy {
    pub max_depth: usize,
}

impl DepthPolicy {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }
}

impl Policy for DepthPolicy {
    fn check(&self, entry: &EntryInfo, _state: &ExtractionState) -> Result<(), Error> {
        let depth = Path::new(&entry.name).components().count();
        if depth > self.max_depth {
            return Err(Error::PathTooDeep {
                entry: entry.name.clone(),
                depth,
                limit: self.max_depth,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Audit
// ============================================================================

/// Result of auditing a destination directory.
#[derive(Debug, Default)]
pub struct Confinement {
    pub state: ExtractionState,
    /// One entry per deleted object, in traversal order.
    pub violations: Vec<Error>,
}

/// Audit `destination`, deleting every entry the chain rejects.
///
/// Traversal is depth-first in lexicographic order and never follows
/// symlinks. A rejected directory is removed with its whole subtree.
pub fn confine(destination: &Path, policies: &PolicyChain) -> Result<Confinement, Error> {
    let mut confinement = Confinement::default();
    let mut walk = WalkDir::new(destination)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    while let Some(next) = walk.next() {
        let entry = match next {
            Ok(entry) => entry,
            Err(e) => {
                // Unreadable subtree (e.g. mode 000 set by the archive).
                let Some(path) = e.path().map(Path::to_path_buf) else {
                    return Err(e.into());
                };
                warn!(path = %path.display(), error = %e, "removing unreadable entry");
                remove(&path)?;
                confinement.state.entries_removed += 1;
                confinement.violations.push(Error::Walk(e));
                continue;
            }
        };

        let info = entry_info(destination, entry.path(), entry.file_type())?;
        match policies.check_all(&info, &confinement.state) {
            Ok(()) => match info.kind {
                EntryKind::File => {
                    confinement.state.files_kept += 1;
                    confinement.state.bytes_kept += info.size;
                }
                EntryKind::Directory => confinement.state.dirs_kept += 1,
                _ => {}
            },
            Err(violation) => {
                warn!(entry = %info.name, %violation, "containment violation, entry removed");
                if entry.file_type().is_dir() {
                    walk.skip_current_dir();
                }
                remove(entry.path())?;
                confinement.state.entries_removed += 1;
                confinement.violations.push(violation);
            }
        }
    }

    Ok(confinement)
}

/// Files and bytes currently under `destination`. Best effort: unreadable
/// entries are skipped.
pub fn usage(destination: &Path) -> (usize, u64) {
    WalkDir::new(destination)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .fold((0, 0), |(files, bytes), e| {
            let size = e.metadata().map(|m| m.len()).unwrap_or(0);
            (files + 1, bytes + size)
        })
}

fn entry_info(destination: &Path, path: &Path, file_type: fs::FileType) -> Result<EntryInfo, Error> {
    let name = path
        .strip_prefix(destination)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    let kind = if file_type.is_symlink() {
        let target = fs::read_link(path)
            .map(|t| t.display().to_string())
            .unwrap_or_default();
        EntryKind::Symlink { target }
    } else if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other {
            kind: special_kind(&file_type).to_string(),
        }
    };

    let size = if kind == EntryKind::File {
        fs::symlink_metadata(path)?.len()
    } else {
        0
    };

    Ok(EntryInfo { name, size, kind })
}

#[cfg(unix)]
fn special_kind(file_type: &fs::FileType) -> &'static str {
    use std::os::unix::fs::FileTypeExt;
    if file_type.is_fifo() {
        "fifo"
    } else if file_type.is_socket() {
        "socket"
    } else if file_type.is_block_device() {
        "block device"
    } else if file_type.is_char_device() {
        "character device"
    } else {
        "unknown"
    }
}

#[cfg(not(unix))]
fn special_kind(_file_type: &fs::FileType) -> &'static str {
    "unknown"
}

fn remove(path: &Path) -> Result<(), Error> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        #[cfg(unix)]
        {
            // Re-open permissions so a hostile mode 000 cannot block removal.
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o700));
        }
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}
