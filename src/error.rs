use std::fmt;

/// Errors that can occur while detecting, extracting or walking an archive.
///
/// Only infrastructure failures are returned from the public operations. The
/// containment variants (`PathEscape`, `SymlinkNotAllowed`, ...) are recorded
/// on an [`ExtractionOutcome`](crate::ExtractionOutcome) as violations and the
/// offending entries are removed; they never abort a request.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in minor versions without breaking existing code. Always include a
/// catch-all `_ =>` arm when matching.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Extracted entry resolves outside the destination directory (Zip Slip).
    PathEscape { entry: String, detail: String },

    /// Extraction produced a symlink.
    SymlinkNotAllowed { entry: String, target: String },

    /// Extraction produced a device file, fifo or socket.
    UnsupportedEntryType { entry: String, entry_type: String },

    /// Entry matches a format-specific exclusion (e.g. a disk image's system subtree).
    Excluded { entry: String, pattern: String },

    /// Exceeded maximum total bytes.
    TotalSizeExceeded { limit: u64, would_be: u64 },

    /// Exceeded maximum file count.
    FileCountExceeded { limit: usize, attempted: usize },

    /// Single file exceeds size limit.
    FileTooLarge {
        entry: String,
        limit: u64,
        size: u64,
    },

    /// Path exceeds depth limit.
    PathTooDeep {
        entry: String,
        depth: usize,
        limit: usize,
    },

    /// No extraction program was configured and none was found on `PATH`.
    ProgramNotFound { candidates: String },

    /// The extraction program could not be started.
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The per-invocation destination directory could not be created.
    Workspace {
        path: String,
        source: std::io::Error,
    },

    /// The archive could not be written to a temporary source file.
    TempSource { source: std::io::Error },

    /// The file handle carries neither a path, bytes nor a reader.
    EmptyHandle,

    /// IO error.
    Io(std::io::Error),

    /// The kernel cannot confine the program's writes and confinement was
    /// required.
    ConfinementUnavailable { detail: String },

    /// Directory traversal error.
    Walk(walkdir::Error),
}

/// Format bytes in human-readable form (e.g., "1.5 GB").
pub(crate) fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

impl Error {
    /// Whether this error describes a containment violation rather than an
    /// infrastructure failure.
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            Self::PathEscape { .. }
                | Self::SymlinkNotAllowed { .. }
                | Self::UnsupportedEntryType { .. }
                | Self::Excluded { .. }
                | Self::TotalSizeExceeded { .. }
                | Self::FileCountExceeded { .. }
                | Self::FileTooLarge { .. }
                | Self::PathTooDeep { .. }
        )
    }

    /// Whether this violation means the output quota was exceeded.
    pub fn is_quota(&self) -> bool {
        matches!(
            self,
            Self::TotalSizeExceeded { .. } | Self::FileCountExceeded { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathEscape { entry, detail } => {
                write!(f, "path '{}' escapes destination: {}", entry, detail)
            }
            Self::SymlinkNotAllowed { entry, target } => {
                if target.is_empty() {
                    write!(f, "extraction produced symlink '{}' (removed)", entry)
                } else {
                    write!(
                        f,
                        "extraction produced symlink '{}' -> '{}' (removed)",
                        entry, target
                    )
                }
            }
            Self::UnsupportedEntryType { entry, entry_type } => {
                write!(
                    f,
                    "entry '{}' has unsupported type '{}' (device files, fifos, etc. are not allowed)",
                    entry, entry_type
                )
            }
            Self::Excluded { entry, pattern } => {
                write!(f, "entry '{}' matches exclusion '{}'", entry, pattern)
            }
            Self::TotalSizeExceeded { limit, would_be } => {
                write!(
                    f,
                    "extraction would write {}, exceeding the {} limit",
                    format_bytes(*would_be),
                    format_bytes(*limit)
                )
            }
            Self::FileCountExceeded { limit, attempted } => {
                write!(
                    f,
                    "extraction stopped at entry {}: would exceed {} file limit",
                    attempted, limit
                )
            }
            Self::FileTooLarge { entry, limit, size } => {
                write!(
                    f,
                    "file '{}' is {} (limit: {})",
                    entry,
                    format_bytes(*size),
                    format_bytes(*limit)
                )
            }
            Self::PathTooDeep {
                entry,
                depth,
                limit,
            } => {
                write!(
                    f,
                    "path '{}' has {} directory levels (limit: {})",
                    entry, depth, limit
                )
            }
            Self::ProgramNotFound { candidates } => {
                write!(f, "no extraction program found on PATH (tried {})", candidates)
            }
            Self::Spawn { program, source } => {
                write!(f, "failed to start '{}': {}", program, source)
            }
            Self::Workspace { path, source } => {
                write!(
                    f,
                    "cannot create destination directory under '{}': {}",
                    path, source
                )
            }
            Self::TempSource { source } => {
                write!(f, "cannot write temporary source file: {}", source)
            }
            Self::ConfinementUnavailable { detail } => {
                write!(f, "write confinement unavailable: {}", detail)
            }
            Self::EmptyHandle => write!(f, "file handle has no path, content or stream"),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Walk(e) => write!(f, "directory walk error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn { source, .. } => Some(source),
            Self::Workspace { source, .. } => Some(source),
            Self::TempSource { source } => Some(source),
            Self::Io(e) => Some(e),
            Self::Walk(e) => Some(e),
            _ => None,
        }
    }
}

// Automatic conversions for ease of use
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
impl From<walkdir::Error> for Error {
    fn from(e: walkdir::Error) -> Self {
        Self::Walk(e)
    }
}
