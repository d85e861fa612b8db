use std::time::Duration;

/// Resource ceilings applied to every extraction of a request.
///
/// The byte and file-count ceilings are enforced twice: while the extraction
/// program runs (the process group is killed once they are crossed) and by the
/// post-extraction audit, which removes whatever exceeds them.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Maximum total bytes written by a single extraction.
    pub max_total_bytes: u64,
    /// Maximum number of files written by a single extraction.
    pub max_file_count: usize,
    /// Maximum size of any one extracted file.
    pub max_single_file: u64,
    /// Maximum number of path components below the destination.
    pub max_path_depth: usize,
    /// Wall-clock budget for one run of the extraction program.
    pub timeout: Duration,
    /// How many archives deep the walker recurses before treating nested
    /// archives as leaves.
    pub max_nesting: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_total_bytes: 1024 * 1024 * 1024,
            max_file_count: 10_000,
            max_single_file: 512 * 1024 * 1024,
            max_path_depth: 64,
            timeout: Duration::from_secs(60),
            max_nesting: 8,
        }
    }
}
