//! Request-scoped duplicate tracking.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// SHA-256 of `data`, lowercase hex.
pub fn fingerprint(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// SHA-256 and length of the file at `path`, read in a stream.
pub fn fingerprint_file(path: &Path) -> io::Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let size = io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok((hex::encode(hasher.finalize()), size))
}

/// Maps content fingerprints to the first file that produced them.
///
/// One index belongs to one top-level unpack request and all of its nested
/// extractions. It only grows: the first file in traversal order owns a
/// fingerprint for the rest of the request.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    seen: HashMap<String, PathBuf>,
}

impl DuplicateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `fingerprint` for `path` unless already present.
    ///
    /// Returns the path of the earlier file when `fingerprint` was seen
    /// before, `None` when this call inserted it.
    pub fn insert_if_absent(&mut self, fingerprint: &str, path: &Path) -> Option<&Path> {
        match self.seen.entry(fingerprint.to_string()) {
            Entry::Occupied(first) => Some(first.into_mut().as_path()),
            Entry::Vacant(slot) => {
                slot.insert(path.to_path_buf());
                None
            }
        }
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.seen.contains_key(fingerprint)
    }

    pub fn first_seen(&self, fingerprint: &str) -> Option<&Path> {
        self.seen.get(fingerprint).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
