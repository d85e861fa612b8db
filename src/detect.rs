//! Format detection.
//!
//! Picks at most one descriptor per file. Rules are applied as passes over
//! the registry, each pass in registry order:
//!
//! 1. declared filename extension
//! 2. magic description substring
//! 3. literal leading bytes
//!
//! A descriptor whose exclusion markers are all present in the content is
//! never selected, whichever pass would have matched it.

use tracing::debug;

use crate::error::Error;
use crate::format::{self, FormatDescriptor, LEADING_WINDOW};
use crate::handle::FileHandle;

/// Which rule selected a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    Extension,
    Magic,
    LeadingBytes,
}

/// A successful detection.
#[derive(Debug, Clone, Copy)]
pub struct Detection {
    pub descriptor: &'static FormatDescriptor,
    pub evidence: Evidence,
}

/// Detect the archive format of `handle`.
///
/// Returns `Ok(None)` for anything that is not a registered archive; callers
/// pass such files through untouched. Reading never consumes the handle, so
/// the same handle can be extracted afterwards.
pub fn detect(handle: &FileHandle) -> Result<Option<Detection>, Error> {
    let candidates = format::descriptors_for(handle)?;
    if candidates.is_empty() {
        return Ok(None);
    }

    let mut eligible = Vec::with_capacity(candidates.len());
    for descriptor in candidates {
        if !descriptor.exclusions.is_empty() && descriptor.is_excluded(handle.contents()?) {
            debug!(format = descriptor.name, name = ?handle.name(), "format vetoed by exclusion markers");
            continue;
        }
        eligible.push(descriptor);
    }

    if let Some(name) = handle.name() {
        if let Some(d) = eligible.iter().copied().find(|d| d.matches_extension(name)) {
            return Ok(Some(found(d, Evidence::Extension)));
        }
    }

    if let Some(magic) = handle.magic()? {
        if let Some(d) = eligible.iter().copied().find(|d| d.matches_magic(magic)) {
            return Ok(Some(found(d, Evidence::Magic)));
        }
    }

    let head = handle.head(LEADING_WINDOW)?;
    if let Some(d) = eligible.iter().copied().find(|d| d.matches_leading_bytes(&head)) {
        return Ok(Some(found(d, Evidence::LeadingBytes)));
    }

    Ok(None)
}

fn found(descriptor: &'static FormatDescriptor, evidence: Evidence) -> Detection {
    debug!(format = descriptor.name, ?evidence, "format detected");
    Detection {
        descriptor,
        evidence,
    }
}
