//! Sandboxed, recursive archive unpacking for malware triage.
//!
//! A file is matched against a fixed registry of archive formats, extracted
//! by an external 7-Zip binary into a fresh directory under a timeout and
//! output quota, audited for escaping or oversized entries, and walked. Every
//! nested archive found is unpacked the same way; byte-identical files are
//! only processed once per request.

mod dedup;
mod detect;
mod error;
mod format;
mod handle;
mod isolation;
mod limits;
pub mod policy;
mod sandbox;
mod sniff;
mod unpacker;
mod walker;

#[cfg(feature = "async")]
#[path = "async_unpacker.rs"]
pub mod r#async;

pub use dedup::{fingerprint, DuplicateIndex};
pub use detect::{detect, Detection, Evidence};
pub use error::Error;
pub use format::{descriptors_for, Format, FormatDescriptor, REGISTRY};
pub use handle::FileHandle;
pub use isolation::write_confinement_supported;
pub use limits::Limits;
pub use sandbox::{resolve_program, ExtractionOutcome, Sandbox, Termination, PROGRAM_CANDIDATES};
pub use sniff::describe as sniff_magic;
pub use unpacker::{Unpacked, Unpacker};
pub use walker::{Node, NodeKind, Session, Stats, Walker};

/// Convenience function to unpack a file with the 7-Zip found on `PATH` and
/// default limits.
pub fn unpack_file<P: AsRef<std::path::Path>>(path: P) -> Result<Unpacked, Error> {
    Unpacker::new()?.unpack_file(path)
}
