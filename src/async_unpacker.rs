//! Async unpack API (requires the `async` feature).
//!
//! Unpacking blocks on an external process, so each request runs in tokio's
//! blocking thread pool via [`tokio::task::spawn_blocking`]. Requests share no
//! state and can run concurrently.
//!
//! # Example
//!
//! ```no_run
//! use safe_unpack::r#async::AsyncUnpacker;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), safe_unpack::Error> {
//!     let unpacker = AsyncUnpacker::new()?.password("infected");
//!
//!     let (a, b) = tokio::join!(
//!         unpacker.unpack_file("first.zip"),
//!         unpacker.unpack_file("second.7z"),
//!     );
//!     println!("{} + {} files", a?.stats.files, b?.stats.files);
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};

use tokio::task::spawn_blocking;

use crate::{Error, FileHandle, Limits, Unpacked, Unpacker};

/// Async wrapper with the same containment guarantees as [`Unpacker`].
#[derive(Debug, Clone)]
pub struct AsyncUnpacker {
    inner: Unpacker,
}

impl AsyncUnpacker {
    /// Create an unpacker using the 7-Zip found on `PATH`.
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            inner: Unpacker::new()?,
        })
    }

    pub fn with_program<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            inner: Unpacker::with_program(program),
        }
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.inner = self.inner.limits(limits);
        self
    }

    pub fn scratch_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.inner = self.inner.scratch_dir(dir);
        self
    }

    pub fn password<S: Into<String>>(mut self, password: S) -> Self {
        self.inner = self.inner.password(password);
        self
    }

    pub fn require_confinement(mut self, required: bool) -> Self {
        self.inner = self.inner.require_confinement(required);
        self
    }

    /// Leave extracted paths matching any of these globs out of the tree.
    pub fn exclude_glob<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        self.inner = self.inner.exclude_glob(patterns);
        self
    }

    /// Unpack a file on disk.
    pub async fn unpack_file<P: AsRef<Path>>(&self, path: P) -> Result<Unpacked, Error> {
        let path = path.as_ref().to_path_buf();
        self.run(FileHandle::from_path(path)).await
    }

    /// Unpack in-memory content.
    pub async fn unpack_bytes<S: Into<String>>(
        &self,
        name: S,
        data: Vec<u8>,
    ) -> Result<Unpacked, Error> {
        self.run(FileHandle::from_bytes(data).with_name(name)).await
    }

    async fn run(&self, handle: FileHandle) -> Result<Unpacked, Error> {
        let unpacker = self.inner.clone();
        spawn_blocking(move || unpacker.unpack(handle))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }
}

/// Unpack a file with the 7-Zip found on `PATH` and default limits.
///
/// # Example
///
/// ```no_run
/// use safe_unpack::r#async::unpack_file;
///
/// #[tokio::main]
/// async fn main() -> Result<(), safe_unpack::Error> {
///     let unpacked = unpack_file("sample.zip").await?;
///     println!("{} files", unpacked.stats.files);
///     Ok(())
/// }
/// ```
pub async fn unpack_file<P: AsRef<Path>>(path: P) -> Result<Unpacked, Error> {
    AsyncUnpacker::new()?.unpack_file(path).await
}
