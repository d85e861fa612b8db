//! Top-level unpack requests.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{info, warn};

use crate::dedup::{fingerprint, fingerprint_file};
use crate::detect::detect;
use crate::error::Error;
use crate::format::Format;
use crate::handle::FileHandle;
use crate::limits::Limits;
use crate::sandbox::Sandbox;
use crate::walker::{Node, Session, Stats, Walker};

/// Unpacks a file and every archive nested inside it.
///
/// # Example
///
/// ```no_run
/// use safe_unpack::{Limits, Unpacker};
///
/// let unpacked = Unpacker::new()?
///     .password("infected")
///     .limits(Limits {
///         max_total_bytes: 100 * 1024 * 1024,
///         ..Default::default()
///     })
///     .unpack_file("sample.zip")?;
///
/// for node in unpacked.files() {
///     println!("{} {}", node.sha256, node.name);
/// }
/// # Ok::<(), safe_unpack::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Unpacker {
    sandbox: Sandbox,
    password: Option<String>,
    exclude: Vec<String>,
}

impl Unpacker {
    /// Create an unpacker using the 7-Zip found on `PATH`.
    ///
    /// Returns [`Error::ProgramNotFound`] if none of `7zz`, `7z`, `7za` is
    /// installed. Use [`Self::with_program`] to name the binary explicitly.
    pub fn new() -> Result<Self, Error> {
        Ok(Self::from_sandbox(Sandbox::new()?))
    }

    pub fn with_program<P: Into<PathBuf>>(program: P) -> Self {
        Self::from_sandbox(Sandbox::with_program(program))
    }

    fn from_sandbox(sandbox: Sandbox) -> Self {
        Self {
            sandbox,
            password: None,
            exclude: Vec::new(),
        }
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.sandbox = self.sandbox.limits(limits);
        self
    }

    /// Parent directory for all destination directories of a request.
    pub fn scratch_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.sandbox = self.sandbox.scratch_dir(dir);
        self
    }

    /// Fail instead of running the program unconfined on kernels without
    /// Landlock. See [`Sandbox::require_confinement`].
    pub fn require_confinement(mut self, required: bool) -> Self {
        self.sandbox = self.sandbox.require_confinement(required);
        self
    }

    /// Password tried on every archive of the request. An empty password
    /// means "use each format's default".
    pub fn password<S: Into<String>>(mut self, password: S) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Leave extracted paths matching any of these globs out of the tree.
    ///
    /// Patterns match the path relative to the archive root, e.g.
    /// `"**/*.log"` or `"__MACOSX/**"`.
    pub fn exclude_glob<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        self.exclude
            .extend(patterns.iter().map(|p| p.as_ref().to_string()));
        self
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Unpack a file on disk. The file itself is never modified or deleted.
    pub fn unpack_file<P: AsRef<Path>>(&self, path: P) -> Result<Unpacked, Error> {
        self.unpack(FileHandle::from_path(path))
    }

    /// Unpack in-memory content. `name` is used for extension matching.
    pub fn unpack_bytes<S: Into<String>, B: Into<Vec<u8>>>(
        &self,
        name: S,
        bytes: B,
    ) -> Result<Unpacked, Error> {
        self.unpack(FileHandle::from_bytes(bytes).with_name(name))
    }

    /// Run one request: detect, extract, walk and recurse.
    ///
    /// Non-archives come back with `format: None` and no children. Failures
    /// of nested archives are confined to their node; only infrastructure
    /// failures of the top-level extraction are returned as errors.
    pub fn unpack(&self, handle: FileHandle) -> Result<Unpacked, Error> {
        let mut session = Session::default();
        let sha256 = match handle.path() {
            Some(path) => fingerprint_file(path)?.0,
            None => fingerprint(handle.contents()?),
        };
        let identity = handle
            .path()
            .map(Path::to_path_buf)
            .or_else(|| handle.name().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("<input>"));
        session.index.insert_if_absent(&sha256, &identity);

        let mut unpacked = Unpacked {
            name: handle.name().map(str::to_string),
            sha256,
            format: None,
            children: Vec::new(),
            stats: Stats::default(),
            workspace: Vec::new(),
        };

        let Some(detection) = detect(&handle)? else {
            info!(name = ?handle.name(), "not an archive");
            return Ok(unpacked);
        };
        unpacked.format = Some(detection.descriptor.format);

        let outcome = self
            .sandbox
            .extract(detection.descriptor, &handle, self.password.as_deref())?;
        let name = unpacked.name.clone();
        // Buffered input is not needed while nested output is walked.
        drop(handle);

        if outcome.success {
            session.stats.archives += 1;
            let walker = Walker::new(&self.sandbox)
                .password(self.password.as_deref())
                .exclude(&self.exclude);
            unpacked.children = walker.process(outcome, &mut session, 1);
        } else {
            warn!(?name, termination = %outcome.termination, "archive did not extract");
            session.stats.failures += 1;
            session.stats.violations += outcome.violations.len();
        }

        info!(
            ?name,
            files = session.stats.files,
            archives = session.stats.archives,
            duplicates = session.stats.duplicates,
            failures = session.stats.failures,
            "unpack finished"
        );

        unpacked.stats = session.stats;
        unpacked.workspace = session.workspace;
        Ok(unpacked)
    }
}

/// The result of one request.
///
/// Owns every destination directory the request created. Dropping it deletes
/// the extracted files; call [`Self::persist`] to keep them.
#[derive(Debug)]
pub struct Unpacked {
    /// Declared name of the input.
    pub name: Option<String>,
    pub sha256: String,
    /// Format of the input, `None` when it is not an archive.
    pub format: Option<Format>,
    /// Files extracted from the input, in traversal order.
    pub children: Vec<Node>,
    pub stats: Stats,
    workspace: Vec<TempDir>,
}

impl Unpacked {
    pub fn is_archive(&self) -> bool {
        self.format.is_some()
    }

    /// Every node of the tree, depth-first.
    pub fn files(&self) -> Vec<&Node> {
        self.children.iter().flat_map(Node::descendants).collect()
    }

    /// Destination directories created by this request, in creation order.
    pub fn destinations(&self) -> Vec<&Path> {
        self.workspace.iter().map(TempDir::path).collect()
    }

    /// Keep the extracted files on disk and return their directories.
    pub fn persist(self) -> Vec<PathBuf> {
        self.workspace.into_iter().map(TempDir::keep).collect()
    }
}
