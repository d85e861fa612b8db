//! Walking extracted output into a tree of results.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::dedup::{fingerprint_file, DuplicateIndex};
use crate::detect::detect;
use crate::error::Error;
use crate::format::Format;
use crate::handle::FileHandle;
use crate::sandbox::{ExtractionOutcome, Sandbox};

/// One extracted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Path relative to the destination it was extracted into, `/`-separated.
    pub name: String,
    /// Where the file lives on disk while the request's workspace is alive.
    pub path: PathBuf,
    pub size: u64,
    /// SHA-256 of the content, lowercase hex.
    pub sha256: String,
    /// Detected archive format, if any.
    pub format: Option<Format>,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Not an archive, or an archive that yielded nothing.
    Leaf,
    /// An archive that was extracted; its files follow.
    Unpacked { children: Vec<Node> },
    /// Byte-identical to a file processed earlier in the same request.
    Duplicate { of: PathBuf },
    /// The file could not be read, or extracting it hit an infrastructure
    /// failure.
    Failed { reason: String },
}

impl Node {
    pub fn children(&self) -> &[Node] {
        match &self.kind {
            NodeKind::Unpacked { children } => children,
            _ => &[],
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self.kind, NodeKind::Duplicate { .. })
    }

    /// This node and all nodes below it, depth-first.
    pub fn descendants(&self) -> Vec<&Node> {
        let mut out = vec![self];
        for child in self.children() {
            out.extend(child.descendants());
        }
        out
    }
}

/// Counters for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// Files emitted as nodes, duplicates included.
    pub files: usize,
    /// Successful extractions, the top-level one included.
    pub archives: usize,
    pub duplicates: usize,
    /// Archives that failed to extract, and files that could not be read.
    pub failures: usize,
    /// Entries removed by the containment audit.
    pub violations: usize,
}

/// State shared by one top-level request and every nested extraction.
#[derive(Debug, Default)]
pub struct Session {
    pub index: DuplicateIndex,
    /// Destination directories, kept alive until the caller is done.
    pub workspace: Vec<TempDir>,
    pub stats: Stats,
}

/// Walks destination directories and recurses into nested archives.
pub struct Walker<'a> {
    sandbox: &'a Sandbox,
    password: Option<&'a str>,
    exclude: &'a [String],
}

impl<'a> Walker<'a> {
    pub fn new(sandbox: &'a Sandbox) -> Self {
        Self {
            sandbox,
            password: None,
            exclude: &[],
        }
    }

    /// Caller password, passed to every nested extraction.
    pub fn password(mut self, password: Option<&'a str>) -> Self {
        self.password = password;
        self
    }

    /// Glob patterns of extracted paths to leave out of the tree.
    pub fn exclude(mut self, patterns: &'a [String]) -> Self {
        self.exclude = patterns;
        self
    }

    /// Turn an extraction outcome into nodes, recursing into nested
    /// archives. `depth` is the nesting level of `outcome` (1 for the
    /// top-level archive).
    ///
    /// The outcome's destination moves into `session.workspace`; nothing
    /// extracted is deleted here. Entries that cannot be walked or read
    /// become [`NodeKind::Failed`] nodes.
    pub fn process(
        &self,
        outcome: ExtractionOutcome,
        session: &mut Session,
        depth: usize,
    ) -> Vec<Node> {
        session.stats.violations += outcome.violations.len();
        let root = outcome.destination().to_path_buf();
        session.workspace.push(outcome.into_destination());

        let mut nodes = Vec::new();
        let walk = WalkDir::new(&root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for entry in walk {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().unwrap_or(root.as_path()).to_path_buf();
                    let name = relative_name(&root, &path);
                    warn!(%name, error = %e, "cannot walk extracted entry");
                    nodes.push(failed(name, path, &Error::from(e), session));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let name = relative_name(&root, entry.path());
            if self
                .exclude
                .iter()
                .any(|pattern| glob_match::glob_match(pattern, &name))
            {
                debug!(%name, "excluded by pattern");
                continue;
            }

            nodes.push(self.visit(entry.path(), name, session, depth));
        }

        nodes
    }

    fn visit(&self, path: &Path, name: String, session: &mut Session, depth: usize) -> Node {
        let (sha256, size) = match fingerprint_file(path) {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                warn!(%name, error = %e, "cannot read extracted file");
                return failed(name, path.to_path_buf(), &Error::from(e), session);
            }
        };
        session.stats.files += 1;

        let mut node = Node {
            name,
            path: path.to_path_buf(),
            size,
            sha256,
            format: None,
            kind: NodeKind::Leaf,
        };

        if let Some(first) = session.index.insert_if_absent(&node.sha256, path) {
            debug!(name = %node.name, of = %first.display(), "duplicate content");
            node.kind = NodeKind::Duplicate {
                of: first.to_path_buf(),
            };
            session.stats.duplicates += 1;
            return node;
        }

        // The handle lives only for this extraction; nothing it buffered is
        // held while nested output is walked.
        let extracted = {
            let handle = FileHandle::from_path(path);
            let detection = match detect(&handle) {
                Ok(Some(detection)) => detection,
                Ok(None) => return node,
                Err(e) => {
                    warn!(name = %node.name, error = %e, "detection failed");
                    return fail(node, &e, session);
                }
            };
            node.format = Some(detection.descriptor.format);

            if depth >= self.sandbox.get_limits().max_nesting {
                warn!(name = %node.name, depth, "nesting limit reached, not unpacking");
                return node;
            }

            self.sandbox
                .extract(detection.descriptor, &handle, self.password)
                .map(|outcome| (outcome, detection.descriptor.name))
        };

        let (outcome, format) = match extracted {
            Ok(extracted) => extracted,
            Err(e) => {
                warn!(name = %node.name, error = %e, "nested extraction failed");
                return fail(node, &e, session);
            }
        };

        if !outcome.success {
            session.stats.failures += 1;
            session.stats.violations += outcome.violations.len();
            return node;
        }
        session.stats.archives += 1;
        info!(name = %node.name, format, depth, "unpacked nested archive");

        let children = self.process(outcome, session, depth + 1);
        if !children.is_empty() {
            node.kind = NodeKind::Unpacked { children };
        }
        node
    }
}

/// A node for an entry that could not be read at all.
fn failed(name: String, path: PathBuf, error: &Error, session: &mut Session) -> Node {
    let node = Node {
        name,
        path,
        size: 0,
        sha256: String::new(),
        format: None,
        kind: NodeKind::Leaf,
    };
    fail(node, error, session)
}

fn fail(mut node: Node, error: &Error, session: &mut Session) -> Node {
    node.kind = NodeKind::Failed {
        reason: error.to_string(),
    };
    session.stats.failures += 1;
    node
}

fn relative_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
