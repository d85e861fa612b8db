//! Running the extraction program under containment.
//!
//! One call to [`Sandbox::extract`] runs the external program once, into a
//! fresh destination directory, and then audits what it wrote. Whatever the
//! program's exit status, the outcome reflects the audited directory:
//! partial output is a usable result, an empty directory after a failed run
//! is a failed extraction. Only infrastructure problems are errors.

use std::fmt;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::format::FormatDescriptor;
use crate::handle::FileHandle;
use crate::isolation;
use crate::limits::Limits;
use crate::policy::{self, ExtractionState, PolicyChain};

/// Program names tried on `PATH`, in order, when none is configured.
pub const PROGRAM_CANDIDATES: &[&str] = &["7zz", "7z", "7za"];

/// `PATH` given to the extraction program. Its environment is otherwise empty.
const CHILD_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const QUOTA_INTERVAL: Duration = Duration::from_millis(100);
const STDERR_TAIL: u64 = 2048;

/// How the extraction program stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited on its own. `code` is `None` when killed by a signal.
    Exited { code: Option<i32> },
    /// Killed after exceeding [`Limits::timeout`].
    TimedOut,
    /// Wrote more than the byte or file-count ceiling, whether caught while
    /// running (and killed) or by the audit afterwards.
    QuotaExceeded,
}

impl Termination {
    /// Whether the program itself reported full success.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Exited { code: Some(0) })
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code: Some(code) } => write!(f, "exit code {}", code),
            Self::Exited { code: None } => write!(f, "killed by signal"),
            Self::TimedOut => write!(f, "timed out"),
            Self::QuotaExceeded => write!(f, "output quota exceeded"),
        }
    }
}

/// Result of one extraction.
///
/// Owns its destination directory: dropping the outcome (or the
/// [`Unpacked`](crate::Unpacked) it ends up in) deletes the extracted files.
#[derive(Debug)]
pub struct ExtractionOutcome {
    /// `false` only when the program failed and left nothing behind.
    pub success: bool,
    pub descriptor: &'static FormatDescriptor,
    pub termination: Termination,
    /// Top-level names in the destination after the audit, sorted.
    pub entries: Vec<PathBuf>,
    /// Containment violations; the offending entries were deleted.
    pub violations: Vec<Error>,
    /// What the audit kept.
    pub kept: ExtractionState,
    destination: TempDir,
}

impl ExtractionOutcome {
    pub fn destination(&self) -> &Path {
        self.destination.path()
    }

    /// Take ownership of the destination directory.
    pub fn into_destination(self) -> TempDir {
        self.destination
    }
}

/// Runs the external extraction program with containment.
#[derive(Debug, Clone)]
pub struct Sandbox {
    program: PathBuf,
    limits: Limits,
    scratch: Option<PathBuf>,
    require_confinement: bool,
}

impl Sandbox {
    /// Use the first of [`PROGRAM_CANDIDATES`] found on `PATH`.
    pub fn new() -> Result<Self, Error> {
        Ok(Self::with_program(resolve_program()?))
    }

    /// Use an explicit extraction program.
    pub fn with_program<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            limits: Limits::default(),
            scratch: None,
            require_confinement: false,
        }
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Parent directory for destination directories and temporary source
    /// files. Defaults to the system temp directory.
    pub fn scratch_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.scratch = Some(dir.into());
        self
    }

    /// Refuse to run the program when the kernel cannot confine its writes
    /// to the destination directory. Without this, such kernels get a
    /// warning and only the post-run audit.
    pub fn require_confinement(mut self, required: bool) -> Self {
        self.require_confinement = required;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_limits(&self) -> &Limits {
        &self.limits
    }

    fn scratch_root(&self) -> PathBuf {
        self.scratch.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Extract `handle` as `descriptor` into a new destination directory.
    ///
    /// `password` is the caller's; the descriptor decides the fallback.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures: the destination directory or the
    /// temporary source file cannot be created, or the program cannot be
    /// started. An archive that does not extract is an unsuccessful outcome.
    pub fn extract(
        &self,
        descriptor: &'static FormatDescriptor,
        handle: &FileHandle,
        password: Option<&str>,
    ) -> Result<ExtractionOutcome, Error> {
        let root = self.scratch_root();
        let destination = tempfile::Builder::new()
            .prefix("unpack-")
            .tempdir_in(&root)
            .map_err(|source| Error::Workspace {
                path: root.display().to_string(),
                source,
            })?;

        // Caller-supplied paths are used in place and never deleted.
        let temp_source = match handle.path() {
            Some(_) => None,
            None => Some(self.write_temp_source(descriptor, handle, &root)?),
        };
        let source = match (&temp_source, handle.path()) {
            (Some(temp), _) => temp.path().to_path_buf(),
            (None, Some(path)) => path.to_path_buf(),
            (None, None) => return Err(Error::EmptyHandle),
        };

        let args = descriptor.build_args(
            &source.to_string_lossy(),
            &destination.path().to_string_lossy(),
            password,
        );
        let mut termination = self.run(&args, destination.path())?;

        let policies =
            PolicyChain::for_destination(destination.path(), descriptor, &self.limits)?;
        let confinement = policy::confine(destination.path(), &policies)?;
        // A bomb that finishes between two quota polls exits cleanly.
        if matches!(termination, Termination::Exited { .. })
            && confinement.violations.iter().any(Error::is_quota)
        {
            warn!(format = descriptor.name, "output quota exceeded");
            termination = Termination::QuotaExceeded;
        }
        let entries = top_level_entries(destination.path())?;

        if let Some(temp) = temp_source {
            if let Err(e) = temp.close() {
                warn!(error = %e, "failed to remove temporary source file");
            }
        }

        let success = termination.is_clean() || !entries.is_empty();
        if success {
            info!(
                format = descriptor.name,
                %termination,
                files = confinement.state.files_kept,
                bytes = confinement.state.bytes_kept,
                removed = confinement.state.entries_removed,
                "extraction finished"
            );
        } else {
            debug!(format = descriptor.name, %termination, "extraction produced nothing");
        }

        Ok(ExtractionOutcome {
            success,
            descriptor,
            termination,
            entries,
            violations: confinement.violations,
            kept: confinement.state,
            destination,
        })
    }

    fn write_temp_source(
        &self,
        descriptor: &FormatDescriptor,
        handle: &FileHandle,
        root: &Path,
    ) -> Result<NamedTempFile, Error> {
        let contents = handle.contents()?;
        let mut temp = tempfile::Builder::new()
            .prefix("unpack-src-")
            .suffix(descriptor.temp_suffix)
            .tempfile_in(root)
            .map_err(|source| Error::TempSource { source })?;
        temp.write_all(contents)
            .and_then(|_| temp.flush())
            .map_err(|source| Error::TempSource { source })?;
        Ok(temp)
    }

    #[cfg(target_os = "linux")]
    fn write_jail(&self, destination: &Path) -> Result<Option<isolation::WriteJail>, Error> {
        match isolation::WriteJail::new(destination) {
            Ok(Some(jail)) => Ok(Some(jail)),
            Ok(None) if self.require_confinement => Err(Error::ConfinementUnavailable {
                detail: "kernel has no Landlock support".to_string(),
            }),
            Ok(None) => Ok(None),
            Err(e) if self.require_confinement => Err(Error::ConfinementUnavailable {
                detail: e.to_string(),
            }),
            Err(e) => {
                warn!(error = %e, "cannot build write ruleset, program runs unconfined");
                Ok(None)
            }
        }
    }

    /// Spawn the program and supervise it until it exits or is killed.
    fn run(&self, args: &[String], destination: &Path) -> Result<Termination, Error> {
        let mut stderr_log = tempfile::tempfile()?;

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .current_dir(destination)
            .env_clear()
            .env("PATH", CHILD_PATH)
            .env("LANG", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr_log.try_clone()?));

        #[cfg(target_os = "linux")]
        let jail = self.write_jail(destination)?;

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so teardown reaches helper processes too.
            cmd.process_group(0);

            // One byte over the per-file ceiling, so the audit still sees the
            // truncated file as oversized.
            let max_file = self.limits.max_single_file.saturating_add(1);
            #[cfg(target_os = "linux")]
            let ruleset = jail.as_ref().map(isolation::WriteJail::as_raw_fd);

            // SAFETY: the hook only makes async-signal-safe calls (setrlimit,
            // prctl, landlock_restrict_self) and allocates nothing.
            unsafe {
                cmd.pre_exec(move || {
                    isolation::limit_file_size(max_file)?;
                    #[cfg(target_os = "linux")]
                    {
                        if let Some(fd) = ruleset {
                            isolation::enforce(fd)?;
                        }
                    }
                    Ok(())
                });
            }
        }
        #[cfg(not(target_os = "linux"))]
        {
            if self.require_confinement {
                return Err(Error::ConfinementUnavailable {
                    detail: "only supported on Linux".to_string(),
                });
            }
        }

        debug!(program = %self.program.display(), ?args, "spawning extraction program");
        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        #[cfg(target_os = "linux")]
        drop(jail);

        let termination = self.supervise(&mut child, destination)?;
        // Reap anything the program left running in its group.
        kill_group(&mut child);

        if let Some(tail) = read_tail(&mut stderr_log) {
            debug!(%termination, stderr = %tail, "extraction program finished");
        }

        Ok(termination)
    }

    fn supervise(&self, child: &mut Child, destination: &Path) -> Result<Termination, Error> {
        let started = Instant::now();
        let mut last_quota_check = started;

        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(exited(status));
            }

            if started.elapsed() > self.limits.timeout {
                warn!(timeout = ?self.limits.timeout, "extraction timed out, killing process group");
                kill_group(child);
                let _ = child.wait();
                return Ok(Termination::TimedOut);
            }

            if last_quota_check.elapsed() >= QUOTA_INTERVAL {
                last_quota_check = Instant::now();
                let (files, bytes) = policy::usage(destination);
                if files > self.limits.max_file_count || bytes > self.limits.max_total_bytes {
                    warn!(files, bytes, "extraction exceeded quota, killing process group");
                    kill_group(child);
                    let _ = child.wait();
                    return Ok(Termination::QuotaExceeded);
                }
            }

            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Find the extraction program on `PATH`.
pub fn resolve_program() -> Result<PathBuf, Error> {
    PROGRAM_CANDIDATES
        .iter()
        .find_map(|name| which::which(name).ok())
        .ok_or_else(|| Error::ProgramNotFound {
            candidates: PROGRAM_CANDIDATES.join(", "),
        })
}

fn exited(status: ExitStatus) -> Termination {
    Termination::Exited {
        code: status.code(),
    }
}

#[cfg(unix)]
fn kill_group(child: &mut Child) {
    let pid = child.id() as libc::pid_t;
    // SAFETY: signalling a process group we created; ESRCH when it is gone.
    let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
    if rc != 0 {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    let _ = child.kill();
}

fn read_tail(file: &mut fs::File) -> Option<String> {
    let len = file.metadata().ok()?.len();
    if len == 0 {
        return None;
    }
    file.seek(SeekFrom::Start(len.saturating_sub(STDERR_TAIL))).ok()?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).ok()?;
    Some(String::from_utf8_lossy(&buf).trim().to_string())
}

fn top_level_entries(destination: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut entries = fs::read_dir(destination)?
        .map(|e| e.map(|e| PathBuf::from(e.file_name())))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();
    Ok(entries)
}
