//! Kernel-enforced restrictions applied to the extraction program.
//!
//! Everything here runs in two halves. The parent prepares state before
//! `fork` (opening directories, building the Landlock ruleset). The child
//! applies it from a `pre_exec` hook, where only async-signal-safe calls
//! are allowed: `setrlimit`, `prctl` and `landlock_restrict_self`.
//!
//! On Linux the ruleset restricts every filesystem write of the program and
//! its descendants to the destination directory. Reads and execution are
//! not restricted.

use std::io;

/// Whether the running kernel can confine the program's writes to its
/// destination directory.
pub fn write_confinement_supported() -> bool {
    #[cfg(target_os = "linux")]
    {
        landlock::abi().is_some()
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// Cap the size of any file the calling process writes. A write past the
/// cap raises `SIGXFSZ`.
///
/// Called from `pre_exec`.
#[cfg(unix)]
pub(crate) fn limit_file_size(bytes: u64) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: bytes as libc::rlim_t,
        rlim_max: bytes as libc::rlim_t,
    };
    // SAFETY: setrlimit only reads the struct passed by reference.
    if unsafe { libc::setrlimit(libc::RLIMIT_FSIZE, &limit) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(target_os = "linux")]
pub(crate) use landlock::WriteJail;

#[cfg(target_os = "linux")]
mod landlock {
    use std::fs::File;
    use std::io;
    use std::mem::size_of;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
    use std::path::Path;
    use std::sync::OnceLock;

    use tracing::{debug, warn};

    const CREATE_RULESET_VERSION: libc::c_uint = 1 << 0;
    const RULE_PATH_BENEATH: libc::c_int = 1;

    const ACCESS_FS_WRITE_FILE: u64 = 1 << 1;
    const ACCESS_FS_REMOVE_DIR: u64 = 1 << 4;
    const ACCESS_FS_REMOVE_FILE: u64 = 1 << 5;
    const ACCESS_FS_MAKE_CHAR: u64 = 1 << 6;
    const ACCESS_FS_MAKE_DIR: u64 = 1 << 7;
    const ACCESS_FS_MAKE_REG: u64 = 1 << 8;
    const ACCESS_FS_MAKE_SOCK: u64 = 1 << 9;
    const ACCESS_FS_MAKE_FIFO: u64 = 1 << 10;
    const ACCESS_FS_MAKE_BLOCK: u64 = 1 << 11;
    const ACCESS_FS_MAKE_SYM: u64 = 1 << 12;
    // ABI 2
    const ACCESS_FS_REFER: u64 = 1 << 13;
    // ABI 3
    const ACCESS_FS_TRUNCATE: u64 = 1 << 14;

    #[repr(C)]
    struct RulesetAttr {
        handled_access_fs: u64,
    }

    // The kernel declares this struct packed.
    #[repr(C, packed)]
    struct PathBeneathAttr {
        allowed_access: u64,
        parent_fd: i32,
    }

    /// Landlock ABI version, probed once per process.
    pub(super) fn abi() -> Option<i64> {
        static ABI: OnceLock<Option<i64>> = OnceLock::new();
        *ABI.get_or_init(|| {
            // SAFETY: a version query passes no attribute and reads nothing.
            let abi = unsafe {
                libc::syscall(
                    libc::SYS_landlock_create_ruleset,
                    std::ptr::null::<RulesetAttr>(),
                    0usize,
                    CREATE_RULESET_VERSION,
                )
            };
            if abi < 1 {
                warn!(
                    error = %io::Error::last_os_error(),
                    "Landlock unavailable, extraction writes are not kernel-confined"
                );
                None
            } else {
                debug!(abi, "Landlock available");
                Some(abi as i64)
            }
        })
    }

    fn write_access(abi: i64) -> u64 {
        let mut access = ACCESS_FS_WRITE_FILE
            | ACCESS_FS_REMOVE_DIR
            | ACCESS_FS_REMOVE_FILE
            | ACCESS_FS_MAKE_CHAR
            | ACCESS_FS_MAKE_DIR
            | ACCESS_FS_MAKE_REG
            | ACCESS_FS_MAKE_SOCK
            | ACCESS_FS_MAKE_FIFO
            | ACCESS_FS_MAKE_BLOCK
            | ACCESS_FS_MAKE_SYM;
        if abi >= 2 {
            access |= ACCESS_FS_REFER;
        }
        if abi >= 3 {
            access |= ACCESS_FS_TRUNCATE;
        }
        access
    }

    /// A Landlock ruleset allowing writes beneath one directory only.
    #[derive(Debug)]
    pub(crate) struct WriteJail {
        ruleset: OwnedFd,
    }

    impl WriteJail {
        /// Build the ruleset for `destination`. `Ok(None)` when the kernel
        /// has no Landlock support.
        pub(crate) fn new(destination: &Path) -> io::Result<Option<Self>> {
            let Some(abi) = abi() else {
                return Ok(None);
            };
            let handled = write_access(abi);

            let attr = RulesetAttr {
                handled_access_fs: handled,
            };
            // SAFETY: `attr` outlives the call and its size is passed along.
            let fd = unsafe {
                libc::syscall(
                    libc::SYS_landlock_create_ruleset,
                    &attr as *const RulesetAttr,
                    size_of::<RulesetAttr>(),
                    0 as libc::c_uint,
                )
            };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            // SAFETY: the kernel just returned this descriptor to us.
            let ruleset = unsafe { OwnedFd::from_raw_fd(fd as RawFd) };
            let jail = Self { ruleset };

            jail.allow(&File::open(destination)?, handled)?;

            // Programs commonly discard output by opening /dev/null.
            let file_access = ACCESS_FS_WRITE_FILE | (handled & ACCESS_FS_TRUNCATE);
            if let Ok(null) = File::options().write(true).open("/dev/null") {
                if let Err(e) = jail.allow(&null, file_access) {
                    debug!(error = %e, "could not allow writes to /dev/null");
                }
            }

            Ok(Some(jail))
        }

        fn allow(&self, parent: &File, access: u64) -> io::Result<()> {
            let rule = PathBeneathAttr {
                allowed_access: access,
                parent_fd: parent.as_raw_fd(),
            };
            // SAFETY: `rule` outlives the call; both descriptors are open.
            let rc = unsafe {
                libc::syscall(
                    libc::SYS_landlock_add_rule,
                    self.ruleset.as_raw_fd(),
                    RULE_PATH_BENEATH,
                    &rule as *const PathBeneathAttr,
                    0 as libc::c_uint,
                )
            };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        pub(crate) fn as_raw_fd(&self) -> RawFd {
            self.ruleset.as_raw_fd()
        }
    }

    /// Restrict the calling process with `ruleset`. Irreversible.
    ///
    /// Called from `pre_exec`.
    pub(crate) fn enforce(ruleset: RawFd) -> io::Result<()> {
        // SAFETY: prctl and landlock_restrict_self take plain integers.
        unsafe {
            if libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::syscall(libc::SYS_landlock_restrict_self, ruleset, 0 as libc::c_uint) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
pub(crate) use landlock::enforce;
