//! Tests for the containment policies and the destination audit

use std::fs;

use safe_unpack::policy::{
    confine, CountPolicy, DepthPolicy, EntryInfo, EntryKind, EntryTypePolicy, ExtractionState,
    PathPolicy, Policy, PolicyChain, SizePolicy,
};
use safe_unpack::{Error, Format, Limits};
use tempfile::tempdir;

fn make_entry_info(name: &str, size: u64, kind: EntryKind) -> EntryInfo {
    EntryInfo {
        name: name.to_string(),
        size,
        kind,
    }
}

fn file_info(name: &str, size: u64) -> EntryInfo {
    make_entry_info(name, size, EntryKind::File)
}

fn dir_info(name: &str) -> EntryInfo {
    make_entry_info(name, 0, EntryKind::Directory)
}

// ============================================================================
// PathPolicy Tests
// ============================================================================

#[test]
fn test_path_policy_normal_file() {
    let dest = tempdir().unwrap();
    let policy = PathPolicy::new(dest.path()).unwrap();

    assert!(policy
        .check(&file_info("dir/normal.txt", 100), &ExtractionState::default())
        .is_ok());
}

#[test]
fn test_path_policy_blocks_double_dot() {
    let dest = tempdir().unwrap();
    let policy = PathPolicy::new(dest.path()).unwrap();

    let result = policy.check(&file_info("a/../../escape", 1), &ExtractionState::default());
    assert!(matches!(result, Err(Error::PathEscape { .. })));
}

// ============================================================================
// EntryTypePolicy Tests
// ============================================================================

#[test]
fn test_entry_type_policy_rejects_every_symlink() {
    let state = ExtractionState::default();
    let inside = make_entry_info(
        "link",
        0,
        EntryKind::Symlink {
            target: "sibling.txt".to_string(),
        },
    );
    assert!(matches!(
        EntryTypePolicy.check(&inside, &state),
        Err(Error::SymlinkNotAllowed { .. })
    ));

    let fifo = make_entry_info(
        "pipe",
        0,
        EntryKind::Other {
            kind: "fifo".to_string(),
        },
    );
    assert!(matches!(
        EntryTypePolicy.check(&fifo, &state),
        Err(Error::UnsupportedEntryType { .. })
    ));

    assert!(EntryTypePolicy.check(&dir_info("d"), &state).is_ok());
}

// ============================================================================
// Limit Policy Tests
// ============================================================================

#[test]
fn test_count_policy_zero_limit() {
    let policy = CountPolicy::new(0);
    let result = policy.check(&file_info("a", 1), &ExtractionState::default());
    assert!(matches!(result, Err(Error::FileCountExceeded { limit: 0, .. })));
}

#[test]
fn test_depth_policy_blocks_deep() {
    let policy = DepthPolicy::new(2);
    let state = ExtractionState::default();

    assert!(policy.check(&file_info("a/b", 1), &state).is_ok());
    assert!(matches!(
        policy.check(&file_info("a/b/c", 1), &state),
        Err(Error::PathTooDeep { depth: 3, .. })
    ));
}

// ============================================================================
// PolicyChain Tests
// ============================================================================

#[test]
fn test_policy_chain_empty() {
    let chain = PolicyChain::new();
    assert!(chain
        .check_all(&file_info("anything", u64::MAX), &ExtractionState::default())
        .is_ok());
}

#[test]
fn test_policy_chain_first_violation_wins() {
    let chain = PolicyChain::new()
        .with(SizePolicy::new(10, 100))
        .with(CountPolicy::new(0));

    let result = chain.check_all(&file_info("big", 50), &ExtractionState::default());
    assert!(matches!(result, Err(Error::FileTooLarge { .. })));
}

struct NoExecutables;

impl Policy for NoExecutables {
    fn check(&self, entry: &EntryInfo, _state: &ExtractionState) -> Result<(), Error> {
        if entry.name.ends_with(".exe") {
            return Err(Error::Excluded {
                entry: entry.name.clone(),
                pattern: "*.exe".to_string(),
            });
        }
        Ok(())
    }
}

#[test]
fn test_confine_with_custom_policy() {
    let dest = tempdir().unwrap();
    fs::write(dest.path().join("run.exe"), b"MZ").unwrap();
    fs::write(dest.path().join("notes.txt"), b"fine").unwrap();

    let chain = PolicyChain::new().with(NoExecutables);
    let confinement = confine(dest.path(), &chain).unwrap();

    assert_eq!(confinement.state.files_kept, 1);
    assert_eq!(confinement.violations.len(), 1);
    assert!(!dest.path().join("run.exe").exists());
    assert!(dest.path().join("notes.txt").exists());
}

// ============================================================================
// Audit Tests
// ============================================================================

#[test]
fn test_confine_enforces_file_count() {
    let dest = tempdir().unwrap();
    for name in ["a.txt", "b.txt", "c.txt"] {
        fs::write(dest.path().join(name), b"x").unwrap();
    }

    let limits = Limits {
        max_file_count: 2,
        ..Default::default()
    };
    let chain = PolicyChain::for_destination(dest.path(), Format::Zip.descriptor(), &limits).unwrap();
    let confinement = confine(dest.path(), &chain).unwrap();

    // Lexicographic traversal: the last file is the one dropped.
    assert_eq!(confinement.state.files_kept, 2);
    assert!(dest.path().join("a.txt").exists());
    assert!(dest.path().join("b.txt").exists());
    assert!(!dest.path().join("c.txt").exists());
}

#[test]
fn test_confine_removes_too_deep_directory_with_contents() {
    let dest = tempdir().unwrap();
    fs::create_dir_all(dest.path().join("a/b/c")).unwrap();
    fs::write(dest.path().join("a/b/c/deep.txt"), b"x").unwrap();
    fs::write(dest.path().join("a/shallow.txt"), b"y").unwrap();

    let limits = Limits {
        max_path_depth: 2,
        ..Default::default()
    };
    let chain = PolicyChain::for_destination(dest.path(), Format::Zip.descriptor(), &limits).unwrap();
    let confinement = confine(dest.path(), &chain).unwrap();

    assert!(dest.path().join("a/shallow.txt").exists());
    assert!(dest.path().join("a/b").exists());
    assert!(!dest.path().join("a/b/c").exists());
    assert_eq!(confinement.state.entries_removed, 1);
}

#[cfg(unix)]
#[test]
fn test_confine_removes_unreadable_directory() {
    use std::os::unix::fs::PermissionsExt;

    let dest = tempdir().unwrap();
    let locked = dest.path().join("locked");
    fs::create_dir(&locked).unwrap();
    fs::write(locked.join("hidden.txt"), b"x").unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    // Root can read anything; nothing to test there.
    if fs::read_dir(&locked).is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let chain = PolicyChain::for_destination(dest.path(), Format::Zip.descriptor(), &Limits::default())
        .unwrap();
    let confinement = confine(dest.path(), &chain).unwrap();

    assert!(!locked.exists());
    assert!(confinement
        .violations
        .iter()
        .any(|v| matches!(v, Error::Walk(_))));
}

#[test]
fn test_usage_counts_files_and_bytes() {
    let dest = tempdir().unwrap();
    fs::create_dir(dest.path().join("sub")).unwrap();
    fs::write(dest.path().join("a"), vec![0u8; 10]).unwrap();
    fs::write(dest.path().join("sub/b"), vec![0u8; 5]).unwrap();

    assert_eq!(safe_unpack::policy::usage(dest.path()), (2, 15));
}
