//! CLI integration tests
//!
//! These tests verify the CLI works correctly end-to-end, using a shell
//! stand-in for the extraction program.

#![cfg(all(feature = "cli", unix))]

mod common;

use std::fs;
use std::process::Command;

use common::{fake_program, tar_archive, TAR_EXTRACT};

fn cli_binary() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_safe_unpack"));
    cmd.env_remove("RUST_LOG");
    cmd
}

fn create_nested_archive(dir: &std::path::Path) -> std::path::PathBuf {
    let inner = tar_archive(&[("c.txt", b"payload")]);
    let outer = tar_archive(&[("b.7z", inner.as_slice()), ("readme.txt", b"hello")]);
    let path = dir.join("a.zip");
    fs::write(&path, outer).unwrap();
    path
}

#[test]
fn test_cli_help() {
    let output = cli_binary().arg("--help").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Sandboxed recursive archive unpacking"));
    assert!(stdout.contains("--password"));
    assert!(stdout.contains("--program"));
    assert!(stdout.contains("--max-nesting"));
}

#[test]
fn test_cli_version() {
    let output = cli_binary().arg("--version").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("safe_unpack"));
}

#[test]
fn test_cli_prints_tree() {
    let temp = tempfile::tempdir().unwrap();
    let program = fake_program(temp.path(), TAR_EXTRACT);
    let archive = create_nested_archive(temp.path());

    let output = cli_binary()
        .arg(&archive)
        .arg("--program")
        .arg(&program)
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[zipfile]"));
    assert!(stdout.contains("b.7z [7zfile]"));
    assert!(stdout.contains("c.txt"));
    assert!(stdout.contains("readme.txt"));
    assert!(stdout.contains("3 files, 2 archives, 0 duplicates"));
}

#[test]
fn test_cli_non_archive() {
    let temp = tempfile::tempdir().unwrap();
    let notes = temp.path().join("notes.txt");
    fs::write(&notes, "plain text").unwrap();

    let output = cli_binary()
        .arg(&notes)
        .arg("--program")
        .arg("/nonexistent/bin/7zz")
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("not a recognised archive"));
}

#[test]
fn test_cli_keep() {
    let temp = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let program = fake_program(temp.path(), TAR_EXTRACT);
    let archive = create_nested_archive(temp.path());

    let output = cli_binary()
        .arg(&archive)
        .arg("--program")
        .arg(&program)
        .arg("--scratch")
        .arg(scratch.path())
        .arg("--keep")
        .arg("--quiet")
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let kept: Vec<&str> = stdout
        .lines()
        .filter_map(|line| line.strip_prefix("kept "))
        .collect();
    assert_eq!(kept.len(), 2);
    for dir in kept {
        assert!(std::path::Path::new(dir).is_dir());
    }
}

#[test]
fn test_cli_missing_program_fails() {
    let temp = tempfile::tempdir().unwrap();
    let archive = create_nested_archive(temp.path());

    let output = cli_binary()
        .arg(&archive)
        .arg("--program")
        .arg("/nonexistent/bin/7zz")
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Cannot run"));
}

#[test]
fn test_cli_rejects_overflowing_size() {
    let temp = tempfile::tempdir().unwrap();
    let archive = create_nested_archive(temp.path());

    let output = cli_binary()
        .arg(&archive)
        .arg("--program")
        .arg("/bin/true")
        .arg("--max-size")
        .arg("99999999999G")
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("too large"), "{stderr}");
}

#[test]
fn test_cli_missing_input_fails() {
    let output = cli_binary()
        .arg("/nonexistent/input.zip")
        .arg("--program")
        .arg("/bin/true")
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error"));
}

#[test]
fn test_cli_completions() {
    let output = cli_binary().arg("--completions").arg("bash").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("safe_unpack"));
}
