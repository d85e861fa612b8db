//! Shared fixtures: a `/bin/sh` stand-in for the extraction program and
//! archive builders.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// Argument parsing shared by every stand-in script. Sets `$dest` from the
/// `-o<dir>` switch and `$src` from the last non-switch argument.
const PREAMBLE: &str = r#"#!/bin/sh
dest=""
src=""
for arg in "$@"; do
  case "$arg" in
    -o*) dest="${arg#-o}" ;;
    -*|x) ;;
    *) src="$arg" ;;
  esac
done
"#;

/// Extracts tar archives, whatever extension they carry.
pub const TAR_EXTRACT: &str = r#"tar -xf "$src" -C "$dest""#;

/// Records its arguments, one per line, inside the destination.
pub const RECORD_ARGS: &str = r#"printf '%s\n' "$@" > "$dest/args.txt""#;

/// Write an executable stand-in program into `dir`.
pub fn fake_program(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-7z");
    fs::write(&path, format!("{}{}\n", PREAMBLE, body)).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

/// Build an uncompressed tar holding `files`.
pub fn tar_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_path(name).unwrap();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_700_000_000);
        header.set_cksum();
        builder.append(&header, *content).unwrap();
    }
    builder.into_inner().unwrap()
}

/// Build a real ZIP holding `files`.
pub fn zip_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;

    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buffer);
        let options: zip::write::FileOptions<()> =
            zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, content) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
    }
    buffer.into_inner()
}

/// Names of the entries directly under `dir`, sorted.
pub fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
