//! Async API tests (requires `async` feature)
#![cfg(all(feature = "async", unix))]

mod common;

use common::{fake_program, tar_archive, TAR_EXTRACT};
use safe_unpack::r#async::AsyncUnpacker;
use safe_unpack::{Error, Format, Limits, NodeKind};
use std::time::Duration;
use tempfile::tempdir;

#[tokio::test]
async fn test_async_unpack_bytes() {
    let work = tempdir().unwrap();
    let unpacker = AsyncUnpacker::with_program(fake_program(work.path(), TAR_EXTRACT));
    let inner = tar_archive(&[("c.txt", b"hello async")]);
    let outer = tar_archive(&[("b.7z", inner.as_slice())]);

    let unpacked = unpacker.unpack_bytes("a.zip", outer).await.unwrap();

    assert_eq!(unpacked.format, Some(Format::Zip));
    let leaf = &unpacked.children[0].children()[0];
    assert_eq!(leaf.name, "c.txt");
    assert_eq!(leaf.kind, NodeKind::Leaf);
    assert_eq!(std::fs::read(&leaf.path).unwrap(), b"hello async");
}

#[tokio::test]
async fn test_async_unpack_file() {
    let work = tempdir().unwrap();
    let archive = work.path().join("sample.zip");
    std::fs::write(&archive, tar_archive(&[("file.txt", b"from file")])).unwrap();

    let unpacked = AsyncUnpacker::with_program(fake_program(work.path(), TAR_EXTRACT))
        .unpack_file(&archive)
        .await
        .unwrap();

    assert_eq!(unpacked.children.len(), 1);
    assert!(archive.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_async_concurrent_requests() {
    let work = tempdir().unwrap();
    let unpacker = AsyncUnpacker::with_program(fake_program(work.path(), TAR_EXTRACT));
    let data = tar_archive(&[("same.txt", b"same")]);

    let (a, b) = tokio::join!(
        unpacker.unpack_bytes("a.zip", data.clone()),
        unpacker.unpack_bytes("b.zip", data),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    // Dedup state is per request.
    assert!(!a.children[0].is_duplicate());
    assert!(!b.children[0].is_duplicate());
    assert_ne!(a.destinations(), b.destinations());
}

#[tokio::test]
async fn test_async_timeout() {
    let work = tempdir().unwrap();
    let unpacker = AsyncUnpacker::with_program(fake_program(work.path(), "sleep 30")).limits(
        Limits {
            timeout: Duration::from_millis(200),
            ..Default::default()
        },
    );

    let unpacked = unpacker
        .unpack_bytes("slow.zip", b"PK".to_vec())
        .await
        .unwrap();
    assert!(unpacked.children.is_empty());
    assert_eq!(unpacked.stats.failures, 1);
}

#[tokio::test]
async fn test_async_missing_program() {
    let err = AsyncUnpacker::with_program("/nonexistent/bin/7zz")
        .unpack_bytes("a.zip", b"PK".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Spawn { .. }));
}

#[tokio::test]
async fn test_async_exclude_glob() {
    let work = tempdir().unwrap();
    let data = tar_archive(&[("keep.txt", b"keep"), ("skip.log", b"skip")]);

    let unpacked = AsyncUnpacker::with_program(fake_program(work.path(), TAR_EXTRACT))
        .exclude_glob(&["*.log"])
        .unpack_bytes("a.zip", data)
        .await
        .unwrap();

    let names: Vec<_> = unpacked.children.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["keep.txt"]);
}
