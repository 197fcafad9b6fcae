//! HTTPS mounts against an in-memory server.
//!
//! The fake server counts responses whose bodies are still alive, which is
//! how a leaked connection shows up.

mod common;

use common::{FakeHttp, FakeHttpsFactory};
use spdos_vfs::{
    BackendRegistry, Errno, HttpsOptions, LoopbackConnector, MountRequest, OpenFlags,
    ResolveContext, Vfs, Whence,
};

fn mounted(http: &FakeHttp) -> (Vfs, ResolveContext) {
    let mut vfs = common::vfs(http, &LoopbackConnector::new());
    vfs.mount(MountRequest::new(1, "https", "/pub").with_hostname("files.example.org"))
        .unwrap();
    let ctx = vfs.setmountpoint(1).unwrap();
    (vfs, ctx)
}

#[test]
fn test_failed_open_leaks_no_connection() {
    let http = FakeHttp::new();
    http.serve("/pub/readme.txt", "hello from the web");
    let (mut vfs, ctx) = mounted(&http);

    for _ in 0..8 {
        let err = vfs.open(ctx, "missing.txt", OpenFlags::read(), 0).unwrap_err();
        assert_eq!(err.errno(), Errno::ENOENT);
        assert_eq!(http.live_connections(), 0);
    }
    assert!(vfs.descriptors().is_empty());

    let fd = vfs.open(ctx, "readme.txt", OpenFlags::read(), 0).unwrap();
    let mut buf = [0u8; 64];
    let n = vfs.read(fd, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello from the web");
    vfs.close(fd).unwrap();
    assert_eq!(http.live_connections(), 0);
}

#[test]
fn test_writes_are_rejected() {
    let http = FakeHttp::new();
    http.serve("/pub/readme.txt", "r");
    let (mut vfs, ctx) = mounted(&http);

    for flags in [OpenFlags::write_only(), OpenFlags::create_truncate()] {
        let err = vfs.open(ctx, "readme.txt", flags, 0o644).unwrap_err();
        assert_eq!(err.errno(), Errno::EROFS);
    }
    assert_eq!(http.requests(), 0, "rejected before any request");
    assert_eq!(vfs.mkdir(ctx, "new").unwrap_err().errno(), Errno::ENOSYS);
}

#[test]
fn test_streamed_file_cannot_seek() {
    let http = FakeHttp::new();
    let big: Vec<u8> = (0..40_000u32).map(|i| (i % 256) as u8).collect();
    http.serve("/pub/big.bin", big.clone());
    let (mut vfs, ctx) = mounted(&http);

    let fd = vfs.open(ctx, "big.bin", OpenFlags::read(), 0).unwrap();
    assert_eq!(http.live_connections(), 1, "body is streamed");
    assert_eq!(
        vfs.lseek(fd, 10, Whence::Set).unwrap_err().errno(),
        Errno::ESPIPE
    );

    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = vfs.read(fd, &mut chunk).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(out, big);
    assert_eq!(vfs.lseek(fd, 0, Whence::Cur).unwrap(), 40_000);

    vfs.close(fd).unwrap();
    assert_eq!(http.live_connections(), 0);
}

#[test]
fn test_small_file_is_buffered_and_seekable() {
    let http = FakeHttp::new();
    http.serve("/pub/small.txt", "0123456789");
    let (mut vfs, ctx) = mounted(&http);

    let fd = vfs.open(ctx, "small.txt", OpenFlags::read(), 0).unwrap();
    assert_eq!(http.live_connections(), 0, "buffered body is released");
    assert_eq!(vfs.lseek(fd, -3, Whence::End).unwrap(), 7);
    let mut buf = [0u8; 8];
    let n = vfs.read(fd, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"789");
    vfs.close(fd).unwrap();
}

#[test]
fn test_directory_index_and_stat() {
    let http = FakeHttp::new();
    http.serve("/pub/a.txt", "aaa")
        .serve("/pub/b.txt", "bbbbb")
        .serve("/pub/games/one.tap", "1");
    let (mut vfs, ctx) = mounted(&http);

    let dh = vfs.opendir(ctx, ".").unwrap();
    let mut names = Vec::new();
    while let Some(entry) = vfs.readdir(dh).unwrap() {
        names.push(entry.name);
    }
    vfs.closedir(dh).unwrap();
    assert_eq!(names, vec!["a.txt", "b.txt", "games"]);

    let file = vfs.stat(ctx, "b.txt").unwrap();
    assert!(file.is_file());
    assert_eq!(file.size, 5);
    assert!(vfs.isdir(ctx, "games").unwrap());
    assert_eq!(vfs.stat(ctx, "nope").unwrap_err().errno(), Errno::ENOENT);
    assert_eq!(http.live_connections(), 0);
}

#[test]
fn test_umount_drops_streams() {
    let http = FakeHttp::new();
    http.serve("/pub/big.bin", vec![7u8; 20_000]);
    let (mut vfs, ctx) = mounted(&http);

    let fd = vfs.open(ctx, "big.bin", OpenFlags::read(), 0).unwrap();
    assert_eq!(http.live_connections(), 1);
    vfs.umount(1).unwrap();
    assert_eq!(http.live_connections(), 0);

    let mut buf = [0u8; 1];
    assert_eq!(vfs.read(fd, &mut buf).unwrap_err().errno(), Errno::EBADF);
}

#[test]
fn test_buffer_limit_is_configurable() {
    let http = FakeHttp::new();
    http.serve("/pub/mid.bin", vec![1u8; 1000]);

    let mut registry = BackendRegistry::default();
    registry.register(
        "https",
        FakeHttpsFactory {
            http: http.clone(),
            options: HttpsOptions {
                buffer_limit: 100,
                ..HttpsOptions::default()
            },
        },
    );
    let mut vfs = Vfs::with_registry(registry, 8);
    vfs.mount(MountRequest::new(2, "https", "pub").with_hostname("files.example.org"))
        .unwrap();

    let fd = vfs
        .open(ResolveContext::new(0), "2:mid.bin", OpenFlags::read(), 0)
        .unwrap();
    assert_eq!(http.live_connections(), 1, "larger than the limit, so streamed");
    vfs.close(fd).unwrap();
    assert_eq!(http.live_connections(), 0);
}
