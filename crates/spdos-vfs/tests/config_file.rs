//! Building a dispatcher from a TOML file on disk.

mod common;

use std::io::Write;
use std::sync::Arc;

use spdos_vfs::{
    BackendRegistry, ConfigError, Errno, LoopbackConnector, OpenFlags, ResolveContext, Vfs,
    VfsConfig,
};

fn write_config(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_and_mount() {
    common::init_tracing();
    let file = write_config(
        r#"
        max_descriptors = 4

        [netfs]
        timeout_ms = 250

        [[mount]]
        index = 1
        protocol = "ram"

        [[mount]]
        index = 2
        protocol = "tnfs"
        hostname = "loopback"
        user = "guest"
        password = "secret"
        "#,
    );

    let config = VfsConfig::load(file.path()).unwrap();
    let netfs = LoopbackConnector::new();
    let mut registry = BackendRegistry::with_defaults(config.https_options());
    registry.register_network_fs("tnfs", Arc::new(netfs.clone()), config.netfs_options());
    let mut vfs = Vfs::from_config_with_registry(&config, registry).unwrap();

    let mounts = vfs.mounts();
    assert_eq!(
        mounts.iter().map(|m| m.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(mounts[2].user.as_deref(), Some("guest"));
    assert_eq!(netfs.live_sessions(), 1);

    // max_descriptors applies
    let ctx = ResolveContext::new(1);
    let fds: Vec<_> = (0..4)
        .map(|i| {
            vfs.open(ctx, &format!("f{i}"), OpenFlags::create_truncate(), 0o644)
                .unwrap()
        })
        .collect();
    assert_eq!(
        vfs.open(ctx, "f4", OpenFlags::create_truncate(), 0o644)
            .unwrap_err()
            .errno(),
        Errno::EMFILE
    );
    for fd in fds {
        vfs.close(fd).unwrap();
    }
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = VfsConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn test_unregistered_protocol_fails_startup() {
    let file = write_config(
        r#"
        [[mount]]
        index = 2
        protocol = "tnfs"
        hostname = "loopback"
        "#,
    );
    let config = VfsConfig::load(file.path()).unwrap();
    match Vfs::from_config(&config) {
        Err(ConfigError::Mount { index: 2, source }) => {
            assert_eq!(source.errno(), Errno::ENODEV);
        }
        other => panic!("expected a mount error, got {other:?}"),
    }
}

#[test]
fn test_local_file_size_limit() {
    let file = write_config(
        r#"
        [local]
        max_file_size = 8

        [https]
        index_limit = 4096
        "#,
    );
    let config = VfsConfig::load(file.path()).unwrap();
    assert_eq!(config.https_options().index_limit, 4096);
    let mut vfs = Vfs::from_config(&config).unwrap();

    let ctx = ResolveContext::new(0);
    let fd = vfs
        .open(ctx, "tiny", OpenFlags::create_truncate(), 0o644)
        .unwrap();
    assert_eq!(vfs.write(fd, b"12345678").unwrap(), 8);
    assert_eq!(vfs.write(fd, b"9").unwrap_err().errno(), Errno::EFBIG);
    vfs.close(fd).unwrap();
}
