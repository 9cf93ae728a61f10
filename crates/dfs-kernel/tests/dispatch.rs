//! End-to-end tests for the dispatcher: path translation, descriptor
//! lifecycle, table limits and error mapping.

mod common;

use std::io::Write;
use std::sync::Arc;

use common::{Recorder, init_tracing, vfs_with_root};
use dfs_kernel::backends::MemoryFs;
use dfs_kernel::{
    Addressing, DfsConfig, DfsError, DirEntry, Errno, OpenFlags, Vfs, Whence, to_posix,
};

fn vfs_with_recorder(path: &str, addressing: Addressing) -> (Vfs, Recorder) {
    let vfs = vfs_with_root();
    let recorder = Recorder::new();
    vfs.mount_instance(path, Arc::new(recorder.clone()), addressing)
        .unwrap();
    (vfs, recorder)
}

// ============================================================================
// Path translation
// ============================================================================

#[test]
fn test_parent_segments_resolve_before_lookup() {
    init_tracing();
    let vfs = Vfs::new(DfsConfig::default()).unwrap();
    let root = Recorder::new();
    vfs.mount_instance("/", Arc::new(root.clone()), Addressing::MountRelative)
        .unwrap();
    vfs.mount_instance("/data", Arc::new(MemoryFs::new()), Addressing::MountRelative)
        .unwrap();

    let fd = vfs.open("/data/../etc/conf", OpenFlags::read()).unwrap();
    assert_eq!(root.last().as_deref(), Some("open etc/conf"));
    vfs.close(fd).unwrap();
}

#[test]
fn test_mount_relative_subpath() {
    let (vfs, recorder) = vfs_with_recorder("/data", Addressing::MountRelative);

    let fd = vfs.open("/data//file.txt", OpenFlags::read()).unwrap();
    vfs.close(fd).unwrap();
    let fd = vfs.open("/data", OpenFlags::directory()).unwrap();
    vfs.close(fd).unwrap();

    assert_eq!(
        recorder.seen(),
        vec!["open file.txt", "close file.txt", "open /", "close /"]
    );
}

#[test]
fn test_full_path_addressing() {
    let (vfs, recorder) = vfs_with_recorder("/mnt", Addressing::FullPath);

    let fd = vfs.open("/mnt/./x/y", OpenFlags::read()).unwrap();
    assert_eq!(recorder.last().as_deref(), Some("open /mnt/x/y"));
    vfs.close(fd).unwrap();

    vfs.stat("/mnt/x").unwrap();
    assert_eq!(recorder.last().as_deref(), Some("stat /mnt/x"));
}

#[test]
fn test_stat_mount_point_is_synthesized() {
    let (vfs, recorder) = vfs_with_recorder("/mnt", Addressing::MountRelative);
    assert!(vfs.stat("/mnt").unwrap().is_dir());
    assert!(vfs.stat("/").unwrap().is_dir());
    assert!(recorder.seen().is_empty());
}

#[test]
fn test_escape_above_root_fails_before_dispatch() {
    let (vfs, recorder) = vfs_with_recorder("/", Addressing::MountRelative);
    assert!(matches!(
        vfs.open("/../etc", OpenFlags::read()),
        Err(DfsError::InvalidArgument(_))
    ));
    assert!(matches!(vfs.open("", OpenFlags::read()), Err(DfsError::InvalidArgument(_))));
    assert!(recorder.seen().is_empty());
    assert_eq!(vfs.open_count(), 0);
}

#[test]
fn test_relative_paths_follow_cwd() {
    let vfs = Vfs::new(DfsConfig::default()).unwrap();
    vfs.mount_instance("/", Arc::new(MemoryFs::with_dirs(["home/user"])), Addressing::MountRelative)
        .unwrap();
    vfs.chdir("home/user").unwrap();
    assert_eq!(vfs.getcwd(), "/home/user");

    let fd = vfs.open("notes.txt", OpenFlags::create()).unwrap();
    vfs.write(fd, b"todo").unwrap();
    vfs.close(fd).unwrap();
    assert_eq!(vfs.stat("/home/user/notes.txt").unwrap().size, 4);

    vfs.chdir("..").unwrap();
    assert_eq!(vfs.getcwd(), "/home");
    assert!(vfs.stat("user/notes.txt").is_ok());
}

// ============================================================================
// Descriptor lifecycle
// ============================================================================

#[test]
fn test_second_open_busy_until_close() {
    let (vfs, _recorder) = vfs_with_recorder("/dev", Addressing::MountRelative);

    let first = vfs.open("/dev/uart", OpenFlags::read()).unwrap();
    assert!(matches!(
        vfs.open("/dev/uart", OpenFlags::read_write()),
        Err(DfsError::Busy(_))
    ));
    // Same subpath on another mount is a different file.
    let other = vfs.open("/uart", OpenFlags::create()).unwrap();

    vfs.close(first).unwrap();
    let third = vfs.open("/dev/uart", OpenFlags::read()).unwrap();
    assert_eq!(third, first);
    vfs.close(third).unwrap();
    vfs.close(other).unwrap();
}

#[test]
fn test_seek_caches_backend_position() {
    let (vfs, _recorder) = vfs_with_recorder("/r", Addressing::MountRelative);
    let fd = vfs.open("/r/f", OpenFlags::read()).unwrap();

    // The backend rounds down to 8.
    assert_eq!(vfs.lseek(fd, 13, Whence::Set).unwrap(), 8);
    assert_eq!(vfs.lseek(fd, 0, Whence::Cur).unwrap(), 8);
    let mut buf = [0u8; 32];
    assert_eq!(vfs.read(fd, &mut buf).unwrap(), 8);
    assert!(matches!(
        vfs.lseek(fd, 17, Whence::Set),
        Err(DfsError::InvalidArgument(_))
    ));
    vfs.close(fd).unwrap();
}

#[test]
fn test_unsupported_operations() {
    let (vfs, _recorder) = vfs_with_recorder("/r", Addressing::MountRelative);
    let fd = vfs.open("/r/f", OpenFlags::read_write()).unwrap();
    assert!(matches!(vfs.write(fd, b"x"), Err(DfsError::NotSupported)));
    assert!(matches!(vfs.flush(fd), Err(DfsError::NotSupported)));
    assert!(matches!(vfs.ioctl(fd, 1, 0), Err(DfsError::NotSupported)));
    assert!(matches!(vfs.statfs("/r"), Err(DfsError::NotSupported)));
    vfs.close(fd).unwrap();
}

#[test]
fn test_table_grows_to_ceiling() {
    init_tracing();
    let config = DfsConfig::default().with_fd_limits(2, 2, 5);
    let vfs = Vfs::new(config).unwrap();
    vfs.mount_instance("/", Arc::new(MemoryFs::new()), Addressing::MountRelative)
        .unwrap();
    assert_eq!(vfs.fd_capacity(), 2);

    let mut fds = Vec::new();
    for i in 0..5 {
        let fd = vfs.open(&format!("/f{i}"), OpenFlags::create()).unwrap();
        vfs.write(fd, format!("file {i}").as_bytes()).unwrap();
        vfs.lseek(fd, 0, Whence::Set).unwrap();
        fds.push(fd);
    }
    assert_eq!(fds, vec![0, 1, 2, 3, 4]);
    assert_eq!(vfs.fd_capacity(), 5);

    assert!(matches!(
        vfs.open("/f5", OpenFlags::create()),
        Err(DfsError::TableFull(_))
    ));
    assert!(matches!(vfs.dup(0, 0), Err(DfsError::TableFull(_))));

    // Earlier descriptors survived growth.
    for (i, fd) in fds.iter().enumerate() {
        let mut buf = [0u8; 16];
        let n = vfs.read(*fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], format!("file {i}").as_bytes());
    }

    vfs.close(2).unwrap();
    assert_eq!(vfs.open("/f5", OpenFlags::create()).unwrap(), 2);
}

#[test]
fn test_dup_keeps_mount_busy() {
    let vfs = vfs_with_root();
    vfs.mount_instance("/tmp", Arc::new(MemoryFs::new()), Addressing::MountRelative)
        .unwrap();
    let fd = vfs.open("/tmp/a", OpenFlags::create()).unwrap();
    let copy = vfs.dup(fd, 0).unwrap();
    assert_ne!(copy, fd);

    vfs.close(fd).unwrap();
    assert!(matches!(vfs.unmount("/tmp"), Err(DfsError::Busy(_))));
    // The path key is free again even though the copy is open.
    let reopened = vfs.open("/tmp/a", OpenFlags::read()).unwrap();
    vfs.close(reopened).unwrap();

    vfs.close(copy).unwrap();
    vfs.unmount("/tmp").unwrap();
}

#[test]
fn test_directory_iteration() {
    let vfs = vfs_with_root();
    for name in ["c", "a", "b"] {
        let fd = vfs.open(&format!("/dir/{name}"), OpenFlags::create()).unwrap();
        vfs.close(fd).unwrap();
    }
    let fd = vfs.open("/dir", OpenFlags::directory()).unwrap();
    let mut entries = vec![DirEntry::default(); 2];
    let mut names = Vec::new();
    loop {
        let n = vfs.getdents(fd, &mut entries).unwrap();
        if n == 0 {
            break;
        }
        names.extend(entries[..n].iter().map(|e| e.name.clone()));
    }
    assert_eq!(names, vec!["a", "b", "c"]);
    vfs.close(fd).unwrap();
}

// ============================================================================
// Path operations
// ============================================================================

#[test]
fn test_rename_and_unlink_translate() {
    let (vfs, recorder) = vfs_with_recorder("/r", Addressing::MountRelative);
    vfs.rename("/r/a", "/r/sub/../b").unwrap();
    vfs.unlink("/r/b").unwrap();
    assert_eq!(recorder.seen(), vec!["rename a -> b", "unlink b"]);
}

#[test]
fn test_rename_across_mounts() {
    let (vfs, recorder) = vfs_with_recorder("/r", Addressing::MountRelative);
    assert!(matches!(vfs.rename("/r/a", "/a"), Err(DfsError::CrossDevice)));
    assert!(recorder.seen().is_empty());
}

#[test]
fn test_unlink_open_file() {
    let (vfs, recorder) = vfs_with_recorder("/r", Addressing::MountRelative);
    let fd = vfs.open("/r/f", OpenFlags::read()).unwrap();
    assert!(matches!(vfs.unlink("/r/f"), Err(DfsError::Busy(_))));
    vfs.close(fd).unwrap();
    vfs.unlink("/r/f").unwrap();
    assert_eq!(recorder.last().as_deref(), Some("unlink f"));
}

// ============================================================================
// Error numbers and configuration
// ============================================================================

#[test]
fn test_posix_results() {
    let vfs = vfs_with_root();
    let missing = vfs.open("/missing", OpenFlags::read());
    assert_eq!(to_posix(missing), Errno::NoEntry.as_neg());

    let fd = vfs.open("/present", OpenFlags::create()).unwrap();
    assert_eq!(to_posix(vfs.write(fd, b"abc")), 3);
    assert_eq!(to_posix(vfs.open("/present", OpenFlags::read())), Errno::Busy.as_neg());
    vfs.close(fd).unwrap();
    assert_eq!(to_posix(vfs.close(fd).map(|_| 0)), Errno::BadFile.as_neg());
}

#[test]
fn test_config_file_sizes_tables() {
    init_tracing();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "(fd_initial: 1, fd_grow_step: 1, fd_max: 2, mounts_max: 1, working_directory: \"/\")"
    )
    .unwrap();

    let config = DfsConfig::load(file.path()).unwrap();
    let vfs = Vfs::new(config).unwrap();
    vfs.mount_instance("/", Arc::new(MemoryFs::new()), Addressing::MountRelative)
        .unwrap();
    assert!(matches!(
        vfs.mount_instance("/x", Arc::new(MemoryFs::new()), Addressing::MountRelative),
        Err(DfsError::TableFull(_))
    ));

    let a = vfs.open("/a", OpenFlags::create()).unwrap();
    let b = vfs.open("/b", OpenFlags::create()).unwrap();
    assert_eq!((a, b), (0, 1));
    assert!(vfs.open("/c", OpenFlags::create()).is_err());
}
