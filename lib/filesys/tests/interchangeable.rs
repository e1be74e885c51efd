//! The same scenarios, run against every backend.

use filesys::{ErrorKind, FileSystem, host_fs, mem_fs, ops};
use pretty_assertions::assert_eq;
use std::io::{Read, Seek, SeekFrom, Write};
use tempfile::TempDir;

fn kind<T: std::fmt::Debug>(result: filesys::Result<T>) -> ErrorKind {
    result.expect_err("operation should have failed").kind()
}

fn names<F: FileSystem>(fs: &F, path: &str) -> Vec<String> {
    fs.read_dir(path)
        .unwrap()
        .into_iter()
        .map(|info| info.name)
        .collect()
}

fn tree_operations<F: FileSystem>(fs: &F) -> anyhow::Result<()> {
    ops::create_structure(
        fs,
        [
            ("/bar/hello1.txt", "Hello, world"),
            ("/bar/hello2.txt", "Hello, you"),
            ("/foo/f.txt", "f"),
            ("/foo/Z.txt", "z"),
        ],
        ["/foo/c", "/empty"],
    )?;

    assert_eq!(names(fs, "/"), ["bar", "empty", "foo"]);
    assert_eq!(names(fs, "/foo"), ["Z.txt", "c", "f.txt"]);

    assert_eq!(kind(fs.mkdir("/foo")), ErrorKind::AlreadyExists);
    assert_eq!(kind(fs.remove("/foo")), ErrorKind::NotEmpty);
    assert_eq!(kind(fs.remove("/")), ErrorKind::PermissionDenied);
    assert_eq!(kind(fs.stat("/foo/f.txt/")), ErrorKind::NotADirectory);
    assert_eq!(kind(fs.read_file("/foo")), ErrorKind::IsADirectory);
    assert_eq!(kind(fs.rename("/foo", "/foo/c/d")), ErrorKind::InvalidDestination);
    assert_eq!(kind(fs.rename("/bar", "/foo")), ErrorKind::AlreadyExists);

    fs.rename("/bar/hello2.txt", "/bar/hello1.txt")?;
    ops::verify_file_content(fs, "/bar/hello1.txt", b"Hello, you")?;
    fs.rename("/bar", "/empty/bar")?;
    assert_eq!(names(fs, "/empty/bar"), ["hello1.txt"]);

    fs.remove("/foo/c")?;
    fs.remove_all("/foo")?;
    assert!(fs.stat("/foo").unwrap_err().is_not_found());
    assert_eq!(names(fs, "/"), ["empty"]);
    Ok(())
}

fn handle_operations<F: FileSystem>(fs: &F) -> anyhow::Result<()> {
    let mut file = fs.create("/sparse")?;
    file.write_all(b"Hello")?;
    file.seek(SeekFrom::Current(3))?;
    file.write_all(b"Hey")?;
    file.close()?;
    assert_eq!(fs.read_file("/sparse")?, b"Hello\0\0\0Hey");
    assert_eq!(fs.stat("/sparse")?.len, 11);

    let mut file = fs.open("/sparse")?;
    assert_eq!(file.seek(SeekFrom::End(-3))?, 8);
    let mut tail = String::new();
    file.read_to_string(&mut tail)?;
    assert_eq!(tail, "Hey");
    assert_eq!(file.read(&mut [0; 8])?, 0);
    let err = file.write(b"x").unwrap_err();
    assert_eq!(ErrorKind::from(&err), ErrorKind::NotWritable);
    let err = file.seek(SeekFrom::Current(-100)).unwrap_err();
    assert_eq!(ErrorKind::from(&err), ErrorKind::NegativeSeek);
    drop(file);

    fs.put_file("/d/b", b"")?;
    fs.put_file("/d/a", b"")?;
    fs.mkdir("/d/c")?;
    let mut dir = fs.open("/d")?;
    let first = dir.readdir(2)?;
    let rest = dir.readdir(5)?;
    let batch_names = |batch: &filesys::ReadDirBatch| -> Vec<String> {
        batch.entries.iter().map(|info| info.name.clone()).collect()
    };
    assert_eq!(batch_names(&first), ["a", "b"]);
    assert!(!first.eof);
    assert_eq!(batch_names(&rest), ["c"]);
    assert!(rest.eof);
    dir.close()?;
    assert_eq!(dir.close().unwrap_err().kind(), ErrorKind::Closed);
    Ok(())
}

fn working_directories<F: FileSystem>(fs: &F) -> anyhow::Result<()> {
    fs.mkdir_all("/a/b/c")?;
    assert_eq!(fs.current_dir(), "/");

    let b = fs.change_dir("/a/b")?;
    assert_eq!(b.current_dir(), "/a/b");
    b.write_file("c/file", b"through b")?;
    ops::verify_file_content(fs, "/a/b/c/file", b"through b")?;

    let root = b.change_dir("../../..")?;
    assert_eq!(root.current_dir(), "/");
    assert_eq!(fs.current_dir(), "/", "the first instance did not move");
    assert_eq!(kind(b.change_dir("c/file")), ErrorKind::NotADirectory);
    Ok(())
}

macro_rules! contract_tests {
    ($($backend:ident => $make:expr;)*) => {
        $(
            mod $backend {
                use super::*;

                #[test]
                fn tree_operations() -> anyhow::Result<()> {
                    let (fs, _guard) = $make;
                    super::tree_operations(&fs)
                }

                #[test]
                fn handle_operations() -> anyhow::Result<()> {
                    let (fs, _guard) = $make;
                    super::handle_operations(&fs)
                }

                #[test]
                fn working_directories() -> anyhow::Result<()> {
                    let (fs, _guard) = $make;
                    super::working_directories(&fs)
                }
            }
        )*
    };
}

fn in_memory() -> (mem_fs::FileSystem, ()) {
    (mem_fs::FileSystem::default(), ())
}

fn on_host() -> (host_fs::FileSystem, TempDir) {
    let temp = TempDir::new().expect("create a temporary directory");
    let fs = host_fs::FileSystem::new(temp.path()).expect("get filesystem");
    (fs, temp)
}

contract_tests! {
    memory => in_memory();
    host => on_host();
}
