//! A backend passing every operation through to a directory of the host.
//!
//! Virtual paths are cleaned before being joined under the root, so `..`
//! never leads outside of it.

use crate::path::{SEPARATOR, clean, has_trailing_separator, is_absolute, is_entry_name, split};
use crate::{
    ErrorKind, FileInfo, FileOpener, FileType, OpenOptions, OpenOptionsConfig,
    ReadDirBatch, ReadDirCursor, Result, VirtualFile,
};
#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct FileSystem {
    root: PathBuf,
    /// Working directory, as a clean absolute virtual path.
    cwd: String,
}

impl FileSystem {
    /// Use the existing directory `root` as the root of the tree.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let display = root.display().to_string();
        let root = dunce::canonicalize(&root).map_err(|error| io_kind(&error).at("open", &display))?;
        if !root.is_dir() {
            return Err(ErrorKind::NotADirectory.at("open", display));
        }

        Ok(Self {
            root,
            cwd: SEPARATOR.to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The clean absolute virtual form of `path`.
    fn virtual_path(&self, path: &str) -> String {
        if is_absolute(path) {
            clean(path)
        } else {
            clean(&format!("{}{SEPARATOR}{path}", self.cwd))
        }
    }

    fn prepare_path(&self, path: &str) -> std::result::Result<(String, PathBuf), ErrorKind> {
        if path.is_empty() {
            return Err(ErrorKind::InvalidPath);
        }

        let virtual_path = self.virtual_path(path);
        let host_path = self.root.join(virtual_path.trim_start_matches(SEPARATOR));
        debug_assert!(host_path.starts_with(&self.root));
        Ok((virtual_path, host_path))
    }

    /// Metadata of an existing entry, honoring a trailing separator.
    fn metadata(&self, path: &str, host_path: &Path) -> std::result::Result<fs::Metadata, ErrorKind> {
        let metadata = fs::metadata(host_path).map_err(|error| io_kind(&error))?;
        if has_trailing_separator(path) && !metadata.is_dir() {
            return Err(ErrorKind::NotADirectory);
        }
        Ok(metadata)
    }

    /// Resolve a path naming a file to be written.
    fn prepare_file_path(&self, path: &str) -> std::result::Result<(String, PathBuf), ErrorKind> {
        if path.ends_with(SEPARATOR) {
            return Err(ErrorKind::InvalidPath);
        }
        let (virtual_path, host_path) = self.prepare_path(path)?;
        if !is_entry_name(split(&virtual_path).1) {
            return Err(ErrorKind::InvalidPath);
        }
        Ok((virtual_path, host_path))
    }

    fn remove_entry(&self, path: &str, recursive: bool) -> std::result::Result<(), ErrorKind> {
        let (virtual_path, host_path) = self.prepare_path(path)?;
        let metadata = self.metadata(path, &host_path)?;
        if virtual_path == "/" {
            warn!(path, "the root cannot be removed");
            return Err(ErrorKind::PermissionDenied);
        }

        let result = if !metadata.is_dir() {
            fs::remove_file(&host_path)
        } else if recursive {
            fs::remove_dir_all(&host_path)
        } else {
            // `remove_dir` does not report a non-empty directory the same way
            // on every platform.
            if fs::read_dir(&host_path)
                .map_err(|error| io_kind(&error))?
                .next()
                .is_some()
            {
                return Err(ErrorKind::NotEmpty);
            }
            fs::remove_dir(&host_path)
        };
        result.map_err(|error| io_kind(&error))
    }

    fn rename_entry(&self, from: &str, to: &str) -> std::result::Result<(), ErrorKind> {
        if from.is_empty() || to.is_empty() {
            return Err(ErrorKind::InvalidPath);
        }

        let (source_path, source) = self.prepare_path(from)?;
        let (target_path, target) = self.prepare_path(to)?;
        if source_path == target_path {
            return Ok(());
        }
        if source_path == "/" || target_path == "/" {
            warn!(from, to, "the root cannot be renamed");
            return Err(ErrorKind::PermissionDenied);
        }

        let source_metadata = self.metadata(from, &source)?;
        if target_path.starts_with(&format!("{source_path}{SEPARATOR}")) {
            return Err(ErrorKind::InvalidDestination);
        }
        if !is_entry_name(split(&target_path).1) {
            return Err(ErrorKind::InvalidPath);
        }

        let (target_dir, _) = split(&target_path);
        if !fs::metadata(self.prepare_path(target_dir)?.1)
            .map_err(|error| io_kind(&error))?
            .is_dir()
        {
            return Err(ErrorKind::NotADirectory);
        }

        match fs::metadata(&target) {
            Ok(existing) if existing.is_dir() || source_metadata.is_dir() => {
                return Err(ErrorKind::AlreadyExists);
            }
            Ok(_) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(io_kind(&error)),
        }

        fs::rename(&source, &target).map_err(|error| io_kind(&error))
    }
}

impl crate::FileSystem for FileSystem {
    fn mkdir(&self, path: &str) -> Result<()> {
        debug!(path, "mkdir");
        let (virtual_path, host_path) = self.prepare_path(path).map_err(|kind| kind.at("mkdir", path))?;
        if virtual_path == "/" {
            return Ok(());
        }
        if fs::symlink_metadata(&host_path).is_ok() {
            return Err(ErrorKind::AlreadyExists.at("mkdir", path));
        }
        fs::create_dir(&host_path).map_err(|error| io_kind(&error).at("mkdir", path))
    }

    fn mkdir_all(&self, path: &str) -> Result<()> {
        debug!(path, "mkdir_all");
        let (_, host_path) = match self.prepare_path(path) {
            Ok(prepared) => prepared,
            Err(ErrorKind::InvalidPath) => return Ok(()),
            Err(kind) => return Err(kind.at("mkdir", path)),
        };
        fs::create_dir_all(&host_path).map_err(|error| io_kind(&error).at("mkdir", path))
    }

    fn remove(&self, path: &str) -> Result<()> {
        debug!(path, "remove");
        self.remove_entry(path, false)
            .map_err(|kind| kind.at("remove", path))
    }

    fn remove_all(&self, path: &str) -> Result<()> {
        debug!(path, "remove_all");
        self.remove_entry(path, true)
            .map_err(|kind| kind.at("remove", path))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        debug!(from, to, "rename");
        self.rename_entry(from, to)
            .map_err(|kind| kind.between("rename", from, to))
    }

    fn stat(&self, path: &str) -> Result<FileInfo> {
        let (virtual_path, host_path) = self.prepare_path(path).map_err(|kind| kind.at("stat", path))?;
        let metadata = self
            .metadata(path, &host_path)
            .map_err(|kind| kind.at("stat", path))?;
        Ok(file_info(entry_name(&virtual_path), &metadata))
    }

    fn chtimes(&self, path: &str, accessed: u64, modified: u64) -> Result<()> {
        debug!(path, accessed, modified, "chtimes");
        let (_, host_path) = self.prepare_path(path).map_err(|kind| kind.at("chtimes", path))?;
        self.metadata(path, &host_path)
            .map_err(|kind| kind.at("chtimes", path))?;
        filetime::set_file_times(&host_path, file_time(accessed), file_time(modified))
            .map_err(|error| io_kind(&error).at("chtimes", path))
    }

    fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>> {
        let (_, host_path) = self.prepare_path(path).map_err(|kind| kind.at("readdir", path))?;
        list(&host_path).map_err(|error| io_kind(&error).at("readdir", path))
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let (_, host_path) = self.prepare_path(path).map_err(|kind| kind.at("readfile", path))?;
        if self
            .metadata(path, &host_path)
            .map_err(|kind| kind.at("readfile", path))?
            .is_dir()
        {
            return Err(ErrorKind::IsADirectory.at("readfile", path));
        }
        fs::read(&host_path).map_err(|error| io_kind(&error).at("readfile", path))
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        debug!(path, len = data.len(), "write_file");
        let (_, host_path) = self
            .prepare_file_path(path)
            .map_err(|kind| kind.at("writefile", path))?;
        if host_path.is_dir() {
            return Err(ErrorKind::IsADirectory.at("writefile", path));
        }
        fs::write(&host_path, data).map_err(|error| io_kind(&error).at("writefile", path))
    }

    fn new_open_options(&self) -> OpenOptions<'_> {
        OpenOptions::new(self)
    }

    fn change_dir(&self, path: &str) -> Result<Self> {
        let (virtual_path, host_path) = self.prepare_path(path).map_err(|kind| kind.at("cd", path))?;
        let metadata = self
            .metadata(path, &host_path)
            .map_err(|kind| kind.at("cd", path))?;
        if !metadata.is_dir() {
            return Err(ErrorKind::NotADirectory.at("cd", path));
        }

        Ok(Self {
            root: self.root.clone(),
            cwd: virtual_path,
        })
    }

    fn current_dir(&self) -> String {
        self.cwd.clone()
    }
}

impl FileOpener for FileSystem {
    fn open(&self, path: &str, conf: &OpenOptionsConfig) -> Result<Box<dyn VirtualFile>> {
        let op = conf.op();
        let (virtual_path, host_path) = self.prepare_path(path).map_err(|kind| kind.at(op, path))?;

        match self.metadata(path, &host_path) {
            Ok(metadata) if metadata.is_dir() => {
                if conf.write() || (conf.create() && conf.truncate()) {
                    return Err(ErrorKind::IsADirectory.at(op, path));
                }
                trace!(path, "opened directory");
                return Ok(Box::new(HostDir {
                    host_path,
                    path: path.to_owned(),
                    cursor: ReadDirCursor::new(),
                    closed: false,
                }));
            }
            Ok(_) => {}
            Err(ErrorKind::NotFound) if conf.create() => {}
            Err(kind) => return Err(kind.at(op, path)),
        }
        if conf.create() {
            self.prepare_file_path(path).map_err(|kind| kind.at(op, path))?;
        }

        let readable = conf.read() || !conf.write();
        let file = fs::OpenOptions::new()
            .read(true)
            .write(conf.write() || conf.create() || conf.truncate())
            .create(conf.create())
            .truncate(conf.truncate())
            .open(&host_path)
            .map_err(|error| io_kind(&error).at(op, path))?;
        trace!(path, "opened file");

        Ok(Box::new(HostFile {
            file: Some(file),
            name: entry_name(&virtual_path).to_owned(),
            path: path.to_owned(),
            readable,
            writable: conf.write(),
        }))
    }
}

/// An open file of the host.
#[derive(Debug)]
pub struct HostFile {
    /// `None` once closed.
    file: Option<fs::File>,
    name: String,
    path: String,
    readable: bool,
    writable: bool,
}

impl HostFile {
    fn open_file(&mut self, op: &'static str) -> Result<&mut fs::File> {
        self.file
            .as_mut()
            .ok_or_else(|| ErrorKind::Closed.at(op, self.path.as_str()))
    }
}

impl Read for HostFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.file.is_some() && !self.readable {
            return Err(ErrorKind::NotReadable.at("read", self.path.as_str()).into());
        }
        self.open_file("read")?.read(buf)
    }
}

impl Write for HostFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.file.is_some() && !self.writable {
            return Err(ErrorKind::NotWritable.at("write", self.path.as_str()).into());
        }
        self.open_file("write")?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Seek for HostFile {
    fn seek(&mut self, position: SeekFrom) -> io::Result<u64> {
        let path = self.path.clone();
        let file = self.open_file("seek")?;
        let base = match position {
            SeekFrom::Start(_) => 0,
            SeekFrom::Current(_) => i128::from(file.stream_position()?),
            SeekFrom::End(_) => i128::from(file.metadata()?.len()),
        };
        let offset = match position {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(offset) | SeekFrom::End(offset) => i128::from(offset),
        };
        if base + offset < 0 {
            return Err(ErrorKind::NegativeSeek.at("seek", path).into());
        }
        if base + offset > i128::from(i64::MAX) {
            return Err(ErrorKind::SeekOverflow.at("seek", path).into());
        }
        file.seek(position)
    }
}

impl VirtualFile for HostFile {
    fn stat(&self) -> Result<FileInfo> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| ErrorKind::Closed.at("stat", self.path.as_str()))?;
        let metadata = file
            .metadata()
            .map_err(|error| io_kind(&error).at("stat", self.path.as_str()))?;
        Ok(file_info(&self.name, &metadata))
    }

    fn is_dir(&self) -> bool {
        false
    }

    fn readdir(&mut self, _n: isize) -> Result<ReadDirBatch> {
        self.open_file("readdir")?;
        Err(ErrorKind::NotADirectory.at("readdir", self.path.as_str()))
    }

    fn close(&mut self) -> Result<()> {
        self.open_file("close")?;
        self.file = None;
        Ok(())
    }
}

/// An open directory of the host.
#[derive(Debug)]
pub struct HostDir {
    host_path: PathBuf,
    path: String,
    cursor: ReadDirCursor,
    closed: bool,
}

impl HostDir {
    fn refuse(&self, op: &'static str) -> io::Error {
        let kind = if self.closed {
            ErrorKind::Closed
        } else {
            ErrorKind::IsADirectory
        };
        kind.at(op, self.path.as_str()).into()
    }

    fn ensure_open(&self, op: &'static str) -> Result<()> {
        if self.closed {
            return Err(ErrorKind::Closed.at(op, self.path.as_str()));
        }
        Ok(())
    }
}

impl Read for HostDir {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(self.refuse("read"))
    }
}

impl Write for HostDir {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(self.refuse("write"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for HostDir {
    fn seek(&mut self, _position: SeekFrom) -> io::Result<u64> {
        Err(self.refuse("seek"))
    }
}

impl VirtualFile for HostDir {
    fn stat(&self) -> Result<FileInfo> {
        self.ensure_open("stat")?;
        let metadata = fs::metadata(&self.host_path)
            .map_err(|error| io_kind(&error).at("stat", self.path.as_str()))?;
        let name = self
            .host_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| SEPARATOR.to_string());
        Ok(file_info(&name, &metadata))
    }

    fn is_dir(&self) -> bool {
        true
    }

    fn readdir(&mut self, n: isize) -> Result<ReadDirBatch> {
        self.ensure_open("readdir")?;
        let listing = list(&self.host_path)
            .map_err(|error| io_kind(&error).at("readdir", self.path.as_str()))?;
        Ok(self.cursor.next_batch(listing, n))
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_open("close")?;
        self.closed = true;
        Ok(())
    }
}

fn io_kind(error: &io::Error) -> ErrorKind {
    ErrorKind::from(error)
}

fn entry_name(virtual_path: &str) -> &str {
    match split(virtual_path) {
        (_, "") => "/",
        (_, name) => name,
    }
}

/// Sorted listing of a host directory.
fn list(host_path: &Path) -> io::Result<Vec<FileInfo>> {
    let mut entries = fs::read_dir(host_path)?
        .map(|entry| {
            let entry = entry?;
            let metadata = entry.metadata()?;
            Ok(file_info(&entry.file_name().to_string_lossy(), &metadata))
        })
        .collect::<io::Result<Vec<FileInfo>>>()?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn file_info(name: &str, metadata: &fs::Metadata) -> FileInfo {
    let is_dir = metadata.is_dir();
    FileInfo {
        name: name.to_owned(),
        ft: if is_dir {
            FileType::new_dir()
        } else {
            FileType::new_file()
        },
        mode: mode(metadata),
        len: if is_dir { 0 } else { metadata.len() },
        accessed: nanos(metadata.accessed()),
        modified: nanos(metadata.modified()),
    }
}

#[cfg(unix)]
fn mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn mode(metadata: &fs::Metadata) -> u32 {
    match (metadata.is_dir(), metadata.permissions().readonly()) {
        (true, _) => 0o777,
        (false, true) => 0o444,
        (false, false) => 0o666,
    }
}

fn nanos(time: io::Result<SystemTime>) -> u64 {
    time.ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default()
}

fn file_time(nanos: u64) -> filetime::FileTime {
    filetime::FileTime::from_unix_time(
        (nanos / 1_000_000_000) as i64,
        (nanos % 1_000_000_000) as u32,
    )
}
