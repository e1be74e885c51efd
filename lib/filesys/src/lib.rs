//! Hierarchical file storage behind one capability interface.
//!
//! Two backends implement [`FileSystem`]:
//!
//! * [`mem_fs::FileSystem`] keeps the whole tree in memory and is meant for
//!   deterministic, isolated tests;
//! * [`host_fs::FileSystem`] passes every operation through to a directory
//!   of the host.
//!
//! Calling code should be generic over [`FileSystem`] and never name a
//! concrete backend.

use std::fmt;
use std::io::{self, Read, Seek, Write};
use thiserror::Error;

mod file_info;
#[cfg(feature = "host-fs")]
pub mod host_fs;
pub mod mem_fs;
pub mod ops;
pub mod path;
mod read_dir;

pub use file_info::{FileInfo, FileType};
pub use read_dir::{ReadDirBatch, ReadDirCursor};

pub type Result<T> = std::result::Result<T, FsError>;

/// The operation contract shared by every backend.
///
/// All paths use `/` as separator. A path starting with `/` is resolved from
/// the root, anything else from the working directory of this instance.
pub trait FileSystem: fmt::Debug {
    /// Create one directory level. Resolving to the root is a no-op.
    fn mkdir(&self, path: &str) -> Result<()>;

    /// Create a directory and every missing ancestor.
    fn mkdir_all(&self, path: &str) -> Result<()>;

    /// Remove a file or an empty directory.
    fn remove(&self, path: &str) -> Result<()>;

    /// Remove a file or a directory with everything below it.
    fn remove_all(&self, path: &str) -> Result<()>;

    fn rename(&self, from: &str, to: &str) -> Result<()>;

    fn stat(&self, path: &str) -> Result<FileInfo>;

    /// Set the access and modification times, in nanoseconds since the UNIX
    /// epoch.
    fn chtimes(&self, path: &str, accessed: u64, modified: u64) -> Result<()>;

    /// List a directory, sorted by name.
    fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>>;

    /// Return a copy of the whole content of a file.
    fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// Replace the whole content of a file, creating it if needed. The parent
    /// directory must exist.
    fn write_file(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Like [`FileSystem::write_file`], but missing parent directories are
    /// created first.
    fn put_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let (dir, _) = path::split(path);
        if !dir.is_empty() {
            self.mkdir_all(dir)?;
        }
        self.write_file(path, data)
    }

    fn new_open_options(&self) -> OpenOptions<'_>;

    /// Open for reading. Directories open as listing handles.
    fn open(&self, path: &str) -> Result<Box<dyn VirtualFile>> {
        self.new_open_options().read(true).open(path)
    }

    /// Create or truncate a file and open it for reading and writing.
    fn create(&self, path: &str) -> Result<Box<dyn VirtualFile>> {
        self.new_open_options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
    }

    /// Return a new instance sharing the same tree, whose working directory
    /// is `path`.
    fn change_dir(&self, path: &str) -> Result<Self>
    where
        Self: Sized;

    /// Absolute path of the working directory.
    fn current_dir(&self) -> String;
}

pub trait FileOpener {
    fn open(&self, path: &str, conf: &OpenOptionsConfig) -> Result<Box<dyn VirtualFile>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptionsConfig {
    read: bool,
    write: bool,
    create: bool,
    truncate: bool,
}

impl OpenOptionsConfig {
    pub const fn read(&self) -> bool {
        self.read
    }

    pub const fn write(&self) -> bool {
        self.write
    }

    pub const fn create(&self) -> bool {
        self.create
    }

    pub const fn truncate(&self) -> bool {
        self.truncate
    }

    /// Name reported in errors raised while opening.
    pub const fn op(&self) -> &'static str {
        if self.create { "create" } else { "open" }
    }
}

pub struct OpenOptions<'a> {
    opener: &'a dyn FileOpener,
    conf: OpenOptionsConfig,
}

impl<'a> OpenOptions<'a> {
    pub fn new(opener: &'a dyn FileOpener) -> Self {
        Self {
            opener,
            conf: OpenOptionsConfig::default(),
        }
    }

    pub fn get_config(&self) -> OpenOptionsConfig {
        self.conf.clone()
    }

    pub fn options(&mut self, options: OpenOptionsConfig) -> &mut Self {
        self.conf = options;
        self
    }

    pub fn read(&mut self, read: bool) -> &mut Self {
        self.conf.read = read;
        self
    }

    pub fn write(&mut self, write: bool) -> &mut Self {
        self.conf.write = write;
        self
    }

    pub fn create(&mut self, create: bool) -> &mut Self {
        self.conf.create = create;
        self
    }

    pub fn truncate(&mut self, truncate: bool) -> &mut Self {
        self.conf.truncate = truncate;
        self
    }

    pub fn open(&mut self, path: &str) -> Result<Box<dyn VirtualFile>> {
        self.opener.open(path, &self.conf)
    }
}

/// A cursor over one file or directory.
///
/// Errors returned through the `std::io` traits wrap an [`FsError`], see
/// [`FsError::from_io`].
pub trait VirtualFile: fmt::Debug + Read + Write + Seek {
    fn stat(&self) -> Result<FileInfo>;

    fn is_dir(&self) -> bool;

    /// Read the next `n` directory entries, or all remaining ones when
    /// `n <= 0`.
    fn readdir(&mut self, n: isize) -> Result<ReadDirBatch>;

    /// Close the handle. Dropping an open handle closes it too.
    fn close(&mut self) -> Result<()>;
}

/// What went wrong, independent of the operation and path.
#[derive(Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The requested file or directory could not be found
    #[error("entity not found")]
    NotFound,
    /// File exists
    #[error("file exists")]
    AlreadyExists,
    #[error("permission denied")]
    PermissionDenied,
    /// An empty path, or a path without a leaf name where one is required
    #[error("invalid path")]
    InvalidPath,
    /// A directory cannot be moved into itself
    #[error("invalid destination")]
    InvalidDestination,
    #[error("is a directory")]
    IsADirectory,
    #[error("not a directory")]
    NotADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("already closed")]
    Closed,
    #[error("not readable")]
    NotReadable,
    #[error("not writable")]
    NotWritable,
    #[error("negative position")]
    NegativeSeek,
    #[error("new position is too large")]
    SeekOverflow,
    #[error("invalid argument")]
    InvalidArgument,
    /// A configured storage limit would be exceeded
    #[error("storage full")]
    StorageFull,
    /// Something failed when doing IO on the host.
    #[error("io error")]
    IOError,
    /// Some other unhandled error. If you see this, it's probably a bug.
    #[error("unknown error found")]
    UnknownError,
}

impl ErrorKind {
    pub(crate) fn at(self, op: &'static str, path: impl Into<String>) -> FsError {
        FsError::Path {
            op,
            path: path.into(),
            kind: self,
        }
    }

    pub(crate) fn between(
        self,
        op: &'static str,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> FsError {
        FsError::Link {
            op,
            from: from.into(),
            to: to.into(),
            kind: self,
        }
    }
}

/// A failed operation together with the path(s) it was applied to.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum FsError {
    #[error("{op} {path}: {kind}")]
    Path {
        op: &'static str,
        path: String,
        kind: ErrorKind,
    },
    #[error("{op} {from} {to}: {kind}")]
    Link {
        op: &'static str,
        from: String,
        to: String,
        kind: ErrorKind,
    },
}

impl FsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Path { kind, .. } | Self::Link { kind, .. } => *kind,
        }
    }

    pub fn op(&self) -> &'static str {
        match self {
            Self::Path { op, .. } | Self::Link { op, .. } => op,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_exists(&self) -> bool {
        matches!(self.kind(), ErrorKind::AlreadyExists | ErrorKind::NotEmpty)
    }

    pub fn is_permission(&self) -> bool {
        self.kind() == ErrorKind::PermissionDenied
    }

    /// Recover the typed error carried by an `io::Error` produced by a
    /// [`VirtualFile`].
    pub fn from_io(error: &io::Error) -> Option<&FsError> {
        error.get_ref()?.downcast_ref::<FsError>()
    }
}

impl From<FsError> for io::Error {
    fn from(error: FsError) -> Self {
        let kind = match error.kind() {
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::AlreadyExists => io::ErrorKind::AlreadyExists,
            ErrorKind::PermissionDenied
            | ErrorKind::NotReadable
            | ErrorKind::NotWritable
            | ErrorKind::Closed => io::ErrorKind::PermissionDenied,
            ErrorKind::InvalidPath
            | ErrorKind::InvalidDestination
            | ErrorKind::NegativeSeek
            | ErrorKind::SeekOverflow
            | ErrorKind::InvalidArgument => io::ErrorKind::InvalidInput,
            ErrorKind::IsADirectory => io::ErrorKind::IsADirectory,
            ErrorKind::NotADirectory => io::ErrorKind::NotADirectory,
            ErrorKind::NotEmpty => io::ErrorKind::DirectoryNotEmpty,
            ErrorKind::StorageFull => io::ErrorKind::StorageFull,
            ErrorKind::IOError | ErrorKind::UnknownError => io::ErrorKind::Other,
        };
        io::Error::new(kind, error)
    }
}

impl From<&io::Error> for ErrorKind {
    fn from(io_error: &io::Error) -> Self {
        if let Some(error) = FsError::from_io(io_error) {
            return error.kind();
        }
        match io_error.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            io::ErrorKind::InvalidInput => ErrorKind::InvalidArgument,
            io::ErrorKind::IsADirectory => ErrorKind::IsADirectory,
            io::ErrorKind::NotADirectory => ErrorKind::NotADirectory,
            io::ErrorKind::DirectoryNotEmpty => ErrorKind::NotEmpty,
            io::ErrorKind::StorageFull => ErrorKind::StorageFull,
            io::ErrorKind::Other => ErrorKind::IOError,
            // if the following triggers, a new error type was added to this non-exhaustive enum
            _ => ErrorKind::UnknownError,
        }
    }
}
