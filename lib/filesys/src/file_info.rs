#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct FileType {
    pub dir: bool,
    pub file: bool,
}

impl FileType {
    pub fn new_dir() -> Self {
        Self {
            dir: true,
            ..Default::default()
        }
    }

    pub fn new_file() -> Self {
        Self {
            file: true,
            ..Default::default()
        }
    }

    pub fn is_dir(&self) -> bool {
        self.dir
    }

    pub fn is_file(&self) -> bool {
        self.file
    }
}

/// Immutable snapshot of an entry, as returned by `stat` and listings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct FileInfo {
    pub name: String,
    pub ft: FileType,
    /// Permission bits.
    pub mode: u32,
    /// Size in bytes, `0` for directories.
    pub len: u64,
    /// Last access, in nanoseconds since the UNIX epoch.
    pub accessed: u64,
    /// Last modification, in nanoseconds since the UNIX epoch.
    pub modified: u64,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.ft.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.ft.is_file()
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.len
    }
}
