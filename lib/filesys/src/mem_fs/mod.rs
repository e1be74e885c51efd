//! The in-memory file system.
//!
//! Nodes live in a slab and refer to each other by [`Inode`]. A directory
//! owns its children through its `children` map; the `parent` link of a node
//! is only used to walk `..` and to rebuild paths.

mod config;
mod dir;
mod file;
mod filesystem;

pub use config::MemFsConfig;
pub use dir::DirHandle;
pub use file::FileHandle;
pub use filesystem::FileSystem;

use crate::{FileInfo, FileType};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

type Inode = usize;
const ROOT_INODE: Inode = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Metadata {
    accessed: u64,
    modified: u64,
}

impl Metadata {
    fn now() -> Self {
        let time = time();
        Self {
            accessed: time,
            modified: time,
        }
    }
}

#[derive(Debug)]
struct FileNode {
    inode: Inode,
    name: String,
    parent: Option<Inode>,
    data: Vec<u8>,
    metadata: Metadata,
}

#[derive(Debug)]
struct DirectoryNode {
    inode: Inode,
    name: String,
    parent: Option<Inode>,
    children: BTreeMap<String, Inode>,
    metadata: Metadata,
}

#[derive(Debug)]
enum Node {
    File(FileNode),
    Directory(DirectoryNode),
}

impl Node {
    fn inode(&self) -> Inode {
        *match self {
            Self::File(FileNode { inode, .. }) => inode,
            Self::Directory(DirectoryNode { inode, .. }) => inode,
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::File(FileNode { name, .. }) => name,
            Self::Directory(DirectoryNode { name, .. }) => name,
        }
    }

    fn set_name(&mut self, new_name: String) {
        match self {
            Self::File(FileNode { name, .. }) => *name = new_name,
            Self::Directory(DirectoryNode { name, .. }) => *name = new_name,
        }
    }

    fn parent(&self) -> Option<Inode> {
        match self {
            Self::File(FileNode { parent, .. }) => *parent,
            Self::Directory(DirectoryNode { parent, .. }) => *parent,
        }
    }

    fn set_parent(&mut self, new_parent: Option<Inode>) {
        match self {
            Self::File(FileNode { parent, .. }) => *parent = new_parent,
            Self::Directory(DirectoryNode { parent, .. }) => *parent = new_parent,
        }
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        match self {
            Self::File(FileNode { metadata, .. }) => metadata,
            Self::Directory(DirectoryNode { metadata, .. }) => metadata,
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self, Self::Directory(_))
    }

    fn info(&self) -> FileInfo {
        match self {
            Self::File(FileNode {
                name,
                data,
                metadata,
                ..
            }) => FileInfo {
                name: name.clone(),
                ft: FileType::new_file(),
                mode: 0o666,
                len: data.len() as u64,
                accessed: metadata.accessed,
                modified: metadata.modified,
            },
            Self::Directory(DirectoryNode { name, metadata, .. }) => FileInfo {
                name: name.clone(),
                ft: FileType::new_dir(),
                mode: 0o777,
                len: 0,
                accessed: metadata.accessed,
                modified: metadata.modified,
            },
        }
    }
}

fn time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default()
}
