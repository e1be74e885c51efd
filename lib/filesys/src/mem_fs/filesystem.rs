//! This module contains the [`FileSystem`] type itself.

use super::*;
use crate::path::{SEPARATOR, clean, has_trailing_separator, is_absolute, is_entry_name, split};
use crate::{ErrorKind, OpenOptions, OpenOptionsConfig, Result, VirtualFile};
use slab::Slab;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace, warn};

type KindResult<T> = std::result::Result<T, ErrorKind>;

pub(super) type SharedInner = Rc<RefCell<FileSystemInner>>;

/// A node kept alive on behalf of a handle or a working directory.
///
/// While at least one `NodeRef` points into a detached subtree, that subtree
/// stays in storage. The last one to go away lets it be reclaimed.
pub(super) struct NodeRef {
    inner: SharedInner,
    inode: Inode,
}

impl NodeRef {
    pub(super) fn new(inner: &SharedInner, inode: Inode) -> Self {
        inner.borrow_mut().pin(inode);
        Self {
            inner: inner.clone(),
            inode,
        }
    }

    pub(super) fn inode(&self) -> Inode {
        self.inode
    }

    pub(super) fn fs(&self) -> Ref<'_, FileSystemInner> {
        self.inner.borrow()
    }

    pub(super) fn fs_mut(&self) -> RefMut<'_, FileSystemInner> {
        self.inner.borrow_mut()
    }
}

impl Clone for NodeRef {
    fn clone(&self) -> Self {
        Self::new(&self.inner, self.inode)
    }
}

impl Drop for NodeRef {
    fn drop(&mut self) {
        if let Ok(mut fs) = self.inner.try_borrow_mut() {
            fs.unpin(self.inode);
        }
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef").field("inode", &self.inode).finish()
    }
}

/// The in-memory file system!
///
/// Cloning a `FileSystem`, or calling
/// [`change_dir`](crate::FileSystem::change_dir) on it, gives another view on
/// the same tree: a change made through one is visible through all.
///
/// There is no locking. The tree is meant for a single actor, and the type is
/// neither `Send` nor `Sync`.
#[derive(Clone)]
pub struct FileSystem {
    inner: SharedInner,
    cwd: NodeRef,
}

impl Default for FileSystem {
    fn default() -> Self {
        Self::with_config(MemFsConfig::default())
    }
}

impl FileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: MemFsConfig) -> Self {
        let inner = Rc::new(RefCell::new(FileSystemInner::new(config)));
        let cwd = NodeRef::new(&inner, ROOT_INODE);
        Self { inner, cwd }
    }

    pub fn config(&self) -> MemFsConfig {
        self.inner.borrow().config.clone()
    }

    /// Bytes held by file contents, detached files included.
    pub fn bytes_used(&self) -> u64 {
        self.inner.borrow().bytes_used
    }

    /// Number of nodes in storage, detached ones included.
    pub fn node_count(&self) -> usize {
        self.inner.borrow().storage.len()
    }

    /// Whether both instances operate on the same tree.
    pub fn shares_tree_with(&self, other: &FileSystem) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn cwd(&self) -> Inode {
        self.cwd.inode()
    }
}

impl crate::FileSystem for FileSystem {
    fn mkdir(&self, path: &str) -> Result<()> {
        debug!(path, "mkdir");
        self.inner
            .borrow_mut()
            .create_dir(self.cwd(), path)
            .map_err(|kind| kind.at("mkdir", path))
    }

    fn mkdir_all(&self, path: &str) -> Result<()> {
        debug!(path, "mkdir_all");
        self.inner
            .borrow_mut()
            .resolve_dir_creating(self.cwd(), path)
            .map(drop)
            .map_err(|kind| kind.at("mkdir", path))
    }

    fn remove(&self, path: &str) -> Result<()> {
        debug!(path, "remove");
        self.inner
            .borrow_mut()
            .remove(self.cwd(), path, false)
            .map_err(|kind| kind.at("remove", path))
    }

    fn remove_all(&self, path: &str) -> Result<()> {
        debug!(path, "remove_all");
        self.inner
            .borrow_mut()
            .remove(self.cwd(), path, true)
            .map_err(|kind| kind.at("remove", path))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        debug!(from, to, "rename");
        self.inner
            .borrow_mut()
            .rename(self.cwd(), from, to)
            .map_err(|kind| kind.between("rename", from, to))
    }

    fn stat(&self, path: &str) -> Result<FileInfo> {
        let fs = self.inner.borrow();
        fs.resolve_entry(self.cwd(), path)
            .and_then(|inode| fs.info(inode))
            .map_err(|kind| kind.at("stat", path))
    }

    fn chtimes(&self, path: &str, accessed: u64, modified: u64) -> Result<()> {
        debug!(path, accessed, modified, "chtimes");
        let mut fs = self.inner.borrow_mut();
        fs.resolve_entry(self.cwd(), path)
            .and_then(|inode| {
                let metadata = fs.node_mut(inode)?.metadata_mut();
                metadata.accessed = accessed;
                metadata.modified = modified;
                Ok(())
            })
            .map_err(|kind| kind.at("chtimes", path))
    }

    fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>> {
        let fs = self.inner.borrow();
        if path.is_empty() {
            return Err(ErrorKind::InvalidPath.at("readdir", path));
        }
        fs.lookup_dir(self.cwd(), path)
            .and_then(|inode| fs.list(inode))
            .map_err(|kind| kind.at("readdir", path))
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let fs = self.inner.borrow();
        fs.resolve_entry(self.cwd(), path)
            .and_then(|inode| match fs.node(inode)? {
                Node::File(FileNode { data, .. }) => Ok(data.clone()),
                Node::Directory(_) => Err(ErrorKind::IsADirectory),
            })
            .map_err(|kind| kind.at("readfile", path))
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        debug!(path, len = data.len(), "write_file");
        self.inner
            .borrow_mut()
            .create_file(self.cwd(), path, false, data)
            .map(drop)
            .map_err(|kind| kind.at("writefile", path))
    }

    fn put_file(&self, path: &str, data: &[u8]) -> Result<()> {
        debug!(path, len = data.len(), "put_file");
        self.inner
            .borrow_mut()
            .create_file(self.cwd(), path, true, data)
            .map(drop)
            .map_err(|kind| kind.at("putfile", path))
    }

    fn new_open_options(&self) -> OpenOptions<'_> {
        OpenOptions::new(self)
    }

    fn change_dir(&self, path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(ErrorKind::InvalidPath.at("cd", path));
        }
        let inode = self
            .inner
            .borrow()
            .lookup_dir(self.cwd(), path)
            .map_err(|kind| kind.at("cd", path))?;

        Ok(Self {
            inner: self.inner.clone(),
            cwd: NodeRef::new(&self.inner, inode),
        })
    }

    fn current_dir(&self) -> String {
        self.inner.borrow().path_of(self.cwd())
    }
}

impl crate::FileOpener for FileSystem {
    fn open(&self, path: &str, conf: &OpenOptionsConfig) -> Result<Box<dyn VirtualFile>> {
        let op = conf.op();
        let (inode, is_dir) = self
            .inner
            .borrow_mut()
            .open_target(self.cwd(), path, conf)
            .map_err(|kind| kind.at(op, path))?;
        trace!(path, inode, is_dir, "opened");

        let node = NodeRef::new(&self.inner, inode);
        if is_dir {
            Ok(Box::new(DirHandle::new(node, path.to_owned())))
        } else {
            let read = conf.read() || !conf.write();
            Ok(Box::new(FileHandle::new(
                node,
                path.to_owned(),
                read,
                conf.write(),
            )))
        }
    }
}

impl fmt::Debug for FileSystem {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(fs) => fmt::Debug::fmt(&*fs, formatter),
            Err(_) => formatter.write_str("FileSystem { <borrowed> }"),
        }
    }
}

enum Step {
    Into(Inode),
    Missing,
}

/// The core of the file system. It contains a collection of `Node`s,
/// indexed by their respective `Inode` in a slab.
pub(super) struct FileSystemInner {
    storage: Slab<Node>,
    /// Open handles and working directories, per node.
    pins: HashMap<Inode, usize>,
    /// Roots of the subtrees taken out of the tree but not yet reclaimed.
    detached: Vec<Inode>,
    bytes_used: u64,
    config: MemFsConfig,
}

impl FileSystemInner {
    fn new(config: MemFsConfig) -> Self {
        let mut storage = Slab::new();
        storage.insert(Node::Directory(DirectoryNode {
            inode: ROOT_INODE,
            name: "/".to_owned(),
            parent: None,
            children: BTreeMap::new(),
            metadata: Metadata::now(),
        }));

        Self {
            storage,
            pins: HashMap::new(),
            detached: Vec::new(),
            bytes_used: 0,
            config,
        }
    }

    pub(super) fn node(&self, inode: Inode) -> KindResult<&Node> {
        self.storage.get(inode).ok_or(ErrorKind::UnknownError)
    }

    pub(super) fn node_mut(&mut self, inode: Inode) -> KindResult<&mut Node> {
        self.storage.get_mut(inode).ok_or(ErrorKind::UnknownError)
    }

    pub(super) fn info(&self, inode: Inode) -> KindResult<FileInfo> {
        self.node(inode).map(Node::info)
    }

    fn pin(&mut self, inode: Inode) {
        *self.pins.entry(inode).or_insert(0) += 1;
    }

    fn unpin(&mut self, inode: Inode) {
        if let Some(count) = self.pins.get_mut(&inode) {
            *count -= 1;
            if *count == 0 {
                self.pins.remove(&inode);
                if !self.detached.is_empty() {
                    self.reclaim();
                }
            }
        }
    }

    fn is_pinned(&self, inode: Inode) -> bool {
        self.pins.contains_key(&inode)
    }

    fn child_of(&self, dir: Inode, name: &str) -> KindResult<Option<Inode>> {
        match self.node(dir)? {
            Node::Directory(DirectoryNode { children, .. }) => Ok(children.get(name).copied()),
            Node::File(_) => Err(ErrorKind::NotADirectory),
        }
    }

    fn step(&self, current: Inode, part: &str) -> KindResult<Step> {
        match part {
            "" | "." => Ok(Step::Into(current)),
            ".." => Ok(Step::Into(self.node(current)?.parent().unwrap_or(current))),
            name => match self.child_of(current, name)? {
                Some(child) if self.node(child)?.is_dir() => Ok(Step::Into(child)),
                Some(_) => Err(ErrorKind::NotADirectory),
                None => Ok(Step::Missing),
            },
        }
    }

    /// Walk `path` down to an existing directory.
    pub(super) fn lookup_dir(&self, cwd: Inode, path: &str) -> KindResult<Inode> {
        let path = clean(path);
        let mut current = if is_absolute(&path) { ROOT_INODE } else { cwd };

        for part in path.split(SEPARATOR) {
            current = match self.step(current, part)? {
                Step::Into(next) => next,
                Step::Missing => return Err(ErrorKind::NotFound),
            };
        }

        Ok(current)
    }

    /// Walk `path` down to a directory, creating the missing ones on the way.
    pub(super) fn resolve_dir_creating(&mut self, cwd: Inode, path: &str) -> KindResult<Inode> {
        let path = clean(path);
        let mut current = if is_absolute(&path) { ROOT_INODE } else { cwd };

        for part in path.split(SEPARATOR) {
            current = match self.step(current, part)? {
                Step::Into(next) => next,
                Step::Missing => self.insert_directory(current, part)?,
            };
        }

        Ok(current)
    }

    /// Find the file or directory named by `path`.
    ///
    /// A trailing separator requires the entry to be a directory.
    pub(super) fn resolve_entry(&self, cwd: Inode, path: &str) -> KindResult<Inode> {
        if path.is_empty() {
            return Err(ErrorKind::InvalidPath);
        }

        let cleaned = clean(path);
        let (dir, leaf) = split(&cleaned);
        let inode = if is_entry_name(leaf) {
            let parent = self.lookup_dir(cwd, dir)?;
            self.child_of(parent, leaf)?.ok_or(ErrorKind::NotFound)?
        } else {
            self.lookup_dir(cwd, &cleaned)?
        };

        if has_trailing_separator(path) && !self.node(inode)?.is_dir() {
            return Err(ErrorKind::NotADirectory);
        }

        Ok(inode)
    }

    fn ensure_inode_available(&self) -> KindResult<()> {
        match self.config.max_inodes {
            Some(max) if self.storage.len() as u64 >= max => {
                warn!(max, "inode limit reached");
                Err(ErrorKind::StorageFull)
            }
            _ => Ok(()),
        }
    }

    /// Check that replacing `freed` bytes with `added` bytes stays within
    /// the configured limit.
    fn ensure_bytes_available(&self, freed: u64, added: u64) -> KindResult<()> {
        match self.config.max_bytes {
            Some(max) if self.bytes_used.saturating_sub(freed) + added > max => {
                warn!(max, used = self.bytes_used, added, "byte limit reached");
                Err(ErrorKind::StorageFull)
            }
            _ => Ok(()),
        }
    }

    fn link_child(&mut self, parent: Inode, name: &str, child: Inode) -> KindResult<()> {
        match self.node_mut(parent)? {
            Node::Directory(DirectoryNode {
                children,
                metadata: Metadata { modified, .. },
                ..
            }) => {
                children.insert(name.to_owned(), child);
                *modified = time();
                Ok(())
            }
            Node::File(_) => Err(ErrorKind::NotADirectory),
        }
    }

    fn unlink_child(&mut self, parent: Inode, name: &str) -> KindResult<()> {
        match self.node_mut(parent)? {
            Node::Directory(DirectoryNode {
                children,
                metadata: Metadata { modified, .. },
                ..
            }) => {
                children.remove(name);
                *modified = time();
                Ok(())
            }
            Node::File(_) => Err(ErrorKind::NotADirectory),
        }
    }

    fn insert_directory(&mut self, parent: Inode, name: &str) -> KindResult<Inode> {
        self.ensure_inode_available()?;

        let entry = self.storage.vacant_entry();
        let inode = entry.key();
        entry.insert(Node::Directory(DirectoryNode {
            inode,
            name: name.to_owned(),
            parent: Some(parent),
            children: BTreeMap::new(),
            metadata: Metadata::now(),
        }));
        self.link_child(parent, name, inode)?;

        trace!(inode, name, "new directory");
        Ok(inode)
    }

    fn insert_file(&mut self, parent: Inode, name: &str, data: Vec<u8>) -> KindResult<Inode> {
        let len = data.len() as u64;
        let entry = self.storage.vacant_entry();
        let inode = entry.key();
        entry.insert(Node::File(FileNode {
            inode,
            name: name.to_owned(),
            parent: Some(parent),
            data,
            metadata: Metadata::now(),
        }));
        self.bytes_used += len;
        self.link_child(parent, name, inode)?;

        trace!(inode, name, "new file");
        Ok(inode)
    }

    fn create_dir(&mut self, cwd: Inode, path: &str) -> KindResult<()> {
        if path.is_empty() {
            return Err(ErrorKind::InvalidPath);
        }

        let cleaned = clean(path);
        let (dir, leaf) = split(&cleaned);
        if !is_entry_name(leaf) {
            // `/`, `.` or `..`: the directory exists already.
            return self.lookup_dir(cwd, &cleaned).map(drop);
        }

        let parent = self.lookup_dir(cwd, dir)?;
        if self.child_of(parent, leaf)?.is_some() {
            return Err(ErrorKind::AlreadyExists);
        }
        self.insert_directory(parent, leaf).map(drop)
    }

    /// Create the file named by `path`, or reset an existing one, with
    /// `data` as content.
    ///
    /// An existing file that nobody holds open is reset in place. One that is
    /// open gets detached and replaced by a new node, the open handles keep
    /// the old content.
    pub(super) fn create_file(
        &mut self,
        cwd: Inode,
        path: &str,
        create_missing: bool,
        data: &[u8],
    ) -> KindResult<Inode> {
        if path.is_empty() || path.ends_with(SEPARATOR) {
            return Err(ErrorKind::InvalidPath);
        }

        let cleaned = clean(path);
        let (dir, leaf) = split(&cleaned);
        if !is_entry_name(leaf) {
            return Err(ErrorKind::InvalidPath);
        }

        let parent = if create_missing {
            self.resolve_dir_creating(cwd, dir)?
        } else {
            self.lookup_dir(cwd, dir)?
        };

        let added = data.len() as u64;
        match self.child_of(parent, leaf)? {
            Some(existing) => {
                let node = self.node(existing)?;
                if node.is_dir() {
                    return Err(ErrorKind::IsADirectory);
                }

                if self.is_pinned(existing) {
                    self.ensure_inode_available()?;
                    self.ensure_bytes_available(0, added)?;
                    self.detach(existing)?;
                    self.insert_file(parent, leaf, data.to_vec())
                } else {
                    self.set_data(existing, data.to_vec())?;
                    Ok(existing)
                }
            }
            None => {
                self.ensure_inode_available()?;
                self.ensure_bytes_available(0, added)?;
                self.insert_file(parent, leaf, data.to_vec())
            }
        }
    }

    /// Replace the whole content of a file and stamp its modification time.
    fn set_data(&mut self, inode: Inode, data: Vec<u8>) -> KindResult<()> {
        let old_len = self.file_len(inode)?;
        let new_len = data.len() as u64;
        self.ensure_bytes_available(old_len, new_len)?;

        match self.node_mut(inode)? {
            Node::File(file) => {
                file.data = data;
                file.metadata.modified = time();
            }
            Node::Directory(_) => return Err(ErrorKind::IsADirectory),
        }
        self.bytes_used = self.bytes_used - old_len + new_len;
        Ok(())
    }

    fn file_len(&self, inode: Inode) -> KindResult<u64> {
        match self.node(inode)? {
            Node::File(FileNode { data, .. }) => Ok(data.len() as u64),
            Node::Directory(_) => Err(ErrorKind::IsADirectory),
        }
    }

    pub(super) fn read_at(&self, inode: Inode, position: usize, buf: &mut [u8]) -> KindResult<usize> {
        let data = match self.node(inode)? {
            Node::File(FileNode { data, .. }) => data,
            Node::Directory(_) => return Err(ErrorKind::IsADirectory),
        };
        if position >= data.len() {
            return Ok(0);
        }

        let read = buf.len().min(data.len() - position);
        buf[..read].copy_from_slice(&data[position..position + read]);
        Ok(read)
    }

    /// Write `buf` at `position`. A gap between the end of the data and
    /// `position` is filled with zeroes first.
    pub(super) fn write_at(&mut self, inode: Inode, position: usize, buf: &[u8]) -> KindResult<()> {
        let end = position
            .checked_add(buf.len())
            .ok_or(ErrorKind::SeekOverflow)?;
        let old_len = self.file_len(inode)?;
        let new_len = old_len.max(end as u64);
        self.ensure_bytes_available(old_len, new_len)?;

        match self.node_mut(inode)? {
            Node::File(FileNode { data, .. }) => {
                if end > data.len() {
                    data.try_reserve(end - data.len()).map_err(|_| {
                        warn!(position, len = buf.len(), "cannot grow file");
                        ErrorKind::StorageFull
                    })?;
                }
                if position > data.len() {
                    data.resize(position, 0);
                }
                let overlap = end.min(data.len());
                let (inside, outside) = buf.split_at(overlap - position);
                data[position..overlap].copy_from_slice(inside);
                data.extend_from_slice(outside);
            }
            Node::Directory(_) => return Err(ErrorKind::IsADirectory),
        }
        self.bytes_used = self.bytes_used - old_len + new_len;
        Ok(())
    }

    pub(super) fn touch(&mut self, inode: Inode) -> KindResult<()> {
        self.node_mut(inode)?.metadata_mut().modified = time();
        Ok(())
    }

    /// Children of a directory, sorted by name.
    pub(super) fn list(&self, inode: Inode) -> KindResult<Vec<FileInfo>> {
        match self.node(inode)? {
            Node::Directory(DirectoryNode { children, .. }) => children
                .values()
                .map(|child| self.info(*child))
                .collect(),
            Node::File(_) => Err(ErrorKind::NotADirectory),
        }
    }

    /// Resolve the node an open with `conf` works on.
    ///
    /// Truncating an existing file goes through [`Self::create_file`], with
    /// or without `create`: a file held open elsewhere is replaced by a new
    /// node and the other handles keep the old content.
    fn open_target(
        &mut self,
        cwd: Inode,
        path: &str,
        conf: &OpenOptionsConfig,
    ) -> KindResult<(Inode, bool)> {
        let replace = conf.create() && conf.truncate();
        let inode = if replace {
            self.create_file(cwd, path, false, &[])?
        } else {
            match self.resolve_entry(cwd, path) {
                Ok(inode) => inode,
                Err(ErrorKind::NotFound) if conf.create() => {
                    self.create_file(cwd, path, false, &[])?
                }
                Err(kind) => return Err(kind),
            }
        };

        let is_dir = self.node(inode)?.is_dir();
        if is_dir && conf.write() {
            return Err(ErrorKind::IsADirectory);
        }
        if !is_dir && !replace && conf.truncate() && conf.write() {
            let inode = self.create_file(cwd, path, false, &[])?;
            return Ok((inode, false));
        }

        Ok((inode, is_dir))
    }

    fn remove(&mut self, cwd: Inode, path: &str, recursive: bool) -> KindResult<()> {
        let inode = self.resolve_entry(cwd, path)?;
        if inode == ROOT_INODE {
            warn!(path, "the root cannot be removed");
            return Err(ErrorKind::PermissionDenied);
        }

        if let Node::Directory(DirectoryNode { children, .. }) = self.node(inode)? {
            if !recursive && !children.is_empty() {
                return Err(ErrorKind::NotEmpty);
            }
        }

        self.detach(inode)
    }

    fn rename(&mut self, cwd: Inode, from: &str, to: &str) -> KindResult<()> {
        if from.is_empty() || to.is_empty() {
            return Err(ErrorKind::InvalidPath);
        }

        let source_path = clean(from);
        let target_path = clean(to);
        if source_path == target_path {
            return Ok(());
        }
        if source_path == "/" || target_path == "/" {
            warn!(from, to, "the root cannot be renamed");
            return Err(ErrorKind::PermissionDenied);
        }

        let source = self.resolve_entry(cwd, from)?;
        if source == ROOT_INODE {
            warn!(from, to, "the root cannot be renamed");
            return Err(ErrorKind::PermissionDenied);
        }
        if target_path.starts_with(&format!("{source_path}{SEPARATOR}")) {
            return Err(ErrorKind::InvalidDestination);
        }

        let (dir, leaf) = split(&target_path);
        if !is_entry_name(leaf) {
            if self.lookup_dir(cwd, &target_path) == Ok(ROOT_INODE) {
                warn!(from, to, "the root cannot be replaced");
                return Err(ErrorKind::PermissionDenied);
            }
            return Err(ErrorKind::InvalidPath);
        }
        let target_parent = self.lookup_dir(cwd, dir)?;
        if self.is_within(target_parent, source)? {
            return Err(ErrorKind::InvalidDestination);
        }

        let replaced = match self.child_of(target_parent, leaf)? {
            Some(existing) if existing == source => return Ok(()),
            Some(existing) => {
                if self.node(existing)?.is_dir() || self.node(source)?.is_dir() {
                    return Err(ErrorKind::AlreadyExists);
                }
                Some(existing)
            }
            None => None,
        };

        let (old_parent, old_name) = {
            let node = self.node(source)?;
            (node.parent(), node.name().to_owned())
        };
        match old_parent {
            Some(parent) => self.unlink_child(parent, &old_name)?,
            None => self.detached.retain(|top| *top != source),
        }
        if let Some(existing) = replaced {
            self.detach(existing)?;
        }

        let node = self.node_mut(source)?;
        node.set_name(leaf.to_owned());
        node.set_parent(Some(target_parent));
        self.link_child(target_parent, leaf, source)
    }

    /// Whether `inode` is `ancestor` or lies below it.
    fn is_within(&self, inode: Inode, ancestor: Inode) -> KindResult<bool> {
        let mut current = Some(inode);
        while let Some(next) = current {
            if next == ancestor {
                return Ok(true);
            }
            current = self.node(next)?.parent();
        }
        Ok(false)
    }

    /// Take a node out of its parent. The node and everything below it stay
    /// in storage for as long as something is pinned in there.
    fn detach(&mut self, inode: Inode) -> KindResult<()> {
        if inode == ROOT_INODE {
            return Err(ErrorKind::PermissionDenied);
        }

        let (parent, name) = {
            let node = self.node(inode)?;
            (node.parent(), node.name().to_owned())
        };
        if let Some(parent) = parent {
            self.unlink_child(parent, &name)?;
            self.node_mut(inode)?.set_parent(None);
        }
        if !self.detached.contains(&inode) {
            self.detached.push(inode);
        }

        self.reclaim();
        Ok(())
    }

    /// Free every detached subtree that nothing is pinned in.
    fn reclaim(&mut self) {
        for top in std::mem::take(&mut self.detached) {
            let subtree = self.subtree(top);
            if subtree.iter().any(|inode| self.is_pinned(*inode)) {
                self.detached.push(top);
                continue;
            }

            for inode in &subtree {
                if let Some(Node::File(FileNode { data, .. })) = self.storage.try_remove(*inode) {
                    self.bytes_used = self.bytes_used.saturating_sub(data.len() as u64);
                }
            }
            debug!(inode = top, nodes = subtree.len(), "reclaimed detached subtree");
        }
    }

    fn subtree(&self, top: Inode) -> Vec<Inode> {
        let mut found = Vec::new();
        let mut remaining = vec![top];
        while let Some(inode) = remaining.pop() {
            if let Some(node) = self.storage.get(inode) {
                if let Node::Directory(DirectoryNode { children, .. }) = node {
                    remaining.extend(children.values().copied());
                }
                found.push(inode);
            }
        }
        found
    }

    /// Rebuild the absolute path of a directory from its parent links.
    pub(super) fn path_of(&self, inode: Inode) -> String {
        let mut length = 0;
        self.for_each_ancestor(inode, |name| length += name.len() + 1);
        if length == 0 {
            return SEPARATOR.to_string();
        }

        let mut path = vec![0u8; length];
        let mut end = length;
        self.for_each_ancestor(inode, |name| {
            let start = end - name.len();
            path[start..end].copy_from_slice(name.as_bytes());
            end = start - 1;
            path[end] = SEPARATOR as u8;
        });

        String::from_utf8(path)
            .unwrap_or_else(|error| String::from_utf8_lossy(error.as_bytes()).into_owned())
    }

    /// Call `f` with the name of `inode` and of each of its parents, the
    /// root excepted.
    fn for_each_ancestor(&self, inode: Inode, mut f: impl FnMut(&str)) {
        let mut current = Some(inode);
        while let Some(next) = current {
            if next == ROOT_INODE {
                break;
            }
            match self.storage.get(next) {
                Some(node) => {
                    f(node.name());
                    current = node.parent();
                }
                None => break,
            }
        }
    }
}

impl fmt::Debug for FileSystemInner {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            formatter,
            "\n{inode:<8}    {ty:<4}    name",
            inode = "inode",
            ty = "type",
        )?;

        fn debug(
            nodes: Vec<&Node>,
            slf: &FileSystemInner,
            formatter: &mut fmt::Formatter<'_>,
            indentation: usize,
        ) -> fmt::Result {
            for node in nodes {
                writeln!(
                    formatter,
                    "{inode:<8}    {ty:<4}   {indentation_symbol:indentation_width$}{name}",
                    inode = node.inode(),
                    ty = if node.is_dir() { "dir" } else { "file" },
                    name = node.name(),
                    indentation_symbol = " ",
                    indentation_width = indentation * 2 + 1,
                )?;

                if let Node::Directory(DirectoryNode { children, .. }) = node {
                    debug(
                        children
                            .values()
                            .filter_map(|inode| slf.storage.get(*inode))
                            .collect(),
                        slf,
                        formatter,
                        indentation + 1,
                    )?;
                }
            }

            Ok(())
        }

        debug(
            self.storage.get(ROOT_INODE).into_iter().collect(),
            self,
            formatter,
            0,
        )
    }
}

#[cfg(test)]
mod test_filesystem {
    use super::*;
    use crate::FileSystem as _;
    use pretty_assertions::assert_eq;
    use std::io::{Read, Write};

    fn kind<T: fmt::Debug>(result: Result<T>) -> ErrorKind {
        result.expect_err("operation should have failed").kind()
    }

    fn names(infos: &[FileInfo]) -> Vec<&str> {
        infos.iter().map(|info| info.name.as_str()).collect()
    }

    #[test]
    fn test_new_filesystem() {
        let fs = FileSystem::default();
        let fs_inner = fs.inner.borrow();

        assert_eq!(fs_inner.storage.len(), 1, "storage has a root");
        assert!(
            matches!(
                fs_inner.storage.get(ROOT_INODE),
                Some(Node::Directory(DirectoryNode {
                    inode: ROOT_INODE,
                    parent: None,
                    children,
                    ..
                })) if children.is_empty(),
            ),
            "storage has a well-defined root",
        );
        assert_eq!(fs.current_dir(), "/");
    }

    #[test]
    fn test_mkdir() {
        let fs = FileSystem::default();

        assert_eq!(fs.mkdir("/"), Ok(()), "the root is a no-op");
        assert_eq!(fs.mkdir("/foo"), Ok(()), "creating a directory");
        assert_eq!(fs.mkdir("/foo/bar/"), Ok(()), "creating a sub-directory");
        assert_eq!(fs.node_count(), 3);

        {
            let fs_inner = fs.inner.borrow();
            assert!(
                matches!(
                    fs_inner.storage.get(1),
                    Some(Node::Directory(DirectoryNode {
                        inode: 1,
                        name,
                        parent: Some(ROOT_INODE),
                        children,
                        ..
                    })) if name == "foo" && children.get("bar") == Some(&2)
                ),
                "`foo` contains `bar`",
            );
        }

        assert_eq!(kind(fs.mkdir("/foo")), ErrorKind::AlreadyExists);
        assert_eq!(kind(fs.mkdir("/missing/dir")), ErrorKind::NotFound);
        assert_eq!(kind(fs.mkdir("")), ErrorKind::InvalidPath);

        fs.write_file("/foo/file", b"x").unwrap();
        assert_eq!(kind(fs.mkdir("/foo/file")), ErrorKind::AlreadyExists);
        assert_eq!(kind(fs.mkdir("/foo/file/sub")), ErrorKind::NotADirectory);
    }

    #[test]
    fn test_mkdir_all_is_idempotent() {
        let fs = FileSystem::default();

        assert_eq!(fs.mkdir_all("/a/b/c"), Ok(()));
        let count = fs.node_count();
        assert_eq!(count, 4);

        assert_eq!(fs.mkdir_all("/a/b/c"), Ok(()));
        assert_eq!(fs.node_count(), count, "nothing new was created");

        assert_eq!(fs.mkdir_all("/a/./b/../b/d/"), Ok(()));
        assert!(fs.stat("/a/b/d").unwrap().is_dir());

        fs.write_file("/a/f", b"").unwrap();
        assert_eq!(kind(fs.mkdir_all("/a/f/g")), ErrorKind::NotADirectory);
    }

    #[test]
    fn test_create_file_rules() {
        let fs = FileSystem::default();
        fs.mkdir_all("/a/dir").unwrap();

        assert_eq!(kind(fs.create("/a/new/")), ErrorKind::InvalidPath);
        assert_eq!(kind(fs.create("/")), ErrorKind::InvalidPath);
        assert_eq!(kind(fs.create("/a/..")), ErrorKind::InvalidPath);
        assert_eq!(kind(fs.create("/a/dir")), ErrorKind::IsADirectory);
        assert_eq!(kind(fs.create("/b/c.txt")), ErrorKind::NotFound);
        assert_eq!(kind(fs.write_file("/b/c.txt", b"x")), ErrorKind::NotFound);

        assert_eq!(fs.put_file("/b/c.txt", b"hello"), Ok(()));
        assert_eq!(fs.read_file("/b/c.txt"), Ok(b"hello".to_vec()));

        let handle = fs.create("/b/c.txt").unwrap();
        assert_eq!(fs.read_file("/b/c.txt"), Ok(Vec::new()), "create truncates");
        drop(handle);
    }

    #[test]
    fn test_stat() {
        let fs = FileSystem::default();
        fs.put_file("/a/b.txt", b"four").unwrap();

        let info = fs.stat("/a/b.txt").unwrap();
        assert_eq!(info.name, "b.txt");
        assert_eq!(info.len, 4);
        assert_eq!(info.mode, 0o666);
        assert!(info.is_file());

        let info = fs.stat("/a").unwrap();
        assert!(info.is_dir());
        assert_eq!(info.len, 0);
        assert_eq!(info.mode, 0o777);

        assert!(fs.stat("/").unwrap().is_dir());
        assert!(fs.stat("/a/").unwrap().is_dir());
        assert_eq!(kind(fs.stat("/a/b.txt/")), ErrorKind::NotADirectory);
        assert_eq!(kind(fs.stat("/a/b.txt/c")), ErrorKind::NotADirectory);
        assert_eq!(kind(fs.stat("/a/missing")), ErrorKind::NotFound);
        assert_eq!(kind(fs.stat("")), ErrorKind::InvalidPath);

        let err = fs.stat("/nope").unwrap_err();
        assert_eq!(err.to_string(), "stat /nope: entity not found");
    }

    #[test]
    fn test_read_dir_is_sorted() {
        let fs = FileSystem::default();
        fs.put_file("/d/f.txt", b"f").unwrap();
        fs.put_file("/d/Z.txt", b"z").unwrap();
        fs.mkdir("/d/c").unwrap();

        let listing = fs.read_dir("/d").unwrap();
        assert_eq!(names(&listing), ["Z.txt", "c", "f.txt"]);
        assert!(listing[1].is_dir());
        assert_eq!(fs.read_dir("/d"), Ok(listing), "listing is stable");

        assert_eq!(kind(fs.read_dir("/d/f.txt")), ErrorKind::NotADirectory);
        assert_eq!(kind(fs.read_dir("/nope")), ErrorKind::NotFound);
        assert_eq!(kind(fs.read_dir("")), ErrorKind::InvalidPath);
    }

    #[test]
    fn test_read_file() {
        let fs = FileSystem::default();
        fs.put_file("/a/b", b"content").unwrap();

        let mut copy = fs.read_file("/a/b").unwrap();
        copy.push(b'!');
        assert_eq!(fs.read_file("/a/b"), Ok(b"content".to_vec()), "a copy is returned");
        assert_eq!(kind(fs.read_file("/a")), ErrorKind::IsADirectory);
    }

    #[test]
    fn test_remove() {
        let fs = FileSystem::default();
        fs.put_file("/a/b/c.txt", b"c").unwrap();
        fs.mkdir("/a/empty").unwrap();

        assert_eq!(kind(fs.remove("/")), ErrorKind::PermissionDenied);
        assert_eq!(kind(fs.remove_all("/")), ErrorKind::PermissionDenied);
        assert_eq!(kind(fs.remove("/a")), ErrorKind::NotEmpty);
        assert_eq!(kind(fs.remove("/a/b")), ErrorKind::NotEmpty);
        assert_eq!(kind(fs.remove("/a/nope")), ErrorKind::NotFound);

        assert_eq!(fs.remove("/a/empty"), Ok(()));
        assert_eq!(fs.remove("/a/b/c.txt"), Ok(()));
        assert_eq!(fs.remove("/a/b"), Ok(()));

        fs.put_file("/a/x/y/z", b"z").unwrap();
        assert_eq!(fs.remove_all("/a"), Ok(()));
        assert_eq!(kind(fs.stat("/a")), ErrorKind::NotFound);
        assert_eq!(fs.node_count(), 1, "everything was reclaimed");
        assert_eq!(fs.bytes_used(), 0);
    }

    #[test]
    fn test_rename() {
        let fs = FileSystem::default();
        fs.mkdir_all("/a/d").unwrap();
        fs.mkdir_all("/bar").unwrap();
        fs.put_file("/bar/hello1.txt", b"one").unwrap();
        fs.put_file("/bar/hello2.txt", b"two").unwrap();

        assert_eq!(kind(fs.rename("", "/x")), ErrorKind::InvalidPath);
        assert_eq!(kind(fs.rename("/x", "")), ErrorKind::InvalidPath);
        assert_eq!(kind(fs.rename("/", "/x")), ErrorKind::PermissionDenied);
        assert_eq!(kind(fs.rename("/a", "/")), ErrorKind::PermissionDenied);
        assert_eq!(kind(fs.rename("/a/d", "/a/d/e")), ErrorKind::InvalidDestination);
        assert_eq!(kind(fs.rename("/a", "/a/d/e")), ErrorKind::InvalidDestination);
        assert_eq!(kind(fs.rename("/nope", "/x")), ErrorKind::NotFound);
        assert_eq!(kind(fs.rename("/a", "/missing/x")), ErrorKind::NotFound);
        assert_eq!(fs.rename("/a/./d", "/a/d/"), Ok(()), "same path is a no-op");

        // Nothing can overwrite a directory.
        assert_eq!(kind(fs.rename("/bar/hello1.txt", "/a")), ErrorKind::AlreadyExists);
        assert_eq!(kind(fs.rename("/bar", "/a")), ErrorKind::AlreadyExists);
        // A directory cannot overwrite a file.
        assert_eq!(kind(fs.rename("/a", "/bar/hello1.txt")), ErrorKind::AlreadyExists);

        let a = fs.change_dir("/a").unwrap();
        assert_eq!(kind(a.rename("d", "..")), ErrorKind::PermissionDenied);
        assert_eq!(kind(a.rename("d", "./..")), ErrorKind::PermissionDenied);
        assert_eq!(kind(a.rename("d", ".")), ErrorKind::InvalidPath);

        assert_eq!(
            names(&fs.read_dir("/").unwrap()),
            ["a", "bar"],
            "rejected renames change nothing"
        );
        assert_eq!(names(&fs.read_dir("/a").unwrap()), ["d"]);
        assert_eq!(names(&fs.read_dir("/bar").unwrap()), ["hello1.txt", "hello2.txt"]);
        assert_eq!(fs.read_file("/bar/hello1.txt"), Ok(b"one".to_vec()));

        // A file can overwrite a file.
        assert_eq!(fs.rename("/bar/hello2.txt", "/bar/hello1.txt"), Ok(()));
        assert_eq!(fs.read_file("/bar/hello1.txt"), Ok(b"two".to_vec()));
        assert_eq!(kind(fs.stat("/bar/hello2.txt")), ErrorKind::NotFound);
        assert_eq!(fs.bytes_used(), 3, "the overwritten file was reclaimed");

        // Moving a directory along with its content.
        assert_eq!(fs.rename("/bar", "/a/d/baz"), Ok(()));
        assert_eq!(fs.read_file("/a/d/baz/hello1.txt"), Ok(b"two".to_vec()));
        assert_eq!(names(&fs.read_dir("/").unwrap()), ["a"]);

        let moved = fs.change_dir("/a/d/baz").unwrap();
        assert_eq!(moved.current_dir(), "/a/d/baz");
    }

    #[test]
    fn test_rename_error_names_both_paths() {
        let fs = FileSystem::default();
        let err = fs.rename("/from", "/to").unwrap_err();
        assert_eq!(err.to_string(), "rename /from /to: entity not found");
    }

    #[test]
    fn test_chtimes() {
        let fs = FileSystem::default();
        fs.put_file("/a/b", b"").unwrap();

        assert_eq!(fs.chtimes("/a/b", 10, 20), Ok(()));
        let info = fs.stat("/a/b").unwrap();
        assert_eq!((info.accessed, info.modified), (10, 20));

        assert_eq!(fs.chtimes("/a", 1, 2), Ok(()));
        assert_eq!(fs.stat("/a").unwrap().modified, 2);
        assert_eq!(kind(fs.chtimes("/nope", 1, 2)), ErrorKind::NotFound);
    }

    #[test]
    fn test_change_dir_shares_the_tree() {
        let fs = FileSystem::default();
        fs.mkdir_all("/a/b").unwrap();

        let a = fs.change_dir("/a").unwrap();
        assert!(a.shares_tree_with(&fs));
        assert_eq!(a.current_dir(), "/a");

        a.write_file("b/file.txt", b"relative").unwrap();
        assert_eq!(fs.read_file("/a/b/file.txt"), Ok(b"relative".to_vec()));

        fs.put_file("/a/other", b"absolute").unwrap();
        assert_eq!(a.read_file("other"), Ok(b"absolute".to_vec()));
        assert_eq!(a.read_file("./b/../other"), Ok(b"absolute".to_vec()));

        let b = a.change_dir("b").unwrap();
        assert_eq!(b.current_dir(), "/a/b");
        assert_eq!(b.change_dir("../..").unwrap().current_dir(), "/");
        assert_eq!(b.change_dir("../../../..").unwrap().current_dir(), "/");

        assert_eq!(kind(a.change_dir("")), ErrorKind::InvalidPath);
        assert_eq!(kind(a.change_dir("b/file.txt")), ErrorKind::NotADirectory);
        assert_eq!(kind(a.change_dir("nope")), ErrorKind::NotFound);
    }

    #[test]
    fn test_current_dir_is_inverse_of_change_dir() {
        let fs = FileSystem::default();
        for path in ["/x", "/x/y/z", "/with space/ünïcode", "/a/../b/./c/"] {
            fs.mkdir_all(path).unwrap();
            let expected = clean(path);
            assert_eq!(fs.change_dir(path).unwrap().current_dir(), expected);
        }
    }

    #[test]
    fn test_open_file_survives_remove() {
        let fs = FileSystem::default();
        fs.put_file("/a/b/c.txt", b"still here").unwrap();
        let nodes = fs.node_count();

        let mut handle = fs.open("/a/b/c.txt").unwrap();
        fs.remove_all("/a").unwrap();
        assert_eq!(kind(fs.stat("/a/b/c.txt")), ErrorKind::NotFound);
        assert_eq!(fs.node_count(), nodes, "the subtree is kept while open");

        let mut content = String::new();
        handle.read_to_string(&mut content).unwrap();
        assert_eq!(content, "still here");
        assert_eq!(handle.stat().unwrap().name, "c.txt");

        drop(handle);
        assert_eq!(fs.node_count(), 1, "the subtree is reclaimed once closed");
        assert_eq!(fs.bytes_used(), 0);
    }

    #[test]
    fn test_create_replaces_a_file_held_open() {
        let fs = FileSystem::default();
        fs.write_file("/f", b"old").unwrap();

        let mut old = fs.open("/f").unwrap();
        let mut new = fs.create("/f").unwrap();
        new.write_all(b"new content").unwrap();

        let mut content = Vec::new();
        old.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"old");
        assert_eq!(fs.read_file("/f"), Ok(b"new content".to_vec()));

        drop(old);
        assert_eq!(fs.bytes_used(), 11);
    }

    #[test]
    fn test_working_directory_survives_remove() {
        let fs = FileSystem::default();
        fs.mkdir_all("/a/b").unwrap();
        let b = fs.change_dir("/a/b").unwrap();

        fs.remove_all("/a").unwrap();
        assert_eq!(b.current_dir(), "/a/b", "the last known path is kept");
        assert_eq!(b.write_file("f", b"data"), Ok(()));
        assert_eq!(b.read_file("f"), Ok(b"data".to_vec()));
        assert_eq!(b.change_dir("..").unwrap().current_dir(), "/a");
        assert_eq!(b.change_dir("../..").unwrap().current_dir(), "/a", "no way up");
        assert_eq!(kind(fs.stat("/a/b/f")), ErrorKind::NotFound);

        drop(b);
        assert_eq!(fs.node_count(), 1);
    }

    #[test]
    fn test_storage_limits() {
        let fs = FileSystem::with_config(MemFsConfig::default().with_max_inodes(3).with_max_bytes(8));
        assert_eq!(fs.config().max_inodes, Some(3));

        fs.mkdir("/a").unwrap();
        fs.write_file("/a/f", b"12345678").unwrap();
        assert_eq!(kind(fs.mkdir("/b")), ErrorKind::StorageFull);
        assert_eq!(kind(fs.write_file("/g", b"")), ErrorKind::StorageFull);
        assert_eq!(fs.node_count(), 3);

        assert_eq!(fs.write_file("/a/f", b"87654321"), Ok(()), "rewriting in place fits");
        let mut handle = fs.new_open_options().write(true).open("/a/f").unwrap();
        let err = handle.write(b"123456789").unwrap_err();
        assert_eq!(ErrorKind::from(&err), ErrorKind::StorageFull);
        drop(handle);
        assert_eq!(fs.read_file("/a/f"), Ok(b"87654321".to_vec()), "nothing was written");

        fs.remove("/a/f").unwrap();
        assert_eq!(fs.mkdir("/b"), Ok(()));
    }

    #[test]
    fn test_debug_renders_the_tree() {
        let fs = FileSystem::default();
        fs.put_file("/foo/bar.txt", b"").unwrap();

        let rendered = format!("{fs:?}");
        assert!(rendered.contains("dir"));
        assert!(rendered.contains("foo"));
        assert!(rendered.contains("bar.txt"));
    }
}
