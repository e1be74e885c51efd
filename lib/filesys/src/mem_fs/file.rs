//! This module contains the [`FileHandle`] type, a cursor over the content
//! of one in-memory file.

use super::filesystem::NodeRef;
use crate::{ErrorKind, FileInfo, FsError, ReadDirBatch, Result, VirtualFile};
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::trace;

/// A handle on an open file.
///
/// The handle keeps the file alive: removing or replacing it in the tree
/// does not affect what the handle reads and writes.
#[derive(Debug)]
pub struct FileHandle {
    node: NodeRef,
    path: String,
    position: usize,
    readable: bool,
    writable: bool,
    /// Set by the first write, the modification time is stamped on close.
    dirty: bool,
    closed: bool,
}

impl FileHandle {
    pub(super) fn new(node: NodeRef, path: String, readable: bool, writable: bool) -> Self {
        Self {
            node,
            path,
            position: 0,
            readable,
            writable,
            dirty: false,
            closed: false,
        }
    }

    /// The path this handle was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn position(&self) -> u64 {
        self.position as u64
    }

    fn error(&self, op: &'static str, kind: ErrorKind) -> FsError {
        kind.at(op, self.path.as_str())
    }

    fn ensure_open(&self, op: &'static str) -> Result<()> {
        if self.closed {
            return Err(self.error(op, ErrorKind::Closed));
        }
        Ok(())
    }
}

impl Read for FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open("read")?;
        if !self.readable {
            return Err(self.error("read", ErrorKind::NotReadable).into());
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let read = self
            .node
            .fs()
            .read_at(self.node.inode(), self.position, buf)
            .map_err(|kind| self.error("read", kind))?;
        self.position += read;

        trace!(path = %self.path, read, position = self.position, "read");
        Ok(read)
    }
}

impl Write for FileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open("write")?;
        if !self.writable {
            return Err(self.error("write", ErrorKind::NotWritable).into());
        }
        if buf.is_empty() {
            return Ok(0);
        }

        self.node
            .fs_mut()
            .write_at(self.node.inode(), self.position, buf)
            .map_err(|kind| self.error("write", kind))?;
        self.position += buf.len();
        self.dirty = true;

        trace!(path = %self.path, written = buf.len(), position = self.position, "write");
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for FileHandle {
    fn seek(&mut self, position: SeekFrom) -> io::Result<u64> {
        self.ensure_open("seek")?;

        let (base, offset) = match position {
            SeekFrom::Start(offset) => (0, i128::from(offset)),
            SeekFrom::End(offset) => {
                let len = self.node.fs().info(self.node.inode()).map(|info| info.len);
                let len = len.map_err(|kind| self.error("seek", kind))?;
                (i128::from(len), i128::from(offset))
            }
            SeekFrom::Current(offset) => (self.position as i128, i128::from(offset)),
        };

        let target = base + offset;
        if target < 0 {
            return Err(self.error("seek", ErrorKind::NegativeSeek).into());
        }
        self.position = usize::try_from(target)
            .map_err(|_| self.error("seek", ErrorKind::SeekOverflow))?;

        Ok(self.position as u64)
    }
}

impl VirtualFile for FileHandle {
    fn stat(&self) -> Result<FileInfo> {
        self.ensure_open("stat")?;
        self.node
            .fs()
            .info(self.node.inode())
            .map_err(|kind| self.error("stat", kind))
    }

    fn is_dir(&self) -> bool {
        false
    }

    fn readdir(&mut self, _n: isize) -> Result<ReadDirBatch> {
        self.ensure_open("readdir")?;
        Err(self.error("readdir", ErrorKind::NotADirectory))
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_open("close")?;
        self.closed = true;

        if self.dirty {
            self.node
                .fs_mut()
                .touch(self.node.inode())
                .map_err(|kind| self.error("close", kind))?;
        }
        trace!(path = %self.path, dirty = self.dirty, "closed");
        Ok(())
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}
