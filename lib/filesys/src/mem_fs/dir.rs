use super::filesystem::NodeRef;
use crate::{ErrorKind, FileInfo, FsError, ReadDirBatch, ReadDirCursor, Result, VirtualFile};
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::trace;

/// A handle on an open directory. It only lists entries; reading, writing
/// and seeking fail with [`ErrorKind::IsADirectory`].
#[derive(Debug)]
pub struct DirHandle {
    node: NodeRef,
    path: String,
    cursor: ReadDirCursor,
    closed: bool,
}

impl DirHandle {
    pub(super) fn new(node: NodeRef, path: String) -> Self {
        Self {
            node,
            path,
            cursor: ReadDirCursor::new(),
            closed: false,
        }
    }

    fn error(&self, op: &'static str, kind: ErrorKind) -> FsError {
        kind.at(op, self.path.as_str())
    }

    fn refuse(&self, op: &'static str) -> io::Error {
        let kind = if self.closed {
            ErrorKind::Closed
        } else {
            ErrorKind::IsADirectory
        };
        self.error(op, kind).into()
    }
}

impl Read for DirHandle {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(self.refuse("read"))
    }
}

impl Write for DirHandle {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(self.refuse("write"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for DirHandle {
    fn seek(&mut self, _position: SeekFrom) -> io::Result<u64> {
        Err(self.refuse("seek"))
    }
}

impl VirtualFile for DirHandle {
    fn stat(&self) -> Result<FileInfo> {
        if self.closed {
            return Err(self.error("stat", ErrorKind::Closed));
        }
        self.node
            .fs()
            .info(self.node.inode())
            .map_err(|kind| self.error("stat", kind))
    }

    fn is_dir(&self) -> bool {
        true
    }

    fn readdir(&mut self, n: isize) -> Result<ReadDirBatch> {
        if self.closed {
            return Err(self.error("readdir", ErrorKind::Closed));
        }

        let listing = self
            .node
            .fs()
            .list(self.node.inode())
            .map_err(|kind| self.error("readdir", kind))?;
        let batch = self.cursor.next_batch(listing, n);

        trace!(
            path = %self.path,
            entries = batch.entries.len(),
            eof = batch.eof,
            "readdir"
        );
        Ok(batch)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(self.error("close", ErrorKind::Closed));
        }
        self.closed = true;
        Ok(())
    }
}
