use crate::FileInfo;

/// One page of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadDirBatch {
    pub entries: Vec<FileInfo>,
    /// Set when a bounded request ran past the end of the listing.
    pub eof: bool,
}

/// Position inside a sorted directory listing.
///
/// The listing is taken again on every call, so entries added or removed
/// between two calls shift what the next page contains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadDirCursor {
    position: usize,
}

impl ReadDirCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Take the next page out of `listing`.
    ///
    /// With `n <= 0` every remaining entry is returned. Otherwise at most `n`
    /// entries are returned, and `eof` is set if fewer than `n` remained.
    pub fn next_batch(&mut self, mut listing: Vec<FileInfo>, n: isize) -> ReadDirBatch {
        let total = listing.len();
        let start = self.position.min(total);

        let (end, eof) = if n <= 0 {
            (total, false)
        } else {
            let wanted = start.saturating_add(n.unsigned_abs());
            if wanted > total {
                (total, true)
            } else {
                (wanted, false)
            }
        };

        self.position = end;
        listing.truncate(end);
        ReadDirBatch {
            entries: listing.split_off(start),
            eof,
        }
    }
}
