#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "enable-serde", serde(default))]
pub struct MemFsConfig {
    /// Optional max bytes allowed for all file data in this FS instance.
    pub max_bytes: Option<u64>,
    /// Optional max node count (files and directories, root included)
    /// allowed in this FS instance.
    pub max_inodes: Option<u64>,
}

impl MemFsConfig {
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub fn with_max_inodes(mut self, max_inodes: u64) -> Self {
        self.max_inodes = Some(max_inodes);
        self
    }
}
