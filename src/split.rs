use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{Error, Result};

/// Identity of one point file, used as the header-cache key and in diagnostics.
///
/// Keeps the path it was built from, so files whose names are not valid
/// UTF-8 still open; `as_str` is the lossy display form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId {
    name: Arc<str>,
    path: Arc<Path>,
}

impl FileId {
    pub fn new(id: impl AsRef<str>) -> Self {
        let id = id.as_ref();
        Self {
            name: Arc::from(id),
            path: Arc::from(Path::new(id)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for FileId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FileId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&Path> for FileId {
    fn from(value: &Path) -> Self {
        Self {
            name: Arc::from(value.to_string_lossy().as_ref()),
            path: Arc::from(value),
        }
    }
}

impl From<PathBuf> for FileId {
    fn from(value: PathBuf) -> Self {
        Self::from(value.as_path())
    }
}

/// Half-open byte range `[start, end)` of one file, as handed out by a splitter.
///
/// Splits ignore record boundaries; the reader aligns them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitRange {
    pub file: FileId,
    pub start: u64,
    pub end: u64,
}

impl SplitRange {
    pub fn new(file: impl Into<FileId>, start: u64, end: u64) -> Self {
        Self {
            file: file.into(),
            start,
            end,
        }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks `start < file_len`, `start <= end` and `end <= file_len`.
    pub fn validate(&self, file_len: u64) -> Result<()> {
        if self.start >= file_len || self.start > self.end || self.end > file_len {
            return Err(Error::SplitOutOfRange {
                start: self.start,
                end: self.end,
                file_len,
            });
        }
        Ok(())
    }
}

impl fmt::Display for SplitRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}+{}", self.file, self.start, self.len())
    }
}

/// Cuts `[0, file_len)` into consecutive ranges of at most `split_size` bytes.
///
/// This mirrors a generic byte-range splitter on the framework side; it is
/// used by harnesses and the inspection tool, never by the reader itself.
pub fn plan_splits(file: impl Into<FileId>, file_len: u64, split_size: u64) -> Vec<SplitRange> {
    let file = file.into();
    let split_size = split_size.max(1);
    let mut splits = Vec::new();
    let mut start = 0;
    while start < file_len {
        let end = start.saturating_add(split_size).min(file_len);
        splits.push(SplitRange {
            file: file.clone(),
            start,
            end,
        });
        start = end;
    }
    splits
}
