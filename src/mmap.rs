use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::{Mmap, MmapOptions};

use crate::Result;

/// Read-only memory map of a whole point file.
///
/// Empty files are kept unmapped; mapping zero bytes fails on some platforms.
pub struct MmapFile {
    _file: File,
    map: Option<Mmap>,
    len: usize,
}

impl MmapFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        let map = if len == 0 {
            None
        } else {
            // SAFETY: point files are immutable once written; the map is read-only.
            Some(unsafe { MmapOptions::new().len(len).map(&file)? })
        };
        Ok(Self {
            _file: file,
            map,
            len,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.map {
            Some(map) => map,
            None => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
