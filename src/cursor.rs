//! Decode cursor for sequential reading of one split.
//!
//! Tracks the reader's byte offset and keeps a lookahead window over the
//! byte source so records and length prefixes can be peeked without a read
//! per field.
//!
//! # Design
//!
//! - Sources that expose a whole-file slice (mmap, in-memory) are read in
//!   place; the window is never filled
//! - Other sources are read into a window of `window_size` bytes, refilled
//!   when a peek runs past its end
//! - Owned by exactly one reader; no locking

use std::sync::Arc;

use crate::source::ByteSource;
use crate::{Error, Result};

pub struct DecodeCursor {
    /// None once the cursor has been closed
    source: Option<Arc<dyn ByteSource>>,
    file_len: u64,
    /// Next byte the reader will decode from
    offset: u64,
    window: Vec<u8>,
    /// File offset of `window[0]`
    window_start: u64,
    window_size: usize,
    /// The source ran dry before `file_len` on the last refill
    source_drained: bool,
}

impl DecodeCursor {
    pub fn new(source: Arc<dyn ByteSource>, offset: u64, window_size: usize) -> Self {
        let file_len = source.len();
        Self {
            source: Some(source),
            file_len,
            offset,
            window: Vec::new(),
            window_start: 0,
            window_size,
            source_drained: false,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn seek(&mut self, offset: u64) {
        self.offset = offset;
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }

    pub fn source(&self) -> Option<&dyn ByteSource> {
        self.source.as_deref()
    }

    /// Bytes from `offset` onward: at least `min_len` of them unless the file
    /// ends first. The flag is true when the slice reaches the end of the file.
    pub fn peek_at(&mut self, offset: u64, min_len: usize) -> Result<(&[u8], bool)> {
        let source = self
            .source
            .as_ref()
            .ok_or(Error::InvalidState("cursor closed"))?;
        if offset >= self.file_len {
            return Ok((&[], true));
        }
        if let Some(bytes) = source.as_slice() {
            return Ok((&bytes[offset as usize..], true));
        }

        let window_end = self.window_start + self.window.len() as u64;
        let covered = offset >= self.window_start
            && offset <= window_end
            && (offset + min_len as u64 <= window_end
                || window_end >= self.file_len
                || self.source_drained);
        if !covered {
            let want = self.window_size.max(min_len) as u64;
            let len = want.min(self.file_len - offset) as usize;
            self.window.resize(len, 0);
            let filled = source.fill_at(offset, &mut self.window)?;
            self.window.truncate(filled);
            self.window_start = offset;
            self.source_drained = filled < len;
        }

        let rel = (offset - self.window_start) as usize;
        let eof =
            self.source_drained || self.window_start + self.window.len() as u64 >= self.file_len;
        Ok((&self.window[rel..], eof))
    }

    /// Drops the window and the byte source; the offset is kept for progress.
    pub fn close(&mut self) {
        self.source = None;
        self.window = Vec::new();
    }
}
