use std::fmt;
use std::sync::{Arc, Mutex};

use crate::cache::{read_header, FileLease, HeaderCache};
use crate::codec::{
    decode_record, find_next_record_boundary, record_length, resync_scan, BoundaryScan,
    PointRecord, Resync, WalkState, V2_MAX_RECORD_LEN,
};
use crate::config::ReaderConfig;
use crate::cursor::DecodeCursor;
use crate::header::{FormatHeader, RecordLayout};
use crate::source::ByteSource;
use crate::split::{FileId, SplitRange};
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderState {
    Unopened,
    Ready,
    Exhausted,
    Closed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SplitStats {
    pub records: u64,
    pub corrupt_records: u64,
    /// The file ended inside the last record of this split.
    pub truncated_tail: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A record was skipped; `skipped` bytes were stepped over to reach the
    /// next boundary.
    CorruptRecord { reason: &'static str, skipped: u64 },
    TruncatedTail { needed: usize, available: usize },
}

/// A recoverable problem met while reading a split.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub file: FileId,
    pub offset: u64,
    pub kind: DiagnosticKind,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DiagnosticKind::CorruptRecord { reason, skipped } => write!(
                f,
                "{} at offset {}: skipped corrupt record ({reason}), {skipped} bytes",
                self.file, self.offset
            ),
            DiagnosticKind::TruncatedTail { needed, available } => write!(
                f,
                "{} at offset {}: file ends inside record ({available} of {needed} bytes)",
                self.file, self.offset
            ),
        }
    }
}

/// Receives recoverable diagnostics from split readers.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: &Diagnostic);
}

/// Emits every diagnostic as a `log` warning.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&self, diagnostic: &Diagnostic) {
        log::warn!("{diagnostic}");
    }
}

/// Keeps diagnostics in memory for later inspection.
#[derive(Debug, Default)]
pub struct CollectingSink {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .map(|diagnostics| diagnostics.clone())
            .unwrap_or_default()
    }

    pub fn corrupt_count(&self) -> usize {
        self.diagnostics()
            .iter()
            .filter(|d| matches!(d.kind, DiagnosticKind::CorruptRecord { .. }))
            .count()
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, diagnostic: &Diagnostic) {
        if let Ok(mut diagnostics) = self.diagnostics.lock() {
            diagnostics.push(diagnostic.clone());
        }
    }
}

/// Lazy, forward-only sequence of the point records that start inside one split.
///
/// ```text
/// Unopened --open()--> Ready --next_record()--> ... --> Exhausted
///     \__________________\___________close()____________\--> Closed
/// ```
///
/// A record that starts before `split.end` is read in full even when it runs
/// past `end`; the reader of the following split skips it during its own
/// boundary search.
pub struct SplitRecordReader {
    split: SplitRange,
    config: ReaderConfig,
    cache: Arc<HeaderCache>,
    sink: Arc<dyn DiagnosticSink>,
    state: ReaderState,
    cursor: DecodeCursor,
    lease: Option<FileLease>,
    header: Option<Arc<FormatHeader>>,
    stats: SplitStats,
}

impl SplitRecordReader {
    pub fn new(
        split: SplitRange,
        source: Arc<dyn ByteSource>,
        cache: Arc<HeaderCache>,
        config: ReaderConfig,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let cursor = DecodeCursor::new(source, split.start, config.window_size);
        Self {
            split,
            config,
            cache,
            sink,
            state: ReaderState::Unopened,
            cursor,
            lease: None,
            header: None,
            stats: SplitStats::default(),
        }
    }

    /// Obtains the file header and positions the reader on the first record
    /// boundary at or after `split.start`.
    pub fn open(&mut self) -> Result<()> {
        match self.state {
            ReaderState::Unopened => {}
            ReaderState::Closed => return Err(Error::InvalidState("reader closed")),
            _ => return Err(Error::InvalidState("reader already opened")),
        }
        let file = self.split.file.clone();
        let lease = self.cache.acquire(&file)?;
        let header = {
            let source = self
                .cursor
                .source()
                .ok_or(Error::InvalidState("reader closed"))?;
            let max_header_len = self.config.max_header_len;
            lease
                .header_or_load(|| read_header(source, max_header_len))
                .map_err(|err| err.at(&file, 0))?
        };
        self.split
            .validate(self.cursor.file_len())
            .map_err(|err| err.at(&file, self.split.start))?;

        let first = self
            .first_boundary(&header, &lease)
            .map_err(|err| err.at(&file, self.split.start))?;
        if self.config.share_anchors && header.layout == RecordLayout::Variable {
            lease.add_anchor(first);
        }
        self.cursor.seek(first);
        log::debug!(
            "opened split {} (v{}), first record at {first}",
            self.split,
            header.version.as_byte()
        );
        self.header = Some(header);
        self.lease = Some(lease);
        self.state = ReaderState::Ready;
        Ok(())
    }

    fn first_boundary(&mut self, header: &FormatHeader, lease: &FileLease) -> Result<u64> {
        let approx = self.split.start;
        let mut from = header.header_len;
        if self.config.share_anchors {
            if let Some(anchor) = lease.nearest_anchor(approx) {
                from = from.max(anchor);
            }
        }
        let mut walk = WalkState::at_boundary(from);
        if header.stride().is_some() {
            // Fixed strides are pure arithmetic; no bytes needed.
            return match find_next_record_boundary(header, &[], walk, approx, true)? {
                BoundaryScan::Found(offset) => Ok(offset),
                BoundaryScan::NeedMore(_) => Ok(self.cursor.file_len()),
            };
        }
        loop {
            let (bytes, eof) = self.cursor.peek_at(walk.offset, V2_MAX_RECORD_LEN)?;
            match find_next_record_boundary(header, bytes, walk, approx, eof)? {
                BoundaryScan::Found(offset) => return Ok(offset),
                BoundaryScan::NeedMore(_) if eof => return Ok(self.cursor.file_len()),
                BoundaryScan::NeedMore(next) => walk = next,
            }
        }
    }

    /// Decodes the next record of the split.
    ///
    /// Returns `Ok(None)` once, when the split is exhausted; later calls fail
    /// with `EndOfSplit`. Corrupt records are reported to the sink and skipped.
    pub fn next_record(&mut self) -> Result<Option<PointRecord>> {
        match self.state {
            ReaderState::Ready => {}
            ReaderState::Unopened => return Err(Error::InvalidState("reader not opened")),
            ReaderState::Exhausted => return Err(Error::EndOfSplit),
            ReaderState::Closed => return Err(Error::InvalidState("reader closed")),
        }
        let header = match &self.header {
            Some(header) => Arc::clone(header),
            None => return Err(Error::InvalidState("reader not opened")),
        };
        let min_len = header
            .stride()
            .map(|stride| stride as usize)
            .unwrap_or(V2_MAX_RECORD_LEN);

        loop {
            let pos = self.cursor.offset();
            if pos >= self.split.end {
                self.finish();
                return Ok(None);
            }
            let (bytes, eof) = self
                .cursor
                .peek_at(pos, min_len)
                .map_err(|err| err.at(&self.split.file, pos))?;
            match decode_record(&header, bytes) {
                Ok(record) => {
                    let len = record_length(&header, bytes)?;
                    self.cursor.seek(pos + len as u64);
                    self.stats.records += 1;
                    return Ok(Some(record));
                }
                Err(Error::TruncatedRecord { needed, available }) if eof => {
                    self.stats.truncated_tail = true;
                    self.report(pos, DiagnosticKind::TruncatedTail { needed, available });
                    self.cursor.seek(self.cursor.file_len());
                    self.finish();
                    return Ok(None);
                }
                Err(Error::TruncatedRecord { .. }) => {
                    let next = match header.stride() {
                        Some(stride) => pos + stride as u64,
                        None => self
                            .resync_from(pos + 1)
                            .map_err(|err| err.at(&self.split.file, pos))?,
                    };
                    self.skip_corrupt(pos, next, "record truncated inside file");
                }
                Err(Error::CorruptRecord(reason)) => {
                    let next = match record_length(&header, bytes) {
                        Ok(len) => pos + len as u64,
                        Err(Error::CorruptRecord(_)) => self
                            .resync_from(pos + 1)
                            .map_err(|err| err.at(&self.split.file, pos))?,
                        Err(err) => return Err(err.at(&self.split.file, pos)),
                    };
                    self.skip_corrupt(pos, next, reason);
                }
                Err(err) => return Err(err.at(&self.split.file, pos)),
            }
        }
    }

    fn skip_corrupt(&mut self, pos: u64, next: u64, reason: &'static str) {
        self.stats.corrupt_records += 1;
        self.report(
            pos,
            DiagnosticKind::CorruptRecord {
                reason,
                skipped: next - pos,
            },
        );
        self.cursor.seek(next);
    }

    /// First offset at or after `offset` holding a self-validating record, or
    /// the file end.
    fn resync_from(&mut self, mut offset: u64) -> Result<u64> {
        loop {
            let (bytes, eof) = self.cursor.peek_at(offset, V2_MAX_RECORD_LEN)?;
            match resync_scan(bytes, eof) {
                Resync::Found(skip) => return Ok(offset + skip as u64),
                Resync::NeedMore(_) if eof => return Ok(self.cursor.file_len()),
                Resync::NeedMore(skip) => offset += skip as u64,
            }
        }
    }

    fn report(&self, offset: u64, kind: DiagnosticKind) {
        self.sink.report(&Diagnostic {
            file: self.split.file.clone(),
            offset,
            kind,
        });
    }

    fn finish(&mut self) {
        self.state = ReaderState::Exhausted;
        let end = self.cursor.offset();
        if let (Some(lease), Some(header)) = (&self.lease, &self.header) {
            if self.config.share_anchors
                && header.layout == RecordLayout::Variable
                && end < self.cursor.file_len()
            {
                lease.add_anchor(end);
            }
        }
        log::debug!(
            "split {} exhausted: {} records, {} corrupt",
            self.split,
            self.stats.records,
            self.stats.corrupt_records
        );
    }

    /// Releases the byte source and the header-cache lease. Idempotent.
    pub fn close(&mut self) {
        if self.state == ReaderState::Closed {
            return;
        }
        self.cursor.close();
        self.header = None;
        if let Some(lease) = self.lease.take() {
            lease.release();
        }
        self.state = ReaderState::Closed;
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn split(&self) -> &SplitRange {
        &self.split
    }

    pub fn header(&self) -> Option<&Arc<FormatHeader>> {
        self.header.as_ref()
    }

    pub fn stats(&self) -> SplitStats {
        self.stats
    }

    pub fn split_len(&self) -> u64 {
        self.split.len()
    }

    /// Bytes of the split behind the cursor, capped at the split length.
    pub fn bytes_consumed(&self) -> u64 {
        match self.state {
            ReaderState::Unopened => 0,
            ReaderState::Exhausted => self.split.len(),
            _ => self
                .cursor
                .offset()
                .saturating_sub(self.split.start)
                .min(self.split.len()),
        }
    }

    pub fn progress(&self) -> f32 {
        let len = self.split_len();
        if len == 0 {
            return if self.state == ReaderState::Exhausted { 1.0 } else { 0.0 };
        }
        self.bytes_consumed() as f32 / len as f32
    }
}

impl Iterator for SplitRecordReader {
    type Item = Result<PointRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            ReaderState::Exhausted | ReaderState::Closed => return None,
            ReaderState::Unopened => {
                if let Err(err) = self.open() {
                    self.close();
                    return Some(Err(err));
                }
            }
            ReaderState::Ready => {}
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(err) => {
                self.close();
                Some(Err(err))
            }
        }
    }
}

impl Drop for SplitRecordReader {
    fn drop(&mut self) {
        self.close();
    }
}
