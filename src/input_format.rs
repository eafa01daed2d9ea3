//! Entry point for split-parallel reading of point files.
//!
//! One [`PointFileInputFormat`] is shared by every task reading splits of a
//! job. It owns the header cache, so readers of the same file parse the header
//! once, and the diagnostic sink readers report skipped records to.

use std::sync::Arc;

use crate::cache::HeaderCache;
use crate::config::{IoMode, ReaderConfig};
use crate::reader::{DiagnosticSink, LogSink, SplitRecordReader};
use crate::source::{ByteSource, FileSource, MmapSource};
use crate::split::{FileId, SplitRange};
use crate::Result;

pub struct PointFileInputFormat {
    config: ReaderConfig,
    cache: Arc<HeaderCache>,
    sink: Arc<dyn DiagnosticSink>,
}

impl PointFileInputFormat {
    pub fn new(config: ReaderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cache: HeaderCache::new(),
            sink: Arc::new(LogSink),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<HeaderCache> {
        &self.cache
    }

    /// Opens `file` as a filesystem path using the configured I/O mode.
    pub fn open_source(&self, file: &FileId) -> Result<Arc<dyn ByteSource>> {
        let source: Arc<dyn ByteSource> = match self.config.io_mode {
            IoMode::Mmap => Arc::new(MmapSource::open(file.path())?),
            IoMode::Pread => Arc::new(FileSource::open(file.path())?),
        };
        Ok(source)
    }

    /// Opens the split's file and returns a reader positioned on the split's
    /// first record.
    pub fn open_reader_for_split(&self, split: &SplitRange) -> Result<SplitRecordReader> {
        let source = self
            .open_source(&split.file)
            .map_err(|err| err.at(&split.file, 0))?;
        log::info!("reading split {split} ({:?})", self.config.io_mode);
        self.open_reader_with_source(split, source)
    }

    /// Same as [`open_reader_for_split`](Self::open_reader_for_split) over
    /// caller-supplied bytes; `split.file` still keys the header cache.
    pub fn open_reader_with_source(
        &self,
        split: &SplitRange,
        source: Arc<dyn ByteSource>,
    ) -> Result<SplitRecordReader> {
        let mut reader = SplitRecordReader::new(
            split.clone(),
            source,
            Arc::clone(&self.cache),
            self.config.clone(),
            Arc::clone(&self.sink),
        );
        reader.open()?;
        Ok(reader)
    }
}
