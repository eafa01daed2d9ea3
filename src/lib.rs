//! Reader and codec for DatAware `.d` point files.
//!
//! A point file is a small preamble (plus, in format version 2, a tag
//! dictionary) followed by a flat run of time-series records. Files are read
//! in parallel by byte-range splits: each [`SplitRecordReader`] aligns its
//! split start to the next record boundary and yields every record that
//! starts inside the split, so the splits of a file together produce each
//! record exactly once.

pub mod cache;
pub mod codec;
pub mod config;
pub mod cursor;
pub mod error;
pub mod header;
pub mod input_format;
pub mod mmap;
pub mod reader;
pub mod source;
pub mod split;
pub mod writer;

pub use cache::{FileLease, HeaderCache};
pub use codec::{decode_record, encode_record, find_next_record_boundary, PointRecord};
pub use config::{IoMode, ReaderConfig};
pub use error::{Error, Result};
pub use header::{FormatHeader, FormatVersion, RecordLayout, TagDictionary, TagInfo};
pub use input_format::PointFileInputFormat;
pub use reader::{
    CollectingSink, Diagnostic, DiagnosticKind, DiagnosticSink, LogSink, ReaderState,
    SplitRecordReader, SplitStats,
};
pub use source::{ByteSource, FileSource, MmapSource};
pub use split::{plan_splits, FileId, SplitRange};
pub use writer::{encode_file, PointFileWriter};
