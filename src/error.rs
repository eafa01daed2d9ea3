use thiserror::Error;

use crate::split::FileId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed header: {0}")]
    MalformedHeader(&'static str),
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),
    #[error("truncated record: need {needed} bytes, have {available}")]
    TruncatedRecord { needed: usize, available: usize },
    #[error("corrupt record: {0}")]
    CorruptRecord(&'static str),
    #[error("split [{start}, {end}) out of range for file of {file_len} bytes")]
    SplitOutOfRange { start: u64, end: u64, file_len: u64 },
    #[error("end of split")]
    EndOfSplit,
    #[error("invalid record: {0}")]
    InvalidRecord(&'static str),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("config error: {0}")]
    Config(String),
    #[error("{file} at offset {offset}: {source}")]
    At {
        file: FileId,
        offset: u64,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Attach file identity and byte offset to an error raised while reading a split.
    pub fn at(self, file: &FileId, offset: u64) -> Self {
        match self {
            Error::At { .. } => self,
            other => Error::At {
                file: file.clone(),
                offset,
                source: Box::new(other),
            },
        }
    }

    /// The underlying error with any location wrappers stripped.
    pub fn root(&self) -> &Error {
        match self {
            Error::At { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the error aborts the whole file rather than a single split or record.
    pub fn is_fatal_for_file(&self) -> bool {
        matches!(
            self.root(),
            Error::MalformedHeader(_) | Error::UnsupportedVersion(_) | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
