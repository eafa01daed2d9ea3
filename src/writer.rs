use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::codec::{encode_record, PointRecord};
use crate::header::FormatHeader;
use crate::Result;

/// Appends point records to a `.d` file, header first.
pub struct PointFileWriter<W: Write> {
    inner: W,
    header: FormatHeader,
    bytes_written: u64,
    records: u64,
}

impl PointFileWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>, header: FormatHeader) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Self::new(BufWriter::new(file), header)
    }
}

impl<W: Write> PointFileWriter<W> {
    pub fn new(mut inner: W, header: FormatHeader) -> Result<Self> {
        let preamble = header.to_bytes()?;
        inner.write_all(&preamble)?;
        Ok(Self {
            inner,
            header,
            bytes_written: preamble.len() as u64,
            records: 0,
        })
    }

    /// Encodes and writes one record; returns the offset it starts at.
    pub fn append(&mut self, record: &PointRecord) -> Result<u64> {
        let bytes = encode_record(&self.header, record)?;
        let offset = self.bytes_written;
        self.inner.write_all(&bytes)?;
        self.bytes_written += bytes.len() as u64;
        self.records += 1;
        Ok(offset)
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn header(&self) -> &FormatHeader {
        &self.header
    }

    pub fn finish(mut self) -> Result<W> {
        self.inner.flush()?;
        log::debug!(
            "wrote {} records ({} bytes)",
            self.records,
            self.bytes_written
        );
        Ok(self.inner)
    }
}

/// Encodes a complete file image in memory.
pub fn encode_file<'a>(
    header: &FormatHeader,
    records: impl IntoIterator<Item = &'a PointRecord>,
) -> Result<Vec<u8>> {
    let mut writer = PointFileWriter::new(Vec::new(), header.clone())?;
    for record in records {
        writer.append(record)?;
    }
    writer.finish()
}
