//! Random-access byte views over one point file.
//!
//! Readers never open files themselves; they pull bytes through a
//! [`ByteSource`] supplied by the caller. Sources are `Send + Sync`, so a
//! caller may share one source between the readers of several splits or wrap
//! blocking reads in its own scheduling.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use crate::mmap::MmapFile;
use crate::Result;

pub trait ByteSource: Send + Sync {
    /// Total file length in bytes.
    fn len(&self) -> u64;

    /// Reads up to `buf.len()` bytes at `offset`; returns the count read.
    /// A read may come back short before end of file.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Repeats `read_at` until `buf` is full or a read returns nothing.
    fn fill_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Whole-file view, when the source already holds the bytes in memory.
    fn as_slice(&self) -> Option<&[u8]> {
        None
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn copy_from_slice(bytes: &[u8], offset: u64, buf: &mut [u8]) -> usize {
    let Ok(start) = usize::try_from(offset) else {
        return 0;
    };
    if start >= bytes.len() {
        return 0;
    }
    let n = buf.len().min(bytes.len() - start);
    buf[..n].copy_from_slice(&bytes[start..start + n]);
    n
}

/// Memory-mapped file source.
pub struct MmapSource {
    map: MmapFile,
}

impl MmapSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            map: MmapFile::open(path.as_ref())?,
        })
    }
}

impl ByteSource for MmapSource {
    fn len(&self) -> u64 {
        self.map.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        Ok(copy_from_slice(self.map.as_slice(), offset, buf))
    }

    fn as_slice(&self) -> Option<&[u8]> {
        Some(self.map.as_slice())
    }
}

/// Positional-read source; never maps the file.
pub struct FileSource {
    file: File,
    len: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let mut filled = 0;
        while filled < buf.len() {
            let n = read_at_os(&self.file, &mut buf[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

#[cfg(unix)]
fn read_at_os(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at_os(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

impl ByteSource for Vec<u8> {
    fn len(&self) -> u64 {
        self[..].len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        Ok(copy_from_slice(self, offset, buf))
    }

    fn as_slice(&self) -> Option<&[u8]> {
        Some(&self[..])
    }
}

impl ByteSource for Arc<[u8]> {
    fn len(&self) -> u64 {
        self[..].len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        Ok(copy_from_slice(self, offset, buf))
    }

    fn as_slice(&self) -> Option<&[u8]> {
        Some(&self[..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn check_source(source: &dyn ByteSource) {
        assert_eq!(source.len(), 10);
        let mut buf = [0u8; 4];
        assert_eq!(source.read_at(2, &mut buf).unwrap(), 4);
        assert_eq!(buf, [2, 3, 4, 5]);
        assert_eq!(source.read_at(8, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[8, 9]);
        assert_eq!(source.read_at(10, &mut buf).unwrap(), 0);
        assert_eq!(source.read_at(u64::MAX, &mut buf).unwrap(), 0);
    }

    #[test]
    fn sources_agree() {
        let bytes: Vec<u8> = (0u8..10).collect();
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("bytes.d");
        std::fs::File::create(&path)
            .and_then(|mut file| file.write_all(&bytes))
            .expect("write");

        check_source(&bytes.clone());
        check_source(&Arc::<[u8]>::from(bytes.clone()));
        check_source(&MmapSource::open(&path).expect("mmap"));
        check_source(&FileSource::open(&path).expect("file"));
    }

    #[test]
    fn only_file_source_lacks_slice_view() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("bytes.d");
        std::fs::write(&path, b"DATW").expect("write");
        assert!(FileSource::open(&path).unwrap().as_slice().is_none());
        assert_eq!(MmapSource::open(&path).unwrap().as_slice(), Some(&b"DATW"[..]));
    }
}
