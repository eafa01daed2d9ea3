use std::collections::HashMap;

use crate::{Error, Result};

pub const MAGIC: [u8; 4] = *b"DATW";
pub const PREAMBLE_SIZE: usize = 8;

pub const MAGIC_OFFSET: usize = 0;
pub const VERSION_OFFSET: usize = 4;
pub const RESERVED_OFFSET: usize = 5;
pub const LAYOUT_WORD_OFFSET: usize = 6;

/// Smallest legal stride of a version 1 record.
pub const V1_RECORD_LEN: usize = 16;
/// Fixed part of a version 2 dictionary entry, before the name bytes.
pub const TAG_ENTRY_FIXED_LEN: usize = 21;
pub const HEADER_CRC_LEN: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatVersion {
    /// Standard point file: fixed stride, IEEE single values, 1995 epoch seconds.
    V1,
    /// Extended point file: length-prefixed records, fixed-point values scaled
    /// through an embedded tag dictionary.
    V2,
}

impl FormatVersion {
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            other => Err(Error::UnsupportedVersion(other)),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordLayout {
    Fixed { stride: u16 },
    Variable,
}

/// One entry of the embedded tag dictionary.
#[derive(Clone, Debug, PartialEq)]
pub struct TagInfo {
    pub tag_id: u32,
    pub name: String,
    pub scale: f64,
    pub offset: f64,
}

impl TagInfo {
    pub fn new(tag_id: u32, name: impl Into<String>, scale: f64, offset: f64) -> Self {
        Self {
            tag_id,
            name: name.into(),
            scale,
            offset,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TagDictionary {
    entries: Vec<TagInfo>,
    by_id: HashMap<u32, usize>,
}

impl TagDictionary {
    pub fn new(entries: Vec<TagInfo>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            if !entry.scale.is_finite() || entry.scale == 0.0 {
                return Err(Error::MalformedHeader("tag scale must be finite and non-zero"));
            }
            if !entry.offset.is_finite() {
                return Err(Error::MalformedHeader("tag offset must be finite"));
            }
            if entry.name.len() > u8::MAX as usize {
                return Err(Error::MalformedHeader("tag name too long"));
            }
            if by_id.insert(entry.tag_id, idx).is_some() {
                return Err(Error::MalformedHeader("duplicate tag id"));
            }
        }
        if entries.len() > u16::MAX as usize {
            return Err(Error::MalformedHeader("too many tags"));
        }
        Ok(Self { entries, by_id })
    }

    pub fn get(&self, tag_id: u32) -> Option<&TagInfo> {
        self.by_id.get(&tag_id).map(|&idx| &self.entries[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &TagInfo> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn encoded_len(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| TAG_ENTRY_FIXED_LEN + entry.name.len())
            .sum()
    }
}

/// Per-file preamble: version, record layout and, for v2, the tag dictionary.
#[derive(Clone, Debug, PartialEq)]
pub struct FormatHeader {
    pub version: FormatVersion,
    pub layout: RecordLayout,
    pub tags: TagDictionary,
    /// Offset of the first record.
    pub header_len: u64,
}

impl FormatHeader {
    pub fn fixed(stride: u16) -> Result<Self> {
        if (stride as usize) < V1_RECORD_LEN {
            return Err(Error::MalformedHeader("record stride below minimum"));
        }
        Ok(Self {
            version: FormatVersion::V1,
            layout: RecordLayout::Fixed { stride },
            tags: TagDictionary::default(),
            header_len: PREAMBLE_SIZE as u64,
        })
    }

    pub fn variable(tags: Vec<TagInfo>) -> Result<Self> {
        let tags = TagDictionary::new(tags)?;
        let header_len = (PREAMBLE_SIZE + tags.encoded_len() + HEADER_CRC_LEN) as u64;
        Ok(Self {
            version: FormatVersion::V2,
            layout: RecordLayout::Variable,
            tags,
            header_len,
        })
    }

    pub fn stride(&self) -> Option<u64> {
        match self.layout {
            RecordLayout::Fixed { stride } => Some(stride as u64),
            RecordLayout::Variable => None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.header_len as usize);
        buf.extend_from_slice(&MAGIC);
        buf.push(self.version.as_byte());
        buf.push(0);
        match (self.version, self.layout) {
            (FormatVersion::V1, RecordLayout::Fixed { stride }) => {
                buf.extend_from_slice(&stride.to_le_bytes());
            }
            (FormatVersion::V2, RecordLayout::Variable) => {
                buf.extend_from_slice(&(self.tags.len() as u16).to_le_bytes());
                for entry in self.tags.iter() {
                    buf.extend_from_slice(&entry.tag_id.to_le_bytes());
                    buf.extend_from_slice(&entry.scale.to_le_bytes());
                    buf.extend_from_slice(&entry.offset.to_le_bytes());
                    buf.push(entry.name.len() as u8);
                    buf.extend_from_slice(entry.name.as_bytes());
                }
                let crc = crc32(&buf);
                buf.extend_from_slice(&crc.to_le_bytes());
            }
            (version, _) => return Err(Error::UnsupportedVersion(version.as_byte())),
        }
        Ok(buf)
    }

    /// Parses the preamble and, for v2, the tag dictionary.
    ///
    /// Returns `TruncatedRecord` when `bytes` ends before the header does, so
    /// the caller can read further and retry.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PREAMBLE_SIZE {
            return Err(Error::TruncatedRecord {
                needed: PREAMBLE_SIZE,
                available: bytes.len(),
            });
        }
        if bytes[MAGIC_OFFSET..MAGIC_OFFSET + 4] != MAGIC {
            return Err(Error::MalformedHeader("bad magic"));
        }
        let version = FormatVersion::from_byte(bytes[VERSION_OFFSET])?;
        if bytes[RESERVED_OFFSET] != 0 {
            return Err(Error::MalformedHeader("reserved byte is non-zero"));
        }
        let layout_word = read_u16(bytes, LAYOUT_WORD_OFFSET);
        match version {
            FormatVersion::V1 => Self::fixed(layout_word),
            FormatVersion::V2 => parse_dictionary(bytes, layout_word as usize),
        }
    }
}

fn parse_dictionary(bytes: &[u8], count: usize) -> Result<FormatHeader> {
    let mut pos = PREAMBLE_SIZE;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        need(bytes, pos + TAG_ENTRY_FIXED_LEN)?;
        let tag_id = read_u32(bytes, pos);
        let scale = f64::from_le_bytes(read_array(bytes, pos + 4));
        let offset = f64::from_le_bytes(read_array(bytes, pos + 12));
        let name_len = bytes[pos + 20] as usize;
        pos += TAG_ENTRY_FIXED_LEN;
        need(bytes, pos + name_len)?;
        let name = std::str::from_utf8(&bytes[pos..pos + name_len])
            .map_err(|_| Error::MalformedHeader("tag name is not utf-8"))?;
        pos += name_len;
        entries.push(TagInfo::new(tag_id, name, scale, offset));
    }
    need(bytes, pos + HEADER_CRC_LEN)?;
    let stored = read_u32(bytes, pos);
    if crc32(&bytes[..pos]) != stored {
        return Err(Error::MalformedHeader("header crc mismatch"));
    }
    FormatHeader::variable(entries)
}

fn need(bytes: &[u8], needed: usize) -> Result<()> {
    if bytes.len() < needed {
        return Err(Error::TruncatedRecord {
            needed,
            available: bytes.len(),
        });
    }
    Ok(())
}

pub(crate) fn crc32(bytes: &[u8]) -> u32 {
    use crc32fast::Hasher;
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

#[inline]
pub(crate) fn read_array<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[at..at + N]);
    out
}

#[inline]
pub(crate) fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes(read_array(bytes, at))
}

#[inline]
pub(crate) fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(read_array(bytes, at))
}
