//! Stateless record codec for DatAware point files.
//!
//! Everything here works on byte slices and a parsed [`FormatHeader`]; no
//! function keeps state between calls, so the codec can be shared freely
//! between readers on different threads.
//!
//! # Record boundaries
//!
//! Splits are byte-range cuts that ignore records. A split reads every record
//! that *starts* inside it, so each reader first has to find the first record
//! boundary at or after its split start:
//!
//! - fixed-stride files round the offset up to the next stride multiple;
//! - variable-length files walk length prefixes forward from a confirmed
//!   boundary (the header end or an anchor).
//!
//! When a length prefix is illegal the walk and the iterator both resume at the
//! first later offset that holds a legal length *and* a matching CRC, so every
//! split agrees on the same chain of boundaries.

use crate::header::{
    crc32, read_array, read_u16, read_u32, FormatHeader, FormatVersion, RecordLayout,
    V1_RECORD_LEN,
};
use crate::{Error, Result};

/// Unix seconds of the historian epoch, 1995-01-01T00:00:00Z.
pub const HISTORIAN_EPOCH_UNIX_SECS: i64 = 788_918_400;

pub const V1_QUALITY_MASK: u16 = 0x1F;
pub const V1_MILLIS_SHIFT: u16 = 5;
const V1_CHECKSUM_OFFSET: usize = 14;

pub const V2_LEN_PREFIX: usize = 2;
pub const V2_FIXED_LEN: usize = 20;
pub const V2_MIN_RECORD_LEN: usize = V2_FIXED_LEN + 2;
pub const V2_MAX_RECORD_LEN: usize = V2_FIXED_LEN + 8;
const V2_TIMESTAMP_OFFSET: usize = 2;
const V2_TAG_OFFSET: usize = 10;
const V2_QUALITY_OFFSET: usize = 14;
const V2_VALUE_OFFSET: usize = 16;

/// One decoded measurement sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointRecord {
    /// Unix epoch milliseconds.
    pub timestamp_millis: i64,
    pub tag_id: u32,
    pub quality_flags: u16,
    pub value: f64,
}

impl PointRecord {
    pub fn new(timestamp_millis: i64, tag_id: u32, quality_flags: u16, value: f64) -> Self {
        Self {
            timestamp_millis,
            tag_id,
            quality_flags,
            value,
        }
    }
}

#[inline]
fn is_legal_v2_len(len: usize) -> bool {
    matches!(len, 22 | 24 | 28)
}

/// Byte length of the record starting at `bytes[0]`.
pub fn record_length(header: &FormatHeader, bytes: &[u8]) -> Result<usize> {
    match (header.version, header.layout) {
        (FormatVersion::V1, RecordLayout::Fixed { stride }) => Ok(stride as usize),
        (FormatVersion::V2, RecordLayout::Variable) => {
            if bytes.len() < V2_LEN_PREFIX {
                return Err(Error::TruncatedRecord {
                    needed: V2_LEN_PREFIX,
                    available: bytes.len(),
                });
            }
            let len = read_u16(bytes, 0) as usize;
            if !is_legal_v2_len(len) {
                return Err(Error::CorruptRecord("illegal record length"));
            }
            Ok(len)
        }
        (version, _) => Err(Error::UnsupportedVersion(version.as_byte())),
    }
}

/// Decodes the record at the start of `bytes`; trailing bytes are ignored.
pub fn decode_record(header: &FormatHeader, bytes: &[u8]) -> Result<PointRecord> {
    let len = record_length(header, bytes)?;
    if bytes.len() < len {
        return Err(Error::TruncatedRecord {
            needed: len,
            available: bytes.len(),
        });
    }
    let bytes = &bytes[..len];
    match header.version {
        FormatVersion::V1 => decode_v1(bytes),
        FormatVersion::V2 => decode_v2(header, bytes),
    }
}

fn decode_v1(bytes: &[u8]) -> Result<PointRecord> {
    let stored = read_u16(bytes, V1_CHECKSUM_OFFSET);
    if crc32(&bytes[..V1_CHECKSUM_OFFSET]) as u16 != stored {
        return Err(Error::CorruptRecord("checksum mismatch"));
    }
    let tag_id = read_u32(bytes, 0);
    let seconds = i32::from_le_bytes(read_array(bytes, 4));
    let flags = read_u16(bytes, 8);
    let millis = (flags >> V1_MILLIS_SHIFT) as i64;
    if millis > 999 {
        return Err(Error::CorruptRecord("millisecond field out of range"));
    }
    let value = f32::from_le_bytes(read_array(bytes, 10));
    Ok(PointRecord {
        timestamp_millis: (HISTORIAN_EPOCH_UNIX_SECS + seconds as i64) * 1000 + millis,
        tag_id,
        quality_flags: flags & V1_QUALITY_MASK,
        value: value as f64,
    })
}

fn decode_v2(header: &FormatHeader, bytes: &[u8]) -> Result<PointRecord> {
    let len = bytes.len();
    let stored = read_u32(bytes, len - 4);
    if crc32(&bytes[..len - 4]) != stored {
        return Err(Error::CorruptRecord("checksum mismatch"));
    }
    let timestamp_millis = i64::from_le_bytes(read_array(bytes, V2_TIMESTAMP_OFFSET));
    let tag_id = read_u32(bytes, V2_TAG_OFFSET);
    let quality_flags = read_u16(bytes, V2_QUALITY_OFFSET);
    let raw = match len - V2_FIXED_LEN {
        2 => i16::from_le_bytes(read_array(bytes, V2_VALUE_OFFSET)) as i64,
        4 => i32::from_le_bytes(read_array(bytes, V2_VALUE_OFFSET)) as i64,
        _ => i64::from_le_bytes(read_array(bytes, V2_VALUE_OFFSET)),
    };
    let tag = header
        .tags
        .get(tag_id)
        .ok_or(Error::CorruptRecord("tag missing from dictionary"))?;
    Ok(PointRecord {
        timestamp_millis,
        tag_id,
        quality_flags,
        value: raw as f64 * tag.scale + tag.offset,
    })
}

/// Encodes `record` in the layout described by `header`.
pub fn encode_record(header: &FormatHeader, record: &PointRecord) -> Result<Vec<u8>> {
    match (header.version, header.layout) {
        (FormatVersion::V1, RecordLayout::Fixed { stride }) => encode_v1(stride as usize, record),
        (FormatVersion::V2, RecordLayout::Variable) => encode_v2(header, record),
        (version, _) => Err(Error::UnsupportedVersion(version.as_byte())),
    }
}

fn encode_v1(stride: usize, record: &PointRecord) -> Result<Vec<u8>> {
    if record.quality_flags > V1_QUALITY_MASK {
        return Err(Error::InvalidRecord("quality does not fit in 5 bits"));
    }
    let seconds = record.timestamp_millis.div_euclid(1000) - HISTORIAN_EPOCH_UNIX_SECS;
    let seconds =
        i32::try_from(seconds).map_err(|_| Error::InvalidRecord("timestamp outside v1 range"))?;
    let millis = record.timestamp_millis.rem_euclid(1000) as u16;
    let value = record.value as f32;
    if value as f64 != record.value && !record.value.is_nan() {
        return Err(Error::InvalidRecord("value not representable as f32"));
    }

    let mut buf = vec![0u8; stride.max(V1_RECORD_LEN)];
    buf[0..4].copy_from_slice(&record.tag_id.to_le_bytes());
    buf[4..8].copy_from_slice(&seconds.to_le_bytes());
    let flags = (millis << V1_MILLIS_SHIFT) | record.quality_flags;
    buf[8..10].copy_from_slice(&flags.to_le_bytes());
    buf[10..14].copy_from_slice(&value.to_le_bytes());
    let checksum = crc32(&buf[..V1_CHECKSUM_OFFSET]) as u16;
    buf[14..16].copy_from_slice(&checksum.to_le_bytes());
    Ok(buf)
}

fn encode_v2(header: &FormatHeader, record: &PointRecord) -> Result<Vec<u8>> {
    let tag = header
        .tags
        .get(record.tag_id)
        .ok_or(Error::InvalidRecord("tag missing from dictionary"))?;
    let raw = ((record.value - tag.offset) / tag.scale).round();
    if !raw.is_finite() || raw < i64::MIN as f64 || raw >= i64::MAX as f64 {
        return Err(Error::InvalidRecord("value out of fixed-point range"));
    }
    let raw = raw as i64;
    let width = if i16::try_from(raw).is_ok() {
        2
    } else if i32::try_from(raw).is_ok() {
        4
    } else {
        8
    };
    let len = V2_FIXED_LEN + width;

    let mut buf = Vec::with_capacity(len);
    buf.extend_from_slice(&(len as u16).to_le_bytes());
    buf.extend_from_slice(&record.timestamp_millis.to_le_bytes());
    buf.extend_from_slice(&record.tag_id.to_le_bytes());
    buf.extend_from_slice(&record.quality_flags.to_le_bytes());
    match width {
        2 => buf.extend_from_slice(&(raw as i16).to_le_bytes()),
        4 => buf.extend_from_slice(&(raw as i32).to_le_bytes()),
        _ => buf.extend_from_slice(&raw.to_le_bytes()),
    }
    let crc = crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Position of a boundary walk.
///
/// `resyncing` is set while the walk is scanning for the next self-validating
/// record after an illegal length prefix; `offset` is then a candidate rather
/// than a confirmed boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WalkState {
    pub offset: u64,
    pub resyncing: bool,
}

impl WalkState {
    pub fn at_boundary(offset: u64) -> Self {
        Self {
            offset,
            resyncing: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryScan {
    /// First record boundary at or after the requested offset.
    Found(u64),
    /// The bytes ran out; call again with a window starting at `offset`.
    NeedMore(WalkState),
}

/// Finds the first record boundary at or after `approx_offset`.
///
/// `bytes` must start at file offset `from.offset`, which is a confirmed
/// boundary (or a resync candidate) at or after the header end. Fixed-stride
/// files ignore `bytes`. `eof` tells the walk that `bytes` reaches the end of
/// the file; a walk that runs off the end then reports `NeedMore` at the last
/// position and the caller treats the file end as the boundary.
pub fn find_next_record_boundary(
    header: &FormatHeader,
    bytes: &[u8],
    from: WalkState,
    approx_offset: u64,
    eof: bool,
) -> Result<BoundaryScan> {
    if let Some(stride) = header.stride() {
        if header.version != FormatVersion::V1 {
            return Err(Error::UnsupportedVersion(header.version.as_byte()));
        }
        return Ok(BoundaryScan::Found(align_to_stride(
            header.header_len,
            stride,
            approx_offset,
        )));
    }
    if header.version != FormatVersion::V2 {
        return Err(Error::UnsupportedVersion(header.version.as_byte()));
    }
    if from.offset < header.header_len {
        return Err(Error::InvalidState("boundary walk must start after the header"));
    }

    let base = from.offset;
    let mut rel = 0usize;
    let mut resyncing = from.resyncing;
    loop {
        if resyncing {
            let window = bytes.get(rel..).unwrap_or(&[]);
            match resync_scan(window, eof) {
                Resync::Found(skip) => {
                    rel += skip;
                    resyncing = false;
                }
                Resync::NeedMore(skip) => {
                    return Ok(BoundaryScan::NeedMore(WalkState {
                        offset: base + (rel + skip) as u64,
                        resyncing: true,
                    }));
                }
            }
        }
        let pos = base + rel as u64;
        if pos >= approx_offset {
            return Ok(BoundaryScan::Found(pos));
        }
        let window = bytes.get(rel..).unwrap_or(&[]);
        match record_length(header, window) {
            Ok(len) => rel += len,
            Err(Error::TruncatedRecord { .. }) => {
                return Ok(BoundaryScan::NeedMore(WalkState::at_boundary(pos)));
            }
            Err(Error::CorruptRecord(_)) => {
                rel += 1;
                resyncing = true;
            }
            Err(err) => return Err(err),
        }
    }
}

fn align_to_stride(header_len: u64, stride: u64, approx_offset: u64) -> u64 {
    if approx_offset <= header_len {
        return header_len;
    }
    let rel = approx_offset - header_len;
    header_len + rel.div_ceil(stride) * stride
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Resync {
    /// A self-validating record starts `n` bytes into the window.
    Found(usize),
    /// Candidates from `n` bytes on could not be checked with the bytes given.
    NeedMore(usize),
}

/// Scans `bytes` for the first offset holding a legal v2 length prefix whose
/// full record passes its CRC.
///
/// With `eof` set, candidates cut short by the end of the file are rejected
/// instead of asking for more bytes; if nothing validates the scan reports
/// `NeedMore` at the window end.
pub(crate) fn resync_scan(bytes: &[u8], eof: bool) -> Resync {
    for skip in 0..bytes.len() {
        let window = &bytes[skip..];
        if window.len() < V2_LEN_PREFIX {
            return Resync::NeedMore(if eof { bytes.len() } else { skip });
        }
        let len = read_u16(window, 0) as usize;
        if !is_legal_v2_len(len) {
            continue;
        }
        if window.len() < len {
            if eof {
                continue;
            }
            return Resync::NeedMore(skip);
        }
        if crc32(&window[..len - 4]) == read_u32(window, len - 4) {
            return Resync::Found(skip);
        }
    }
    Resync::NeedMore(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::TagInfo;

    fn v1() -> FormatHeader {
        FormatHeader::fixed(16).unwrap()
    }

    fn v2() -> FormatHeader {
        FormatHeader::variable(vec![
            TagInfo::new(1, "FREQ", 0.001, 60.0),
            TagInfo::new(2, "VMAG", 0.5, 0.0),
            TagInfo::new(3, "ENERGY", 1.0, 0.0),
        ])
        .unwrap()
    }

    fn v2_file(records: &[PointRecord]) -> (FormatHeader, Vec<u8>, Vec<u64>) {
        let header = v2();
        let mut bytes = header.to_bytes().unwrap();
        let mut starts = Vec::new();
        for record in records {
            starts.push(bytes.len() as u64);
            bytes.extend(encode_record(&header, record).unwrap());
        }
        (header, bytes, starts)
    }

    fn mixed_records() -> Vec<PointRecord> {
        vec![
            PointRecord::new(1_700_000_000_000, 2, 0, 120.5),
            PointRecord::new(1_700_000_000_033, 2, 0, 20_000.0),
            PointRecord::new(1_700_000_000_066, 3, 1, 9_000_000_000.0),
            PointRecord::new(1_700_000_000_100, 2, 0, 7.0),
        ]
    }

    #[test]
    fn v1_round_trip() {
        let header = v1();
        let record = PointRecord::new(1_262_304_000_250, 42, 0x0C, 59.975_f32 as f64);
        let bytes = encode_record(&header, &record).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(record_length(&header, &bytes).unwrap(), 16);
        assert_eq!(decode_record(&header, &bytes).unwrap(), record);
    }

    #[test]
    fn v1_time_uses_historian_epoch() {
        let header = v1();
        let record = PointRecord::new(HISTORIAN_EPOCH_UNIX_SECS * 1000 + 10_500, 1, 0, 1.0);
        let bytes = encode_record(&header, &record).unwrap();
        assert_eq!(i32::from_le_bytes(bytes[4..8].try_into().unwrap()), 10);
        assert_eq!(u16::from_le_bytes(bytes[8..10].try_into().unwrap()) >> 5, 500);
    }

    #[test]
    fn v1_checksum_mismatch_is_corrupt() {
        let header = v1();
        let mut bytes = encode_record(&header, &PointRecord::new(1_262_304_000_000, 7, 0, 1.5)).unwrap();
        bytes[11] ^= 0x40;
        assert!(matches!(
            decode_record(&header, &bytes),
            Err(Error::CorruptRecord("checksum mismatch"))
        ));
    }

    #[test]
    fn v1_rejects_unrepresentable_fields() {
        let header = v1();
        assert!(matches!(
            encode_record(&header, &PointRecord::new(1_262_304_000_000, 7, 0x20, 1.0)),
            Err(Error::InvalidRecord(_))
        ));
        assert!(matches!(
            encode_record(&header, &PointRecord::new(1_262_304_000_000, 7, 0, 0.1)),
            Err(Error::InvalidRecord(_))
        ));
    }

    #[test]
    fn v1_padded_stride() {
        let header = FormatHeader::fixed(24).unwrap();
        let record = PointRecord::new(1_262_304_000_000, 9, 3, -2.25);
        let bytes = encode_record(&header, &record).unwrap();
        assert_eq!(bytes.len(), 24);
        assert_eq!(decode_record(&header, &bytes).unwrap(), record);
    }

    #[test]
    fn v2_round_trip_picks_narrowest_width() {
        let header = v2();
        let lens: Vec<usize> = mixed_records()
            .iter()
            .map(|record| {
                let bytes = encode_record(&header, record).unwrap();
                assert_eq!(decode_record(&header, &bytes).unwrap(), *record);
                bytes.len()
            })
            .collect();
        assert_eq!(lens, vec![22, 24, 28, 22]);
    }

    #[test]
    fn v2_applies_scale_and_offset() {
        let header = v2();
        let record = PointRecord::new(1_700_000_000_000, 1, 0, 60.025);
        let bytes = encode_record(&header, &record).unwrap();
        assert_eq!(i16::from_le_bytes(bytes[16..18].try_into().unwrap()), 25);
        let decoded = decode_record(&header, &bytes).unwrap();
        assert!((decoded.value - 60.025).abs() < 1e-9);
    }

    #[test]
    fn v2_unknown_tag() {
        let header = v2();
        assert!(matches!(
            encode_record(&header, &PointRecord::new(0, 99, 0, 1.0)),
            Err(Error::InvalidRecord(_))
        ));
        let other = FormatHeader::variable(vec![TagInfo::new(99, "X", 1.0, 0.0)]).unwrap();
        let bytes = encode_record(&other, &PointRecord::new(0, 99, 0, 1.0)).unwrap();
        assert!(matches!(
            decode_record(&header, &bytes),
            Err(Error::CorruptRecord("tag missing from dictionary"))
        ));
    }

    #[test]
    fn v2_length_prefix_errors() {
        let header = v2();
        assert!(matches!(
            record_length(&header, &[22]),
            Err(Error::TruncatedRecord { needed: 2, available: 1 })
        ));
        assert!(matches!(
            record_length(&header, &[23, 0]),
            Err(Error::CorruptRecord("illegal record length"))
        ));
        let bytes = encode_record(&header, &mixed_records()[0]).unwrap();
        assert!(matches!(
            decode_record(&header, &bytes[..10]),
            Err(Error::TruncatedRecord { needed: 22, available: 10 })
        ));
    }

    #[test]
    fn version_layout_mismatch_is_refused() {
        let mut header = v1();
        header.version = FormatVersion::V2;
        assert!(matches!(
            record_length(&header, &[0u8; 16]),
            Err(Error::UnsupportedVersion(2))
        ));
        assert!(matches!(
            find_next_record_boundary(&header, &[], WalkState::at_boundary(8), 20, true),
            Err(Error::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn fixed_boundary_rounds_up_to_stride() {
        let header = v1();
        let from = WalkState::at_boundary(8);
        let find = |approx| find_next_record_boundary(&header, &[], from, approx, true).unwrap();
        assert_eq!(find(0), BoundaryScan::Found(8));
        assert_eq!(find(8), BoundaryScan::Found(8));
        assert_eq!(find(9), BoundaryScan::Found(24));
        assert_eq!(find(24), BoundaryScan::Found(24));
        assert_eq!(find(32), BoundaryScan::Found(40));
    }

    #[test]
    fn variable_boundary_walks_prefixes() {
        let (header, bytes, starts) = v2_file(&mixed_records());
        let base = header.header_len;
        let from = WalkState::at_boundary(base);
        let body = &bytes[base as usize..];
        for (i, &start) in starts.iter().enumerate() {
            assert_eq!(
                find_next_record_boundary(&header, body, from, start, true).unwrap(),
                BoundaryScan::Found(start)
            );
            if i + 1 < starts.len() {
                assert_eq!(
                    find_next_record_boundary(&header, body, from, start + 1, true).unwrap(),
                    BoundaryScan::Found(starts[i + 1])
                );
            }
        }
    }

    #[test]
    fn variable_boundary_needs_more_bytes() {
        let (header, bytes, starts) = v2_file(&mixed_records());
        let base = header.header_len as usize;
        let window = &bytes[base..starts[1] as usize + 1];
        let scan = find_next_record_boundary(
            &header,
            window,
            WalkState::at_boundary(base as u64),
            starts[3],
            false,
        )
        .unwrap();
        assert_eq!(scan, BoundaryScan::NeedMore(WalkState::at_boundary(starts[1])));
    }

    #[test]
    fn illegal_prefix_resyncs_to_next_valid_record() {
        let (header, mut bytes, starts) = v2_file(&mixed_records());
        bytes[starts[1] as usize] = 0xFF;
        let base = header.header_len;
        let scan = find_next_record_boundary(
            &header,
            &bytes[base as usize..],
            WalkState::at_boundary(base),
            starts[1] + 1,
            true,
        )
        .unwrap();
        assert_eq!(scan, BoundaryScan::Found(starts[2]));
    }

    #[test]
    fn resync_at_eof_rejects_cut_candidates() {
        let header = v2();
        let record = encode_record(&header, &PointRecord::new(5, 2, 0, 3.0)).unwrap();
        let mut bytes = vec![28u8, 0, 1, 2, 3];
        bytes.extend_from_slice(&record);
        assert_eq!(resync_scan(&bytes, false), Resync::NeedMore(0));
        assert_eq!(resync_scan(&bytes, true), Resync::Found(5));
    }
}
