//! Chunk header encoding and decoding.
//!
//! ```text
//! basic header (1-3 bytes)       message header (0, 3, 7 or 11 bytes)        [extended timestamp]
//! +-----+---------+-------------+-----------+--------+------+--------------+ +------------------+
//! | fmt | cs id   | cs id ext   | timestamp | length | type | stream id    | | timestamp (4B BE)|
//! | 2b  | 6b      | 0, 1 or 2B  | 3B BE     | 3B BE  | 1B   | 4B LE        | | if ts == 0xFFFFFF|
//! +-----+---------+-------------+-----------+--------+------+--------------+ +------------------+
//! ```
//!
//! The codec only moves bytes in and out of a [`ChunkHeader`]. Filling in the
//! fields a compressed header omits is the job of
//! [`InboundChunkStream`](crate::chunk_stream::InboundChunkStream).

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use bytes::{BufMut, BytesMut};

use crate::types::{
    HeaderFormat, MessageType, RtmpError, MAX_CHUNK_STREAM_ID, MAX_MESSAGE_LENGTH,
    MIN_CHUNK_STREAM_ID, TIMESTAMP_EXTENDED, TIMESTAMP_MAX,
};

/// Longest possible header: 3-byte basic header, 11-byte message header and
/// 4-byte extended timestamp.
pub const MAX_HEADER_LEN: usize = 18;

/// Decoded form of one chunk header.
///
/// For the compressed formats the absent fields hold zero until they are
/// inherited from the chunk stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub format: HeaderFormat,
    pub chunk_stream_id: u32,
    /// Absolute timestamp for `Full`, delta otherwise. Already replaced by
    /// the extended value when the marker was present.
    pub timestamp: u32,
    pub message_length: u32,
    pub message_type: MessageType,
    pub message_stream_id: u32,
}

impl ChunkHeader {
    pub fn new(format: HeaderFormat, chunk_stream_id: u32) -> Self {
        Self {
            format,
            chunk_stream_id,
            timestamp: 0,
            message_length: 0,
            message_type: MessageType::Unknown(0),
            message_stream_id: 0,
        }
    }

    /// Message-local timestamp with wrapped values folded back into range.
    pub fn calculate_timestamp(&self) -> u32 {
        if self.timestamp > TIMESTAMP_MAX {
            self.timestamp % TIMESTAMP_MAX
        } else {
            self.timestamp
        }
    }

    /// Whether this header needs the 4-byte extended timestamp on the wire.
    pub fn has_extended_timestamp(&self) -> bool {
        self.format.has_timestamp() && self.timestamp >= TIMESTAMP_EXTENDED
    }
}

/// Number of bytes the basic header needs for `chunk_stream_id`.
pub fn basic_header_len(chunk_stream_id: u32) -> Result<usize, RtmpError> {
    match chunk_stream_id {
        MIN_CHUNK_STREAM_ID..=63 => Ok(1),
        64..=319 => Ok(2),
        320..=MAX_CHUNK_STREAM_ID => Ok(3),
        other => Err(RtmpError::InvalidChunkStreamId(other)),
    }
}

/// Try to decode one chunk header from the front of `src`.
///
/// Returns the header and the number of bytes it occupies, or `None` if `src`
/// does not hold a complete header yet. Nothing is consumed.
pub fn try_decode_header(src: &[u8]) -> Option<(ChunkHeader, usize)> {
    let first = *src.first()?;
    let format = HeaderFormat::from_bits(first);

    let (chunk_stream_id, mut pos) = match first & 0x3F {
        0 => (u32::from(*src.get(1)?) + 64, 2),
        1 => {
            if src.len() < 3 {
                return None;
            }
            (u32::from(LittleEndian::read_u16(&src[1..3])) + 64, 3)
        }
        id => (u32::from(id), 1),
    };

    let len = format.message_header_len();
    if src.len() < pos + len {
        return None;
    }

    let mut header = ChunkHeader::new(format, chunk_stream_id);
    let fields = &src[pos..pos + len];

    if format.has_timestamp() {
        header.timestamp = BigEndian::read_u24(&fields[0..3]);
    }
    if matches!(format, HeaderFormat::Full | HeaderFormat::SameStream) {
        header.message_length = BigEndian::read_u24(&fields[3..6]);
        header.message_type = MessageType::from(fields[6]);
    }
    if format == HeaderFormat::Full {
        header.message_stream_id = LittleEndian::read_u32(&fields[7..11]);
    }
    pos += len;

    if format.has_timestamp() && header.timestamp == TIMESTAMP_EXTENDED {
        if src.len() < pos + 4 {
            return None;
        }
        header.timestamp = BigEndian::read_u32(&src[pos..pos + 4]);
        pos += 4;
    }

    Some((header, pos))
}

/// Append the wire form of `header` to `dst`, returning the number of bytes written.
///
/// Nothing is written if the header cannot be encoded.
pub fn encode_header(header: &ChunkHeader, dst: &mut BytesMut) -> Result<usize, RtmpError> {
    let id = header.chunk_stream_id;
    let basic_len = basic_header_len(id)?;

    let carries_length = matches!(header.format, HeaderFormat::Full | HeaderFormat::SameStream);
    if carries_length && header.message_length > MAX_MESSAGE_LENGTH {
        return Err(RtmpError::MessageTooLarge(header.message_length));
    }

    let extended = header.has_extended_timestamp();
    let total = basic_len + header.format.message_header_len() + if extended { 4 } else { 0 };
    dst.reserve(total);

    let fmt = u8::from(header.format) << 6;
    match basic_len {
        1 => dst.put_u8(fmt | id as u8),
        2 => {
            dst.put_u8(fmt);
            dst.put_u8((id - 64) as u8);
        }
        _ => {
            dst.put_u8(fmt | 1);
            dst.put_u16_le((id - 64) as u16);
        }
    }

    if header.format.has_timestamp() {
        put_u24(dst, if extended { TIMESTAMP_EXTENDED } else { header.timestamp });
    }
    if carries_length {
        put_u24(dst, header.message_length);
        dst.put_u8(header.message_type.into());
    }
    if header.format == HeaderFormat::Full {
        dst.put_u32_le(header.message_stream_id);
    }
    if extended {
        dst.put_u32(header.timestamp);
    }

    Ok(total)
}

fn put_u24(dst: &mut BytesMut, value: u32) {
    let mut field = [0u8; 3];
    BigEndian::write_u24(&mut field, value);
    dst.extend_from_slice(&field);
}
