//! Core types: wire constants, header formats, message types, messages and errors.

use bytes::BytesMut;
use thiserror::Error;

/// Timestamps above this value are treated as having wrapped.
pub const TIMESTAMP_MAX: u32 = 2_000_000_000;

/// Timestamp value meaning "let the sender pick".
pub const TIMESTAMP_AUTO: u32 = 0;

/// Marker in the 3-byte timestamp field announcing a 4-byte extended timestamp.
pub const TIMESTAMP_EXTENDED: u32 = 0xFF_FFFF;

/// Largest value representable by the 3-byte length field.
pub const MAX_MESSAGE_LENGTH: u32 = 0xFF_FFFF;

/// Reserved chunk stream for protocol control messages.
pub const CHUNK_STREAM_ID_PROTOCOL: u32 = 2;
/// Reserved chunk stream for command messages.
pub const CHUNK_STREAM_ID_COMMAND: u32 = 3;
/// Reserved chunk stream for user control messages.
pub const CHUNK_STREAM_ID_USER_CONTROL: u32 = 4;

/// Lowest chunk stream id the basic header can carry.
pub const MIN_CHUNK_STREAM_ID: u32 = 2;
/// Highest chunk stream id the 3-byte basic header can carry.
pub const MAX_CHUNK_STREAM_ID: u32 = 65_599;

pub const DEFAULT_CHUNK_SIZE: u32 = 128;
pub const DEFAULT_WINDOW_SIZE: u32 = 2_500_000;

/// Capacity of the dispatch and outbound message queues.
pub const MESSAGE_QUEUE_CAPACITY: usize = 100;

/// Chunk header shape, carried in the top two bits of the basic header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HeaderFormat {
    /// All message header fields present (11 bytes).
    Full = 0x00,
    /// Message stream id omitted (7 bytes).
    SameStream = 0x01,
    /// Only the timestamp delta present (3 bytes).
    SameLengthAndStream = 0x02,
    /// No message header at all.
    Continuation = 0x03,
}

impl HeaderFormat {
    /// Decode the two format bits of a basic header byte.
    pub fn from_bits(byte: u8) -> Self {
        match (byte >> 6) & 0x03 {
            0x00 => HeaderFormat::Full,
            0x01 => HeaderFormat::SameStream,
            0x02 => HeaderFormat::SameLengthAndStream,
            _ => HeaderFormat::Continuation,
        }
    }

    /// Size of the message header that follows the basic header.
    pub fn message_header_len(self) -> usize {
        match self {
            HeaderFormat::Full => 11,
            HeaderFormat::SameStream => 7,
            HeaderFormat::SameLengthAndStream => 3,
            HeaderFormat::Continuation => 0,
        }
    }

    /// Whether the message header carries a timestamp field.
    pub fn has_timestamp(self) -> bool {
        !matches!(self, HeaderFormat::Continuation)
    }
}

impl From<HeaderFormat> for u8 {
    fn from(format: HeaderFormat) -> u8 {
        format as u8
    }
}

/// Message type id. Unrecognized codes are carried as `Unknown` so they can be
/// ignored downstream instead of failing the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    ChunkSize,
    Abort,
    Ack,
    Ping,
    AckSize,
    Bandwidth,
    Audio,
    Video,
    Flex,
    Amf3SharedObject,
    Amf3,
    Invoke,
    Amf0SharedObject,
    Amf0,
    Flv,
    Unknown(u8),
}

impl From<u8> for MessageType {
    fn from(value: u8) -> Self {
        match value {
            0x01 => MessageType::ChunkSize,
            0x02 => MessageType::Abort,
            0x03 => MessageType::Ack,
            0x04 => MessageType::Ping,
            0x05 => MessageType::AckSize,
            0x06 => MessageType::Bandwidth,
            0x08 => MessageType::Audio,
            0x09 => MessageType::Video,
            0x0F => MessageType::Flex,
            0x10 => MessageType::Amf3SharedObject,
            0x11 => MessageType::Amf3,
            0x12 => MessageType::Invoke,
            0x13 => MessageType::Amf0SharedObject,
            0x14 => MessageType::Amf0,
            0x16 => MessageType::Flv,
            other => MessageType::Unknown(other),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(typ: MessageType) -> u8 {
        match typ {
            MessageType::ChunkSize => 0x01,
            MessageType::Abort => 0x02,
            MessageType::Ack => 0x03,
            MessageType::Ping => 0x04,
            MessageType::AckSize => 0x05,
            MessageType::Bandwidth => 0x06,
            MessageType::Audio => 0x08,
            MessageType::Video => 0x09,
            MessageType::Flex => 0x0F,
            MessageType::Amf3SharedObject => 0x10,
            MessageType::Amf3 => 0x11,
            MessageType::Invoke => 0x12,
            MessageType::Amf0SharedObject => 0x13,
            MessageType::Amf0 => 0x14,
            MessageType::Flv => 0x16,
            MessageType::Unknown(other) => other,
        }
    }
}

/// A complete (send path) or in-progress (receive path) protocol message.
///
/// `buffer.len()` never exceeds `length`; the message is complete exactly
/// when the two are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub typ: MessageType,
    pub chunk_stream_id: u32,
    /// Target message stream.
    pub stream_id: u32,
    /// Message-local timestamp as carried in the header.
    pub timestamp: u32,
    /// Resolved timestamp, accumulated per chunk stream.
    pub absolute_timestamp: u32,
    /// Declared payload length.
    pub length: u32,
    pub buffer: BytesMut,
}

impl Message {
    /// Create a fully populated message ready to send.
    pub fn new(chunk_stream_id: u32, typ: MessageType, payload: impl AsRef<[u8]>) -> Self {
        let payload = payload.as_ref();
        Self {
            typ,
            chunk_stream_id,
            stream_id: 0,
            timestamp: TIMESTAMP_AUTO,
            absolute_timestamp: TIMESTAMP_AUTO,
            length: payload.len() as u32,
            buffer: BytesMut::from(payload),
        }
    }

    /// Create an empty message that will be filled chunk by chunk.
    pub(crate) fn partial(
        typ: MessageType,
        chunk_stream_id: u32,
        stream_id: u32,
        timestamp: u32,
        absolute_timestamp: u32,
        length: u32,
    ) -> Self {
        Self {
            typ,
            chunk_stream_id,
            stream_id,
            timestamp,
            absolute_timestamp,
            length,
            buffer: BytesMut::with_capacity(length as usize),
        }
    }

    pub fn with_stream_id(mut self, stream_id: u32) -> Self {
        self.stream_id = stream_id;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self.absolute_timestamp = timestamp;
        self
    }

    /// Bytes still missing before the message is complete.
    pub fn remaining_bytes(&self) -> u32 {
        self.length.saturating_sub(self.buffer.len() as u32)
    }

    pub fn is_complete(&self) -> bool {
        self.remaining_bytes() == 0
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer
    }
}

/// Errors that can occur while framing or transporting messages.
#[derive(Debug, Error)]
pub enum RtmpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no previous header on chunk stream {chunk_stream_id} for {format:?} header")]
    MissingPreviousHeader {
        chunk_stream_id: u32,
        format: HeaderFormat,
    },

    #[error("chunk stream id {0} cannot be encoded")]
    InvalidChunkStreamId(u32),

    #[error("message length {0} exceeds the 24-bit length field")]
    MessageTooLarge(u32),

    #[error("message declares {declared} bytes but carries {actual}")]
    IncompleteMessage { declared: u32, actual: usize },

    #[error("invalid chunk size {0}")]
    InvalidChunkSize(u32),

    #[error("invalid queue capacity {0}")]
    InvalidQueueCapacity(usize),

    #[error("truncated {0:?} message: {1} bytes")]
    TruncatedControl(MessageType, usize),

    #[error("stream ended in the middle of a chunk")]
    UnexpectedEof,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("connection closed")]
    ConnectionClosed,
}
