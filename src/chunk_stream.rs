//! Per chunk stream bookkeeping.
//!
//! Compressed headers omit fields that are inherited from the previous header
//! seen on the same chunk stream. Each direction keeps its own map of these
//! states; the pipeline loop that owns the direction owns the map.

use tracing::warn;

use crate::header::ChunkHeader;
use crate::types::{HeaderFormat, Message, RtmpError};

/// A header with every omitted field filled in, plus the absolute timestamp
/// resolved for the message it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedHeader {
    pub header: ChunkHeader,
    pub absolute_timestamp: u32,
}

/// Receive-side state of one chunk stream.
#[derive(Debug)]
pub struct InboundChunkStream {
    id: u32,
    last_header: Option<ChunkHeader>,
    last_absolute_timestamp: u32,
    current_message: Option<Message>,
}

impl InboundChunkStream {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            last_header: None,
            last_absolute_timestamp: 0,
            current_message: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn last_header(&self) -> Option<&ChunkHeader> {
        self.last_header.as_ref()
    }

    pub fn last_absolute_timestamp(&self) -> u32 {
        self.last_absolute_timestamp
    }

    /// Whether a message is partway through reassembly.
    pub fn has_current_message(&self) -> bool {
        self.current_message.is_some()
    }

    /// Complete `header` from the previous header on this stream and record it
    /// as the new previous header.
    ///
    /// A continuation header that carries the next chunk of an in-progress
    /// message keeps that message's timestamp. Any other header starts a new
    /// message: `Full` sets the absolute timestamp directly, the compressed
    /// formats add their delta to the last absolute timestamp, and a
    /// continuation header reapplies the previous delta.
    pub fn resolve(&mut self, mut header: ChunkHeader) -> Result<ResolvedHeader, RtmpError> {
        let absolute_timestamp = match (header.format, self.last_header) {
            (HeaderFormat::Full, _) => header.timestamp,
            (format, None) => {
                return Err(RtmpError::MissingPreviousHeader {
                    chunk_stream_id: self.id,
                    format,
                })
            }
            (HeaderFormat::SameStream, Some(last)) => {
                header.message_stream_id = last.message_stream_id;
                self.last_absolute_timestamp.wrapping_add(header.timestamp)
            }
            (HeaderFormat::SameLengthAndStream, Some(last)) => {
                header.message_stream_id = last.message_stream_id;
                header.message_length = last.message_length;
                header.message_type = last.message_type;
                self.last_absolute_timestamp.wrapping_add(header.timestamp)
            }
            (HeaderFormat::Continuation, Some(last)) => {
                header.message_stream_id = last.message_stream_id;
                header.message_length = last.message_length;
                header.message_type = last.message_type;
                header.timestamp = last.timestamp;
                match &self.current_message {
                    Some(message) => message.absolute_timestamp,
                    None => self.last_absolute_timestamp.wrapping_add(last.timestamp),
                }
            }
        };

        if header.format != HeaderFormat::Continuation && self.current_message.is_some() {
            warn!(
                "chunk stream {} started a new message before the previous one completed",
                self.id
            );
            self.current_message = None;
        }

        self.last_header = Some(header);
        self.last_absolute_timestamp = absolute_timestamp;

        Ok(ResolvedHeader {
            header,
            absolute_timestamp,
        })
    }

    /// Take the in-progress message, or start a new one sized by `resolved`.
    pub fn take_or_start_message(&mut self, resolved: &ResolvedHeader) -> Message {
        self.current_message.take().unwrap_or_else(|| {
            let header = &resolved.header;
            Message::partial(
                header.message_type,
                header.chunk_stream_id,
                header.message_stream_id,
                header.calculate_timestamp(),
                resolved.absolute_timestamp,
                header.message_length,
            )
        })
    }

    /// Park an incomplete message until the next chunk arrives.
    pub fn store_message(&mut self, message: Message) {
        self.current_message = Some(message);
    }

    /// Drop the in-progress message, as requested by an abort message.
    pub fn abort_message(&mut self) -> Option<Message> {
        self.current_message.take()
    }
}

/// Send-side state of one chunk stream.
#[derive(Debug)]
pub struct OutboundChunkStream {
    id: u32,
    last_header: Option<ChunkHeader>,
}

impl OutboundChunkStream {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            last_header: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn last_header(&self) -> Option<&ChunkHeader> {
        self.last_header.as_ref()
    }

    /// Build the first-chunk header for `message`. Every message starts with a
    /// `Full` header.
    pub fn new_header(&mut self, message: &Message) -> ChunkHeader {
        let header = ChunkHeader {
            format: HeaderFormat::Full,
            chunk_stream_id: self.id,
            timestamp: message.timestamp,
            message_length: message.length,
            message_type: message.typ,
            message_stream_id: message.stream_id,
        };
        self.last_header = Some(header);
        header
    }
}
