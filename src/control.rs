//! Protocol control messages.
//!
//! | Type | Name       | Payload                         |
//! |------|------------|---------------------------------|
//! | 0x01 | CHUNK_SIZE | u32 BE, top bit reserved        |
//! | 0x02 | ABORT      | u32 BE chunk stream id          |
//! | 0x03 | ACK        | u32 BE sequence number          |
//! | 0x04 | PING       | u16 BE event type, u32 BE data  |
//! | 0x05 | ACK_SIZE   | u32 BE window size              |
//! | 0x06 | BANDWIDTH  | u32 BE window size, u8 limit    |

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use tracing::debug;

use crate::params::NegotiatedParams;
use crate::types::{Message, MessageType, RtmpError, CHUNK_STREAM_ID_PROTOCOL};

pub const USER_CONTROL_STREAM_BEGIN: u16 = 0;
pub const USER_CONTROL_PING_REQUEST: u16 = 6;
pub const USER_CONTROL_PING_RESPONSE: u16 = 7;

pub const BANDWIDTH_LIMIT_HARD: u8 = 0;
pub const BANDWIDTH_LIMIT_SOFT: u8 = 1;
pub const BANDWIDTH_LIMIT_DYNAMIC: u8 = 2;

/// Chunk size values carry 31 bits; the top bit is reserved.
pub(crate) const CHUNK_SIZE_MASK: u32 = 0x7FFF_FFFF;

/// What a control message did to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    ChunkSize(u32),
    Abort(u32),
    Acknowledgement(u32),
    AckSize(u32),
    Bandwidth { size: u32, limit: u8 },
    UserControl { event: u16, data: u32 },
    Ignored(MessageType),
}

/// Applies protocol control messages to the negotiated parameters.
#[derive(Debug, Clone)]
pub struct ProtocolControl {
    params: Arc<NegotiatedParams>,
}

impl ProtocolControl {
    pub fn new(params: Arc<NegotiatedParams>) -> Self {
        Self { params }
    }

    /// Interpret one control message. Unrecognized types are ignored.
    ///
    /// Chunk size changes are only validated and reported here: the
    /// [`ChunkDecoder`](crate::codec::ChunkDecoder) applies them as soon as the
    /// message is reassembled, before any later chunk is read.
    pub fn handle(&self, message: &Message) -> Result<ControlEvent, RtmpError> {
        match message.typ {
            MessageType::ChunkSize => {
                let size = read_u32(message)? & CHUNK_SIZE_MASK;
                if size == 0 {
                    return Err(RtmpError::InvalidChunkSize(size));
                }
                debug!("peer chunk size is now {}", size);
                Ok(ControlEvent::ChunkSize(size))
            }
            MessageType::Abort => {
                let chunk_stream_id = read_u32(message)?;
                debug!("peer aborted message on chunk stream {}", chunk_stream_id);
                Ok(ControlEvent::Abort(chunk_stream_id))
            }
            MessageType::Ack => {
                let sequence = read_u32(message)?;
                debug!("peer acknowledged {} bytes", sequence);
                self.params.set_last_ack_received(sequence);
                Ok(ControlEvent::Acknowledgement(sequence))
            }
            MessageType::AckSize => {
                let size = read_u32(message)?;
                debug!("setting ack size {} -> {}", self.params.in_window_size(), size);
                self.params.set_in_window_size(size);
                Ok(ControlEvent::AckSize(size))
            }
            MessageType::Bandwidth => {
                let size = read_u32(message)?;
                let limit = message
                    .payload()
                    .get(4)
                    .copied()
                    .unwrap_or(BANDWIDTH_LIMIT_DYNAMIC);
                debug!("peer bandwidth {} (limit type {})", size, limit);
                self.params.set_peer_bandwidth(size, limit);
                Ok(ControlEvent::Bandwidth { size, limit })
            }
            MessageType::Ping => {
                let (event, data) = read_user_control(message)?;
                debug!("user control event {} ({})", event, data);
                Ok(ControlEvent::UserControl { event, data })
            }
            other => {
                debug!("ignoring other protocol message {:?}", other);
                Ok(ControlEvent::Ignored(other))
            }
        }
    }
}

fn read_u32(message: &Message) -> Result<u32, RtmpError> {
    let payload = message.payload();
    if payload.len() < 4 {
        return Err(RtmpError::TruncatedControl(message.typ, payload.len()));
    }
    Ok(BigEndian::read_u32(&payload[..4]))
}

fn read_user_control(message: &Message) -> Result<(u16, u32), RtmpError> {
    let payload = message.payload();
    if payload.len() < 2 {
        return Err(RtmpError::TruncatedControl(message.typ, payload.len()));
    }
    let event = BigEndian::read_u16(&payload[..2]);
    // Some events carry no data word.
    let data = if payload.len() >= 6 {
        BigEndian::read_u32(&payload[2..6])
    } else {
        0
    };
    Ok((event, data))
}

fn protocol_message(typ: MessageType, payload: BytesMut) -> Message {
    Message::new(CHUNK_STREAM_ID_PROTOCOL, typ, payload)
}

/// Announce the chunk size we will use from the next message on.
pub fn set_chunk_size(size: u32) -> Message {
    let mut payload = BytesMut::with_capacity(4);
    payload.put_u32(size & CHUNK_SIZE_MASK);
    protocol_message(MessageType::ChunkSize, payload)
}

/// Tell the peer to drop the partial message on `chunk_stream_id`.
pub fn abort(chunk_stream_id: u32) -> Message {
    let mut payload = BytesMut::with_capacity(4);
    payload.put_u32(chunk_stream_id);
    protocol_message(MessageType::Abort, payload)
}

pub fn acknowledgement(sequence: u32) -> Message {
    let mut payload = BytesMut::with_capacity(4);
    payload.put_u32(sequence);
    protocol_message(MessageType::Ack, payload)
}

pub fn window_ack_size(size: u32) -> Message {
    let mut payload = BytesMut::with_capacity(4);
    payload.put_u32(size);
    protocol_message(MessageType::AckSize, payload)
}

pub fn set_peer_bandwidth(size: u32, limit: u8) -> Message {
    let mut payload = BytesMut::with_capacity(5);
    payload.put_u32(size);
    payload.put_u8(limit);
    protocol_message(MessageType::Bandwidth, payload)
}

pub fn user_control(event: u16, data: u32) -> Message {
    let mut payload = BytesMut::with_capacity(6);
    payload.put_u16(event);
    payload.put_u32(data);
    protocol_message(MessageType::Ping, payload)
}

pub fn ping_response(timestamp: u32) -> Message {
    user_control(USER_CONTROL_PING_RESPONSE, timestamp)
}
