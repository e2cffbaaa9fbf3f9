//! # rtmp - RTMP chunk stream transport
//!
//! The client half of the RTMP chunk stream protocol:
//!
//! * **Chunk header codec** for all four header formats and the three basic
//!   header sizes
//! * **Chunk multiplexing** with per-stream header inheritance and message
//!   reassembly
//! * **Message framing** that splits outgoing messages at the negotiated
//!   chunk size
//! * **A connection pipeline** of receive, dispatch and send tasks joined by
//!   bounded queues
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use bytes::BytesMut;
//! use rtmp::{ChunkDecoder, ChunkEncoder, Message, MessageType, NegotiatedParams};
//! use tokio_util::codec::{Decoder, Encoder};
//!
//! let params = Arc::new(NegotiatedParams::default());
//! let mut encoder = ChunkEncoder::new(params.clone());
//! let mut decoder = ChunkDecoder::new(params);
//!
//! let message = Message::new(6, MessageType::Video, vec![0x17u8; 300]).with_timestamp(40);
//! let mut wire = BytesMut::new();
//! encoder.encode(message.clone(), &mut wire)?;
//!
//! let decoded = decoder.decode(&mut wire)?.unwrap();
//! assert_eq!(decoded.payload(), message.payload());
//! assert_eq!(decoded.absolute_timestamp, 40);
//! # Ok::<(), rtmp::RtmpError>(())
//! ```
//!
//! ## Chunk Format
//!
//! Every chunk starts with a basic header:
//!
//! | Chunk stream id | Size | Layout                                  |
//! |-----------------|------|-----------------------------------------|
//! | 2 ..= 63        | 1B   | `fmt(2 bits) \| id(6 bits)`             |
//! | 64 ..= 319      | 2B   | `fmt \| 0`, `id - 64`                   |
//! | 320 ..= 65599   | 3B   | `fmt \| 1`, `id - 64` (little-endian)   |
//!
//! followed by a message header whose shape depends on `fmt`:
//!
//! | fmt | Name                  | Size | Fields                                   |
//! |-----|-----------------------|------|------------------------------------------|
//! | 0   | FULL                  | 11B  | timestamp, length, type, stream id (LE)  |
//! | 1   | SAME_STREAM           | 7B   | timestamp delta, length, type            |
//! | 2   | SAME_LENGTH_AND_STREAM| 3B   | timestamp delta                          |
//! | 3   | CONTINUATION          | 0B   | none                                     |
//!
//! Timestamps and lengths are 3-byte big-endian. A timestamp of `0xFFFFFF`
//! announces a 4-byte big-endian extended timestamp after the message header.
//! Fields a header omits are inherited from the previous header on the same
//! chunk stream.
//!
//! ## Reserved Chunk Streams
//!
//! | Id | Use                       |
//! |----|---------------------------|
//! | 2  | Protocol control messages |
//! | 3  | Commands                  |
//! | 4  | User control messages     |

pub mod chunk_stream;
pub mod codec;
pub mod config;
pub mod connection;
pub mod control;
pub mod header;
pub mod params;
pub mod tcp;
pub mod types;

// Re-export main types for convenience
pub use types::{
    HeaderFormat, Message, MessageType, RtmpError, CHUNK_STREAM_ID_COMMAND,
    CHUNK_STREAM_ID_PROTOCOL, CHUNK_STREAM_ID_USER_CONTROL, DEFAULT_CHUNK_SIZE,
    DEFAULT_WINDOW_SIZE, TIMESTAMP_AUTO, TIMESTAMP_MAX,
};

pub use chunk_stream::{InboundChunkStream, OutboundChunkStream};
pub use codec::{ChunkDecoder, ChunkEncoder};
pub use config::ClientConfig;
pub use connection::{ChannelHandler, ClientEvent, ClientHandler, Connection};
pub use control::{ControlEvent, ProtocolControl};
pub use header::{encode_header, try_decode_header, ChunkHeader};
pub use params::NegotiatedParams;
pub use tcp::RtmpClient;
