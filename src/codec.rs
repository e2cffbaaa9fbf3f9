//! Message framing on top of `tokio_util::codec`.
//!
//! [`ChunkDecoder`] turns the inbound byte stream into complete [`Message`]s,
//! one header plus one payload slice at a time. [`ChunkEncoder`] splits an
//! outbound message into chunks no larger than the negotiated chunk size.
//! The receive loop owns the decoder and the send loop owns the encoder.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::chunk_stream::{InboundChunkStream, OutboundChunkStream};
use crate::control::CHUNK_SIZE_MASK;
use crate::header::{basic_header_len, encode_header, try_decode_header, MAX_HEADER_LEN};
use crate::params::NegotiatedParams;
use crate::types::{
    HeaderFormat, Message, MessageType, RtmpError, CHUNK_STREAM_ID_PROTOCOL, MAX_MESSAGE_LENGTH,
};

#[derive(Debug)]
enum DecodeState {
    /// Waiting for the next chunk header.
    Header,
    /// Header consumed, waiting for `len` payload bytes of `message`.
    Payload { message: Message, len: usize },
}

/// Reassembles inbound chunks into messages.
#[derive(Debug)]
pub struct ChunkDecoder {
    streams: HashMap<u32, InboundChunkStream>,
    params: Arc<NegotiatedParams>,
    state: DecodeState,
}

impl ChunkDecoder {
    pub fn new(params: Arc<NegotiatedParams>) -> Self {
        Self {
            streams: HashMap::new(),
            params,
            state: DecodeState::Header,
        }
    }

    pub fn chunk_stream(&self, chunk_stream_id: u32) -> Option<&InboundChunkStream> {
        self.streams.get(&chunk_stream_id)
    }

    /// Whether the decoder stopped between a header and its payload.
    pub fn is_mid_chunk(&self) -> bool {
        matches!(self.state, DecodeState::Payload { .. })
    }

    /// Apply the control messages that change how the following chunks are
    /// read. Both take effect before the next header is decoded.
    fn apply_control(&mut self, message: &Message) {
        if message.chunk_stream_id != CHUNK_STREAM_ID_PROTOCOL || message.buffer.len() < 4 {
            return;
        }

        let value = BigEndian::read_u32(&message.buffer[..4]);
        match message.typ {
            MessageType::ChunkSize => {
                let size = value & CHUNK_SIZE_MASK;
                if size == 0 {
                    return;
                }
                debug!("setting inbound chunk size {} -> {}", self.params.in_chunk_size(), size);
                self.params.set_in_chunk_size(size);
            }
            MessageType::Abort => {
                let Some(stream) = self.streams.get_mut(&value) else {
                    return;
                };
                if let Some(dropped) = stream.abort_message() {
                    debug!(
                        "aborted message on chunk stream {} after {} of {} bytes",
                        value,
                        dropped.buffer.len(),
                        dropped.length
                    );
                }
            }
            _ => {}
        }
    }
}

impl Decoder for ChunkDecoder {
    type Item = Message;
    type Error = RtmpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match mem::replace(&mut self.state, DecodeState::Header) {
                DecodeState::Header => {
                    let Some((header, used)) = try_decode_header(src) else {
                        src.reserve(MAX_HEADER_LEN);
                        return Ok(None);
                    };
                    src.advance(used);
                    self.params.record_inbound(used);

                    let stream = self
                        .streams
                        .entry(header.chunk_stream_id)
                        .or_insert_with(|| InboundChunkStream::new(header.chunk_stream_id));
                    let resolved = stream.resolve(header)?;
                    let message = stream.take_or_start_message(&resolved);

                    let len = message.remaining_bytes().min(self.params.in_chunk_size()) as usize;
                    trace!(
                        "chunk header {:?} on chunk stream {}: {} of {} bytes remaining, reading {}",
                        header.format,
                        header.chunk_stream_id,
                        message.remaining_bytes(),
                        message.length,
                        len
                    );
                    self.state = DecodeState::Payload { message, len };
                }
                DecodeState::Payload { mut message, len } => {
                    if src.len() < len {
                        src.reserve(len - src.len());
                        self.state = DecodeState::Payload { message, len };
                        return Ok(None);
                    }

                    message.buffer.extend_from_slice(&src.split_to(len));
                    self.params.record_inbound(len);

                    if message.is_complete() {
                        self.apply_control(&message);
                        return Ok(Some(message));
                    }

                    if let Some(stream) = self.streams.get_mut(&message.chunk_stream_id) {
                        stream.store_message(message);
                    }
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(message) => Ok(Some(message)),
            None if buf.is_empty() && !self.is_mid_chunk() => Ok(None),
            None => Err(RtmpError::UnexpectedEof),
        }
    }
}

/// Splits outbound messages into chunks.
#[derive(Debug)]
pub struct ChunkEncoder {
    streams: HashMap<u32, OutboundChunkStream>,
    params: Arc<NegotiatedParams>,
}

impl ChunkEncoder {
    pub fn new(params: Arc<NegotiatedParams>) -> Self {
        Self {
            streams: HashMap::new(),
            params,
        }
    }

    pub fn chunk_stream(&self, chunk_stream_id: u32) -> Option<&OutboundChunkStream> {
        self.streams.get(&chunk_stream_id)
    }
}

/// Check that `message` can be framed: fully populated, on an encodable chunk
/// stream, and within the 24-bit length field.
pub fn validate_outbound(message: &Message) -> Result<(), RtmpError> {
    if message.buffer.len() != message.length as usize {
        return Err(RtmpError::IncompleteMessage {
            declared: message.length,
            actual: message.buffer.len(),
        });
    }
    if message.length > MAX_MESSAGE_LENGTH {
        return Err(RtmpError::MessageTooLarge(message.length));
    }
    basic_header_len(message.chunk_stream_id)?;
    Ok(())
}

impl Encoder<Message> for ChunkEncoder {
    type Error = RtmpError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        validate_outbound(&message)?;

        let id = message.chunk_stream_id;
        let stream = self
            .streams
            .entry(id)
            .or_insert_with(|| OutboundChunkStream::new(id));
        let mut header = stream.new_header(&message);

        let chunk_size = self.params.out_chunk_size().max(1) as usize;
        let payload = &message.buffer[..];
        let start = dst.len();
        let mut offset = 0;

        loop {
            encode_header(&header, dst)?;
            let end = (offset + chunk_size).min(payload.len());
            dst.extend_from_slice(&payload[offset..end]);
            offset = end;
            if offset >= payload.len() {
                break;
            }
            header.format = HeaderFormat::Continuation;
        }

        self.params.record_outbound(dst.len() - start);
        trace!(
            "encoded {:?} message of {} bytes on chunk stream {} into {} bytes",
            message.typ,
            message.length,
            id,
            dst.len() - start
        );

        if id == CHUNK_STREAM_ID_PROTOCOL && message.typ == MessageType::ChunkSize && payload.len() >= 4 {
            let size = BigEndian::read_u32(&payload[..4]) & CHUNK_SIZE_MASK;
            if size > 0 {
                debug!("setting outbound chunk size {} -> {}", chunk_size, size);
                self.params.set_out_chunk_size(size);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control;
    use crate::header::ChunkHeader;
    use rand::{Rng, RngCore};

    fn params(chunk_size: u32) -> Arc<NegotiatedParams> {
        let params = NegotiatedParams::new(chunk_size, 2_500_000);
        params.set_in_chunk_size(chunk_size);
        Arc::new(params)
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn decode_all(decoder: &mut ChunkDecoder, buf: &mut BytesMut) -> Vec<Message> {
        let mut out = Vec::new();
        while let Some(message) = decoder.decode(buf).unwrap() {
            out.push(message);
        }
        out
    }

    fn header(format: HeaderFormat, chunk_stream_id: u32) -> ChunkHeader {
        ChunkHeader::new(format, chunk_stream_id)
    }

    #[test]
    fn random_messages_survive_framing() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let chunk_size = rng.gen_range(1..=600);
            let mut body = vec![0u8; rng.gen_range(0..3000)];
            rng.fill_bytes(&mut body);
            let original = Message::new(rng.gen_range(3..400), MessageType::Video, &body)
                .with_stream_id(rng.gen())
                .with_timestamp(rng.gen_range(0..0x0100_0000));

            let mut wire = BytesMut::new();
            ChunkEncoder::new(params(chunk_size))
                .encode(original.clone(), &mut wire)
                .unwrap();

            let mut decoder = ChunkDecoder::new(params(chunk_size));
            let decoded = decode_all(&mut decoder, &mut wire);

            assert_eq!(decoded, vec![original]);
            assert!(wire.is_empty());
        }
    }

    #[test]
    fn exact_multiple_has_no_trailing_chunk() {
        let mut encoder = ChunkEncoder::new(params(128));
        let mut wire = BytesMut::new();
        encoder
            .encode(Message::new(3, MessageType::Amf0, payload(3 * 128)), &mut wire)
            .unwrap();

        // 12-byte full header, then a 1-byte continuation header before chunks 2 and 3.
        assert_eq!(wire.len(), 12 + 3 * 128 + 2);
        assert_eq!(wire[12 + 128], 0xC3);
        assert_eq!(wire[12 + 128 + 1 + 128], 0xC3);
    }

    #[test]
    fn one_past_multiple_adds_single_byte_chunk() {
        let mut encoder = ChunkEncoder::new(params(128));
        let mut wire = BytesMut::new();
        encoder
            .encode(Message::new(3, MessageType::Amf0, payload(3 * 128 + 1)), &mut wire)
            .unwrap();

        assert_eq!(wire.len(), 12 + 3 * 128 + 1 + 3);
        assert_eq!(wire[wire.len() - 2], 0xC3);
    }

    #[test]
    fn short_message_is_one_chunk() {
        let mut encoder = ChunkEncoder::new(params(128));
        let mut wire = BytesMut::new();
        encoder
            .encode(Message::new(3, MessageType::Amf0, payload(10)), &mut wire)
            .unwrap();
        assert_eq!(wire.len(), 12 + 10);

        let mut decoder = ChunkDecoder::new(params(128));
        let decoded = decode_all(&mut decoder, &mut wire);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].payload(), &payload(10)[..]);
    }

    #[test]
    fn zero_length_message_is_a_bare_header() {
        let mut encoder = ChunkEncoder::new(params(128));
        let mut wire = BytesMut::new();
        let message = Message::new(5, MessageType::Audio, [0u8; 0]);
        encoder.encode(message.clone(), &mut wire).unwrap();
        assert_eq!(wire.len(), 12);

        let mut decoder = ChunkDecoder::new(params(128));
        assert_eq!(decode_all(&mut decoder, &mut wire), vec![message]);
    }

    #[test]
    fn incomplete_outbound_message_rejected() {
        let mut message = Message::new(3, MessageType::Amf0, payload(10));
        message.length = 20;

        let mut wire = BytesMut::new();
        let err = ChunkEncoder::new(params(128))
            .encode(message, &mut wire)
            .unwrap_err();
        assert!(matches!(err, RtmpError::IncompleteMessage { declared: 20, actual: 10 }));
        assert!(wire.is_empty());
    }

    #[test]
    fn outbound_chunk_size_changes_after_the_announcement() {
        let params = params(128);
        let mut encoder = ChunkEncoder::new(params.clone());
        let mut wire = BytesMut::new();

        encoder.encode(control::set_chunk_size(4096), &mut wire).unwrap();
        assert_eq!(params.out_chunk_size(), 4096);
        assert_eq!(wire.len(), 12 + 4);

        wire.clear();
        encoder
            .encode(Message::new(3, MessageType::Amf0, payload(1000)), &mut wire)
            .unwrap();
        assert_eq!(wire.len(), 12 + 1000);
        assert_eq!(params.out_bytes(), 16 + 1012);
    }

    #[test]
    fn interleaved_chunk_streams() {
        let a = payload(300);
        let b: Vec<u8> = payload(100).into_iter().rev().collect();

        let mut wire = BytesMut::new();
        let mut full_a = header(HeaderFormat::Full, 4);
        full_a.message_length = 300;
        full_a.message_type = MessageType::Audio;
        full_a.timestamp = 10;
        encode_header(&full_a, &mut wire).unwrap();
        wire.extend_from_slice(&a[..128]);

        let mut full_b = header(HeaderFormat::Full, 6);
        full_b.message_length = 100;
        full_b.message_type = MessageType::Video;
        full_b.message_stream_id = 1;
        encode_header(&full_b, &mut wire).unwrap();
        wire.extend_from_slice(&b);

        encode_header(&header(HeaderFormat::Continuation, 4), &mut wire).unwrap();
        wire.extend_from_slice(&a[128..256]);
        encode_header(&header(HeaderFormat::Continuation, 4), &mut wire).unwrap();
        wire.extend_from_slice(&a[256..]);

        let mut decoder = ChunkDecoder::new(params(128));
        let decoded = decode_all(&mut decoder, &mut wire);

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].chunk_stream_id, 6);
        assert_eq!(decoded[0].payload(), &b[..]);
        assert_eq!(decoded[0].stream_id, 1);
        assert_eq!(decoded[1].chunk_stream_id, 4);
        assert_eq!(decoded[1].payload(), &a[..]);
        assert_eq!(decoded[1].absolute_timestamp, 10);
    }

    #[test]
    fn compressed_header_resolves_against_previous() {
        let mut wire = BytesMut::new();
        let mut full = header(HeaderFormat::Full, 8);
        full.timestamp = 500;
        full.message_length = 4;
        full.message_type = MessageType::Audio;
        full.message_stream_id = 9;
        encode_header(&full, &mut wire).unwrap();
        wire.extend_from_slice(&[1, 2, 3, 4]);

        let mut next = header(HeaderFormat::SameLengthAndStream, 8);
        next.timestamp = 23;
        encode_header(&next, &mut wire).unwrap();
        wire.extend_from_slice(&[5, 6, 7, 8]);

        let mut decoder = ChunkDecoder::new(params(128));
        let decoded = decode_all(&mut decoder, &mut wire);

        assert_eq!(decoded.len(), 2);
        let second = &decoded[1];
        assert_eq!(second.stream_id, 9);
        assert_eq!(second.length, 4);
        assert_eq!(second.typ, MessageType::Audio);
        assert_eq!(second.timestamp, 23);
        assert_eq!(second.absolute_timestamp, 523);
        assert_eq!(second.payload(), &[5, 6, 7, 8]);
    }

    #[test]
    fn compressed_header_on_fresh_chunk_stream_is_a_framing_fault() {
        let mut wire = BytesMut::new();
        let mut h = header(HeaderFormat::SameStream, 5);
        h.message_length = 2;
        h.message_type = MessageType::Audio;
        encode_header(&h, &mut wire).unwrap();
        wire.extend_from_slice(&[0, 0]);

        let mut decoder = ChunkDecoder::new(params(128));
        let err = decoder.decode(&mut wire).unwrap_err();
        assert!(matches!(
            err,
            RtmpError::MissingPreviousHeader { chunk_stream_id: 5, format: HeaderFormat::SameStream }
        ));
    }

    #[test]
    fn chunk_size_change_applies_to_later_chunks_only() {
        let body = payload(300);
        let params = params(100);
        let mut decoder = ChunkDecoder::new(params.clone());

        let mut full = header(HeaderFormat::Full, 6);
        full.message_length = 300;
        full.message_type = MessageType::Video;

        let mut wire = BytesMut::new();
        encode_header(&full, &mut wire).unwrap();
        wire.extend_from_slice(&body[..100]);
        assert!(decoder.decode(&mut wire).unwrap().is_none());
        assert!(wire.is_empty());

        params.set_in_chunk_size(50);
        let mut offset = 100;
        let mut result = None;
        while offset < 300 {
            encode_header(&header(HeaderFormat::Continuation, 6), &mut wire).unwrap();
            wire.extend_from_slice(&body[offset..offset + 50]);
            offset += 50;
            result = decoder.decode(&mut wire).unwrap();
            assert!(wire.is_empty());
        }

        let message = result.expect("message completes on the last 50-byte chunk");
        assert_eq!(message.payload(), &body[..]);
    }

    #[test]
    fn chunk_size_message_resizes_chunks_buffered_behind_it() {
        let sender = params(128);
        let mut encoder = ChunkEncoder::new(sender.clone());
        let mut wire = BytesMut::new();
        encoder.encode(control::set_chunk_size(4096), &mut wire).unwrap();
        let audio = Message::new(8, MessageType::Audio, vec![0xAAu8; 3000]);
        encoder.encode(audio.clone(), &mut wire).unwrap();
        encoder.encode(control::set_chunk_size(1000), &mut wire).unwrap();
        let video = Message::new(6, MessageType::Video, payload(2500));
        encoder.encode(video.clone(), &mut wire).unwrap();

        let receiver = Arc::new(NegotiatedParams::default());
        let mut decoder = ChunkDecoder::new(receiver.clone());
        let decoded = decode_all(&mut decoder, &mut wire);

        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded[1], audio);
        assert_eq!(decoded[3], video);
        assert!(wire.is_empty());
        assert_eq!(receiver.in_chunk_size(), 1000);
    }

    #[test]
    fn zero_chunk_size_message_is_not_applied() {
        let receiver = Arc::new(NegotiatedParams::default());
        let mut decoder = ChunkDecoder::new(receiver.clone());
        let mut wire = BytesMut::new();
        ChunkEncoder::new(params(128))
            .encode(control::set_chunk_size(0), &mut wire)
            .unwrap();

        assert_eq!(decode_all(&mut decoder, &mut wire).len(), 1);
        assert_eq!(receiver.in_chunk_size(), 128);
    }

    #[test]
    fn split_reads_are_resumed() {
        let original = Message::new(3, MessageType::Amf0, payload(700)).with_timestamp(42);
        let mut wire = BytesMut::new();
        ChunkEncoder::new(params(128))
            .encode(original.clone(), &mut wire)
            .unwrap();

        let mut decoder = ChunkDecoder::new(params(128));
        let mut buf = BytesMut::new();
        let mut decoded = None;
        for byte in wire.iter() {
            buf.extend_from_slice(&[*byte]);
            if let Some(message) = decoder.decode(&mut buf).unwrap() {
                decoded = Some(message);
            }
        }
        assert_eq!(decoded, Some(original));
    }

    #[test]
    fn eof_mid_chunk_is_an_error() {
        let mut wire = BytesMut::new();
        ChunkEncoder::new(params(128))
            .encode(Message::new(3, MessageType::Amf0, payload(50)), &mut wire)
            .unwrap();
        wire.truncate(30);

        let mut decoder = ChunkDecoder::new(params(128));
        assert!(matches!(
            decoder.decode_eof(&mut wire),
            Err(RtmpError::UnexpectedEof)
        ));
    }

    #[test]
    fn abort_discards_partial_message() {
        let params = params(128);
        let mut encoder = ChunkEncoder::new(params.clone());
        let mut decoder = ChunkDecoder::new(params);

        let mut full = header(HeaderFormat::Full, 6);
        full.message_length = 500;
        full.message_type = MessageType::Video;
        let mut wire = BytesMut::new();
        encode_header(&full, &mut wire).unwrap();
        wire.extend_from_slice(&payload(128));
        encoder.encode(control::abort(6), &mut wire).unwrap();

        let decoded = decode_all(&mut decoder, &mut wire);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].typ, MessageType::Abort);
        assert!(!decoder.chunk_stream(6).unwrap().has_current_message());

        let replacement = Message::new(6, MessageType::Video, payload(20));
        encoder.encode(replacement.clone(), &mut wire).unwrap();
        assert_eq!(decode_all(&mut decoder, &mut wire), vec![replacement]);
    }

    #[test]
    fn inbound_bytes_are_counted() {
        let params = params(128);
        let mut wire = BytesMut::new();
        ChunkEncoder::new(params.clone())
            .encode(Message::new(3, MessageType::Amf0, payload(200)), &mut wire)
            .unwrap();
        let total = wire.len() as u32;

        let mut decoder = ChunkDecoder::new(params.clone());
        decode_all(&mut decoder, &mut wire);
        assert_eq!(params.in_bytes(), total);
    }
}
