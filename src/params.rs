//! Connection-level negotiated parameters.
//!
//! Shared by the receive, dispatch and send loops. Each field has a single
//! writer: the inbound chunk size by the decoder, the window size and peer
//! bandwidth by the protocol control handler, the outbound chunk size by the
//! encoder, and each byte counter by the loop that moves those bytes.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::config::ClientConfig;
use crate::types::{DEFAULT_CHUNK_SIZE, DEFAULT_WINDOW_SIZE};

#[derive(Debug)]
pub struct NegotiatedParams {
    in_chunk_size: AtomicU32,
    out_chunk_size: AtomicU32,
    in_window_size: AtomicU32,
    out_window_size: AtomicU32,
    peer_bandwidth_limit: AtomicU8,
    in_bytes: AtomicU32,
    out_bytes: AtomicU32,
    last_ack_sent: AtomicU32,
    last_ack_received: AtomicU32,
}

impl Default for NegotiatedParams {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_WINDOW_SIZE)
    }
}

impl NegotiatedParams {
    pub fn new(chunk_size: u32, window_size: u32) -> Self {
        Self {
            in_chunk_size: AtomicU32::new(DEFAULT_CHUNK_SIZE),
            out_chunk_size: AtomicU32::new(chunk_size),
            in_window_size: AtomicU32::new(window_size),
            out_window_size: AtomicU32::new(window_size),
            peer_bandwidth_limit: AtomicU8::new(0),
            in_bytes: AtomicU32::new(0),
            out_bytes: AtomicU32::new(0),
            last_ack_sent: AtomicU32::new(0),
            last_ack_received: AtomicU32::new(0),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.chunk_size, config.window_size)
    }

    /// Largest payload slice the peer puts in one chunk.
    pub fn in_chunk_size(&self) -> u32 {
        self.in_chunk_size.load(Ordering::Acquire)
    }

    pub fn set_in_chunk_size(&self, size: u32) {
        self.in_chunk_size.store(size, Ordering::Release);
    }

    /// Largest payload slice we put in one chunk.
    pub fn out_chunk_size(&self) -> u32 {
        self.out_chunk_size.load(Ordering::Acquire)
    }

    pub fn set_out_chunk_size(&self, size: u32) {
        self.out_chunk_size.store(size, Ordering::Release);
    }

    /// Bytes we may receive before an acknowledgement is owed to the peer.
    pub fn in_window_size(&self) -> u32 {
        self.in_window_size.load(Ordering::Acquire)
    }

    pub fn set_in_window_size(&self, size: u32) {
        self.in_window_size.store(size, Ordering::Release);
    }

    /// Bandwidth the peer announced for our direction.
    pub fn out_window_size(&self) -> u32 {
        self.out_window_size.load(Ordering::Acquire)
    }

    pub fn peer_bandwidth_limit(&self) -> u8 {
        self.peer_bandwidth_limit.load(Ordering::Acquire)
    }

    pub fn set_peer_bandwidth(&self, size: u32, limit: u8) {
        self.out_window_size.store(size, Ordering::Release);
        self.peer_bandwidth_limit.store(limit, Ordering::Release);
    }

    /// Total bytes read, wrapping at `u32::MAX` like the acknowledgement sequence.
    pub fn in_bytes(&self) -> u32 {
        self.in_bytes.load(Ordering::Acquire)
    }

    pub fn record_inbound(&self, n: usize) {
        self.in_bytes.fetch_add(n as u32, Ordering::AcqRel);
    }

    pub fn out_bytes(&self) -> u32 {
        self.out_bytes.load(Ordering::Acquire)
    }

    pub fn record_outbound(&self, n: usize) {
        self.out_bytes.fetch_add(n as u32, Ordering::AcqRel);
    }

    /// Sequence number from the peer's most recent acknowledgement.
    pub fn last_ack_received(&self) -> u32 {
        self.last_ack_received.load(Ordering::Acquire)
    }

    pub fn set_last_ack_received(&self, sequence: u32) {
        self.last_ack_received.store(sequence, Ordering::Release);
    }

    /// If a full window has been received since the last acknowledgement,
    /// mark it acknowledged and return the sequence number to send.
    pub fn acknowledgement_due(&self) -> Option<u32> {
        let window = self.in_window_size();
        if window == 0 {
            return None;
        }

        let total = self.in_bytes();
        let last = self.last_ack_sent.load(Ordering::Acquire);
        if total.wrapping_sub(last) >= window {
            self.last_ack_sent.store(total, Ordering::Release);
            Some(total)
        } else {
            None
        }
    }
}
