//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{RtmpError, DEFAULT_CHUNK_SIZE, DEFAULT_WINDOW_SIZE, MESSAGE_QUEUE_CAPACITY};

/// Configuration for an RTMP client connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Initial outbound chunk size
    pub chunk_size: u32,
    /// Initial acknowledgement window, both directions
    pub window_size: u32,
    /// Capacity of the application-facing outbound queue
    pub outbound_capacity: usize,
    /// Capacity of the queue between the receive and dispatch loops
    pub dispatch_capacity: usize,
    /// Whether to acknowledge every received window of bytes
    pub send_acknowledgements: bool,
    /// Handshake timeout in seconds
    pub handshake_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            window_size: DEFAULT_WINDOW_SIZE,
            outbound_capacity: MESSAGE_QUEUE_CAPACITY,
            dispatch_capacity: MESSAGE_QUEUE_CAPACITY,
            send_acknowledgements: true,
            handshake_timeout_secs: 10,
        }
    }
}

impl ClientConfig {
    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, RtmpError> {
        let config: ClientConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_window_size(mut self, window_size: u32) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    pub fn with_dispatch_capacity(mut self, capacity: usize) -> Self {
        self.dispatch_capacity = capacity;
        self
    }

    pub fn with_acknowledgements(mut self, enabled: bool) -> Self {
        self.send_acknowledgements = enabled;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_secs = timeout.as_secs();
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), RtmpError> {
        if self.chunk_size == 0 {
            return Err(RtmpError::InvalidChunkSize(self.chunk_size));
        }
        if self.outbound_capacity == 0 {
            return Err(RtmpError::InvalidQueueCapacity(self.outbound_capacity));
        }
        if self.dispatch_capacity == 0 {
            return Err(RtmpError::InvalidQueueCapacity(self.dispatch_capacity));
        }
        Ok(())
    }
}
