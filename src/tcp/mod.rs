//! TCP transport: dialing, handshake and the client facade.

pub mod client;
pub mod handshake;

pub use client::{RtmpClient, DEFAULT_PORT};
pub use handshake::{handshake, HANDSHAKE_SIZE, RTMP_VERSION};
