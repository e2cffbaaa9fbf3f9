//! Plain (unsigned) RTMP handshake, client side.
//!
//! ```text
//! client                         server
//!   C0 (version) + C1 (1536B)  ->
//!                              <-  S0 (version) + S1 (1536B)
//!   C2 (echo of S1)            ->
//!                              <-  S2 (echo of C1)
//! ```
//!
//! C1/S1 layout: time (4B BE), zero (4B), random (1528B).

use byteorder::{BigEndian, ByteOrder};
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::types::RtmpError;

pub const RTMP_VERSION: u8 = 3;
pub const HANDSHAKE_SIZE: usize = 1536;

/// Run the client half of the handshake on a freshly opened stream.
pub async fn handshake<S>(stream: &mut S) -> Result<(), RtmpError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut c0c1 = vec![0u8; 1 + HANDSHAKE_SIZE];
    c0c1[0] = RTMP_VERSION;
    BigEndian::write_u32(&mut c0c1[1..5], 0);
    rand::thread_rng().fill_bytes(&mut c0c1[9..]);

    stream.write_all(&c0c1).await?;
    stream.flush().await?;
    debug!("sent C0+C1");

    let mut s0 = [0u8; 1];
    stream.read_exact(&mut s0).await?;
    if s0[0] != RTMP_VERSION {
        return Err(RtmpError::Handshake(format!(
            "unsupported server version {}",
            s0[0]
        )));
    }

    let mut s1 = vec![0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut s1).await?;
    debug!("received S0+S1, server time {}", BigEndian::read_u32(&s1[0..4]));

    stream.write_all(&s1).await?;
    stream.flush().await?;
    debug!("sent C2");

    let mut s2 = vec![0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut s2).await?;
    if s2[8..] != c0c1[9..] {
        warn!("server S2 does not echo C1");
    }
    debug!("received S2");

    Ok(())
}
