use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::info;
use url::Url;

use crate::config::ClientConfig;
use crate::connection::{ClientHandler, Connection};
use crate::params::NegotiatedParams;
use crate::tcp::handshake::handshake;
use crate::types::{Message, RtmpError};

/// Port used when an `rtmp://` URL does not name one.
pub const DEFAULT_PORT: u16 = 1935;

/// TCP client for the RTMP chunk stream protocol
pub struct RtmpClient {
    peer: String,
    connection: Connection,
}

impl RtmpClient {
    /// Connect to `url` with the default configuration
    pub async fn connect<H: ClientHandler>(url: &str, handler: H) -> Result<Self, RtmpError> {
        Self::connect_with_config(url, handler, ClientConfig::default()).await
    }

    /// Dial the server named by `url`, run the handshake and start the pipeline
    pub async fn connect_with_config<H: ClientHandler>(
        url: &str,
        handler: H,
        config: ClientConfig,
    ) -> Result<Self, RtmpError> {
        config.validate()?;
        let addr = server_address(url)?;
        info!("connecting to {}", url);

        let mut socket = TcpStream::connect(&addr).await?;
        socket.set_nodelay(true)?;

        timeout(config.handshake_timeout(), handshake(&mut socket))
            .await
            .map_err(|_| RtmpError::HandshakeTimeout)??;

        let client = Self::from_stream(socket, addr, handler, &config)?;
        info!("connected to {}", url);
        Ok(client)
    }

    /// Start the pipeline on a stream that has already completed the
    /// handshake, such as a TLS stream set up by the caller
    pub fn from_stream<S, H>(
        stream: S,
        peer: impl Into<String>,
        handler: H,
        config: &ClientConfig,
    ) -> Result<Self, RtmpError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        H: ClientHandler,
    {
        Ok(Self {
            peer: peer.into(),
            connection: Connection::spawn(stream, handler, config)?,
        })
    }

    /// Address of the server this client talks to
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Queue a message for sending, waiting while the outbound queue is full
    pub async fn send(&self, message: Message) -> Result<(), RtmpError> {
        self.connection.send(message).await
    }

    /// Clone of the outbound queue
    pub fn sender(&self) -> mpsc::Sender<Message> {
        self.connection.sender()
    }

    /// Switch the outbound chunk size for subsequent messages
    pub async fn set_chunk_size(&self, size: u32) -> Result<(), RtmpError> {
        self.connection.set_chunk_size(size).await
    }

    pub fn params(&self) -> &Arc<NegotiatedParams> {
        self.connection.params()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn disconnect(&self) {
        info!("disconnecting from {}", self.peer);
        self.connection.disconnect();
    }

    /// Wait until the connection has closed
    pub async fn closed(&self) {
        self.connection.closed().await
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

/// Resolve the `host:port` to dial for an `rtmp://` URL.
fn server_address(url: &str) -> Result<String, RtmpError> {
    let url = Url::parse(url).map_err(|e| RtmpError::InvalidUrl(format!("{}: {}", url, e)))?;

    match url.scheme() {
        "rtmp" => {}
        other => return Err(RtmpError::UnsupportedScheme(other.to_string())),
    }

    let host = url
        .host_str()
        .ok_or_else(|| RtmpError::InvalidUrl(format!("{}: missing host", url)))?;
    let port = url.port().unwrap_or(DEFAULT_PORT);
    Ok(format!("{}:{}", host, port))
}
