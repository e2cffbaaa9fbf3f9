//! The connection pipeline.
//!
//! Three tasks share one byte-stream connection:
//!
//! * **receive** owns the read half and the [`ChunkDecoder`], and pushes each
//!   completed message onto the bounded dispatch queue. Chunk size and abort
//!   messages are applied by the decoder itself, ahead of the chunks that
//!   follow them
//! * **dispatch** routes completed messages by chunk stream: protocol control
//!   to [`ProtocolControl`], commands to connection-state handling, the rest
//!   to the application's [`ClientHandler`]
//! * **send** owns the write half and the [`ChunkEncoder`], and frames the
//!   messages the application pushes onto the bounded outbound queue
//!
//! A full queue blocks its producer; nothing is dropped. The first loop to hit
//! a transport failure closes the connection, which cancels the other two.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::{validate_outbound, ChunkDecoder, ChunkEncoder};
use crate::config::ClientConfig;
use crate::control::{self, ControlEvent, ProtocolControl, USER_CONTROL_PING_REQUEST};
use crate::params::NegotiatedParams;
use crate::types::{
    Message, MessageType, RtmpError, CHUNK_STREAM_ID_COMMAND, CHUNK_STREAM_ID_PROTOCOL,
    CHUNK_STREAM_ID_USER_CONTROL,
};

/// Application callbacks. Invoked from the dispatch task, except
/// `on_disconnect`, which runs on whichever task closed the connection.
pub trait ClientHandler: Send + Sync + 'static {
    /// The peer answered on the command chunk stream.
    fn on_connect(&self) {}

    /// The connection closed. Called exactly once.
    fn on_disconnect(&self) {}

    /// A complete message arrived on an application chunk stream.
    fn on_receive(&self, message: Message);

    /// A complete message arrived on the command chunk stream.
    fn on_command(&self, _message: &Message) {}
}

/// Notification forwarded by [`ChannelHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    Command(Message),
    Message(Message),
}

/// A [`ClientHandler`] that turns every callback into a [`ClientEvent`].
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelHandler {
    /// A handler and the receiver its events arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events }, rx)
    }
}

impl ClientHandler for ChannelHandler {
    fn on_connect(&self) {
        let _ = self.events.send(ClientEvent::Connected);
    }

    fn on_disconnect(&self) {
        let _ = self.events.send(ClientEvent::Disconnected);
    }

    fn on_receive(&self, message: Message) {
        let _ = self.events.send(ClientEvent::Message(message));
    }

    fn on_command(&self, message: &Message) {
        let _ = self.events.send(ClientEvent::Command(message.clone()));
    }
}

/// Connected/closed flags and the shutdown signal shared by the loops.
struct ConnectionState {
    connected: AtomicBool,
    closed: AtomicBool,
    shutdown: CancellationToken,
    handler: Arc<dyn ClientHandler>,
}

impl ConnectionState {
    fn new(handler: Arc<dyn ClientHandler>) -> Self {
        Self {
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            handler,
        }
    }

    fn mark_connected(&self) {
        if self.is_closed() || self.connected.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("connection established");
        self.handler.on_connect();
    }

    /// Close the connection. Only the first caller does anything; returns
    /// whether this call was it.
    fn disconnect(&self, reason: &str) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.connected.store(false, Ordering::Release);
        self.shutdown.cancel();
        info!("disconnected: {}", reason);
        self.handler.on_disconnect();
        true
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Push onto a bounded queue, waiting for room. Returns false if the
    /// connection closed or the queue's consumer is gone.
    async fn enqueue(&self, queue: &mpsc::Sender<Message>, message: Message) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            sent = queue.send(message) => sent.is_ok(),
        }
    }
}

/// Handle to a running pipeline. Dropping it closes the connection.
pub struct Connection {
    outbound: mpsc::Sender<Message>,
    state: Arc<ConnectionState>,
    params: Arc<NegotiatedParams>,
}

impl Connection {
    /// Start the receive, dispatch and send tasks on an established stream.
    pub fn spawn<S, H>(stream: S, handler: H, config: &ClientConfig) -> Result<Self, RtmpError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        H: ClientHandler,
    {
        config.validate()?;

        let params = Arc::new(NegotiatedParams::from_config(config));
        let state = Arc::new(ConnectionState::new(Arc::new(handler)));
        let (reader, writer) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_capacity);

        let frames = FramedRead::new(reader, ChunkDecoder::new(params.clone()));
        let acks = config.send_acknowledgements.then(|| outbound_tx.clone());
        tokio::spawn(receive_loop(
            frames,
            dispatch_tx,
            acks,
            params.clone(),
            state.clone(),
        ));

        tokio::spawn(dispatch_loop(
            dispatch_rx,
            ProtocolControl::new(params.clone()),
            outbound_tx.clone(),
            state.clone(),
        ));

        let frames = FramedWrite::new(writer, ChunkEncoder::new(params.clone()));
        tokio::spawn(send_loop(frames, outbound_rx, state.clone()));

        Ok(Self {
            outbound: outbound_tx,
            state,
            params,
        })
    }

    /// Queue a message for sending, waiting while the outbound queue is full.
    pub async fn send(&self, message: Message) -> Result<(), RtmpError> {
        validate_outbound(&message)?;
        if self.state.is_closed() {
            return Err(RtmpError::ConnectionClosed);
        }
        if self.state.enqueue(&self.outbound, message).await {
            Ok(())
        } else {
            Err(RtmpError::ConnectionClosed)
        }
    }

    /// Raw access to the outbound queue. Messages pushed here are validated
    /// only by the encoder; invalid ones are logged and skipped.
    pub fn sender(&self) -> mpsc::Sender<Message> {
        self.outbound.clone()
    }

    /// Announce a new outbound chunk size. It takes effect for the messages
    /// queued after this one.
    pub async fn set_chunk_size(&self, size: u32) -> Result<(), RtmpError> {
        if size == 0 {
            return Err(RtmpError::InvalidChunkSize(size));
        }
        self.send(control::set_chunk_size(size)).await
    }

    pub fn params(&self) -> &Arc<NegotiatedParams> {
        &self.params
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    pub fn disconnect(&self) {
        self.state.disconnect("closed locally");
    }

    /// Wait until the connection has closed.
    pub async fn closed(&self) {
        self.state.shutdown.cancelled().await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.state.disconnect("connection handle dropped");
    }
}

async fn receive_loop<R>(
    mut frames: FramedRead<R, ChunkDecoder>,
    dispatch: mpsc::Sender<Message>,
    acks: Option<mpsc::Sender<Message>>,
    params: Arc<NegotiatedParams>,
    state: Arc<ConnectionState>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = state.shutdown.cancelled() => return,
            next = frames.next() => next,
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                if state.disconnect("receive failed") {
                    warn!("unable to receive next message: {}", e);
                }
                return;
            }
            None => {
                state.disconnect("peer closed the connection");
                return;
            }
        };

        trace!(
            "received {:?} message of {} bytes on chunk stream {}",
            message.typ,
            message.length,
            message.chunk_stream_id
        );

        if let Some(acks) = &acks {
            if let Some(sequence) = params.acknowledgement_due() {
                debug!("acknowledging {} bytes", sequence);
                if !state.enqueue(acks, control::acknowledgement(sequence)).await {
                    return;
                }
            }
        }

        if !state.enqueue(&dispatch, message).await {
            return;
        }
    }
}

async fn dispatch_loop(
    mut inbound: mpsc::Receiver<Message>,
    control: ProtocolControl,
    outbound: mpsc::Sender<Message>,
    state: Arc<ConnectionState>,
) {
    loop {
        let message = tokio::select! {
            _ = state.shutdown.cancelled() => return,
            message = inbound.recv() => match message {
                Some(message) => message,
                None => return,
            },
        };

        match message.chunk_stream_id {
            CHUNK_STREAM_ID_PROTOCOL => handle_control(&control, &message, &outbound, &state).await,
            CHUNK_STREAM_ID_USER_CONTROL if message.typ == MessageType::Ping => {
                handle_control(&control, &message, &outbound, &state).await
            }
            CHUNK_STREAM_ID_COMMAND => {
                debug!("command message: {:?} ({} bytes)", message.typ, message.length);
                state.mark_connected();
                state.handler.on_command(&message);
            }
            _ => state.handler.on_receive(message),
        }
    }
}

async fn handle_control(
    control: &ProtocolControl,
    message: &Message,
    outbound: &mpsc::Sender<Message>,
    state: &ConnectionState,
) {
    match control.handle(message) {
        Ok(ControlEvent::UserControl {
            event: USER_CONTROL_PING_REQUEST,
            data,
        }) => {
            debug!("answering ping {}", data);
            state.enqueue(outbound, control::ping_response(data)).await;
        }
        Ok(_) => {}
        Err(e) => warn!("ignoring malformed control message: {}", e),
    }
}

async fn send_loop<W>(
    mut frames: FramedWrite<W, ChunkEncoder>,
    mut outbound: mpsc::Receiver<Message>,
    state: Arc<ConnectionState>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let typ = message.typ;
        let chunk_stream_id = message.chunk_stream_id;
        let result = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            result = frames.send(message) => result,
        };

        match result {
            Ok(()) => trace!(
                "finished sending {:?} message on chunk stream {}",
                typ,
                chunk_stream_id
            ),
            Err(RtmpError::Io(e)) => {
                if state.disconnect("send failed") {
                    warn!("unable to send message: {}", e);
                }
                break;
            }
            Err(e) => warn!("dropping unsendable message: {}", e),
        }
    }

    let _ = frames.get_mut().shutdown().await;
}
