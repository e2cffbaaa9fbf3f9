use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite};

use rtmp::tcp::{HANDSHAKE_SIZE, RTMP_VERSION};
use rtmp::{
    ChannelHandler, ChunkDecoder, ChunkEncoder, ClientConfig, ClientEvent, Message, MessageType,
    NegotiatedParams, RtmpClient, RtmpError, CHUNK_STREAM_ID_COMMAND,
};

const WAIT: Duration = Duration::from_secs(5);

async fn next_event(events: &mut UnboundedReceiver<ClientEvent>) -> ClientEvent {
    timeout(WAIT, events.recv()).await.unwrap().unwrap()
}

/// Server side of the plain handshake.
async fn accept_handshake(socket: &mut TcpStream) {
    let mut c0c1 = vec![0u8; 1 + HANDSHAKE_SIZE];
    socket.read_exact(&mut c0c1).await.unwrap();
    assert_eq!(c0c1[0], RTMP_VERSION);

    let s1 = vec![7u8; HANDSHAKE_SIZE];
    socket.write_all(&[RTMP_VERSION]).await.unwrap();
    socket.write_all(&s1).await.unwrap();

    let mut c2 = vec![0u8; HANDSHAKE_SIZE];
    socket.read_exact(&mut c2).await.unwrap();
    assert_eq!(c2, s1);
    socket.write_all(&c0c1[1..]).await.unwrap();
}

#[tokio::test]
async fn connects_and_exchanges_messages() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        accept_handshake(&mut socket).await;

        let params = Arc::new(NegotiatedParams::default());
        let (reader, writer) = socket.into_split();
        let mut frames_in = FramedRead::new(reader, ChunkDecoder::new(params.clone()));
        let mut frames_out = FramedWrite::new(writer, ChunkEncoder::new(params));

        let connect = frames_in.next().await.unwrap().unwrap();
        assert_eq!(connect.chunk_stream_id, CHUNK_STREAM_ID_COMMAND);
        assert_eq!(connect.payload(), b"connect");

        frames_out
            .send(Message::new(CHUNK_STREAM_ID_COMMAND, MessageType::Amf0, b"_result"))
            .await
            .unwrap();
        frames_out
            .send(Message::new(6, MessageType::Video, vec![1u8; 400]).with_stream_id(1))
            .await
            .unwrap();

        // Hold the socket until the client hangs up.
        while frames_in.next().await.is_some() {}
    });

    let (handler, mut events) = ChannelHandler::channel();
    let url = format!("rtmp://127.0.0.1:{}/live", port);
    let client = RtmpClient::connect(&url, handler).await.unwrap();
    assert_eq!(client.peer(), format!("127.0.0.1:{}", port));

    client
        .send(Message::new(CHUNK_STREAM_ID_COMMAND, MessageType::Amf0, b"connect"))
        .await
        .unwrap();

    assert_eq!(next_event(&mut events).await, ClientEvent::Connected);
    assert!(matches!(next_event(&mut events).await, ClientEvent::Command(_)));
    match next_event(&mut events).await {
        ClientEvent::Message(message) => {
            assert_eq!(message.typ, MessageType::Video);
            assert_eq!(message.payload(), &[1u8; 400][..]);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(client.is_connected());

    client.disconnect();
    assert_eq!(next_event(&mut events).await, ClientEvent::Disconnected);
    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn handshake_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // Accept, then never answer.
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        drop(socket);
    });

    let (handler, _events) = ChannelHandler::channel();
    let config = ClientConfig::default().with_handshake_timeout(Duration::from_secs(1));
    let url = format!("rtmp://127.0.0.1:{}/live", port);
    let result = RtmpClient::connect_with_config(&url, handler, config).await;
    assert!(matches!(result, Err(RtmpError::HandshakeTimeout)));
    server.abort();
}

#[tokio::test]
async fn rejects_bad_urls() {
    let (handler, _events) = ChannelHandler::channel();
    assert!(matches!(
        RtmpClient::connect("rtmps://media.example.com/live", handler).await,
        Err(RtmpError::UnsupportedScheme(_))
    ));

    let (handler, _events) = ChannelHandler::channel();
    assert!(matches!(
        RtmpClient::connect("::not a url::", handler).await,
        Err(RtmpError::InvalidUrl(_))
    ));
}
