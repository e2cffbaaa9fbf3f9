use std::error::Error;
use std::time::Duration;
use tracing::info;
use rtmp::{ChannelHandler, ClientEvent, Message, MessageType, RtmpClient, CHUNK_STREAM_ID_COMMAND};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "rtmp://127.0.0.1:1935/live".to_string());
    info!("Connecting to {}...", url);

    let (handler, mut events) = ChannelHandler::channel();
    let client = RtmpClient::connect(&url, handler).await?;

    // Larger chunks for everything we send from here on
    client.set_chunk_size(4096).await?;

    // The command payload is opaque to the transport; a real client would
    // AMF0-encode a `connect` invocation here.
    info!("Sending command...");
    client
        .send(Message::new(CHUNK_STREAM_ID_COMMAND, MessageType::Amf0, b"connect"))
        .await?;

    // Print whatever the server sends for a few seconds
    let deadline = tokio::time::sleep(Duration::from_secs(5));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Some(ClientEvent::Connected) => info!("Server answered on the command stream"),
                Some(ClientEvent::Command(message)) => {
                    info!("Command: {:?}, {} bytes", message.typ, message.length)
                }
                Some(ClientEvent::Message(message)) => info!(
                    "Message: {:?} on chunk stream {}, {} bytes at {}ms",
                    message.typ, message.chunk_stream_id, message.length, message.absolute_timestamp
                ),
                Some(ClientEvent::Disconnected) | None => {
                    info!("Server closed the connection");
                    return Ok(());
                }
            },
        }
    }

    info!("Closing connection...");
    client.disconnect();
    client.closed().await;

    info!("Client example completed successfully!");
    Ok(())
}
