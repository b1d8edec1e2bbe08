//! Message transport for the push channel
//!
//! The driver only sees a text sink and a text stream; `WsConnector` backs
//! them with a WebSocket client.

use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::Message;

/// Outbound half of an open channel
pub type MessageSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;

/// Inbound half of an open channel; ends when the peer closes
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Opens channel connections
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<(MessageSink, MessageStream)>;
}

/// WebSocket transport
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<(MessageSink, MessageStream)> {
        let (socket, response) = tokio_tungstenite::connect_async(url).await?;
        tracing::debug!(url = %url, status = %response.status(), "WebSocket handshake complete");

        let (sink, stream) = socket.split();

        let sink = sink
            .sink_map_err(Error::from)
            .with(|text: String| future::ready(Ok::<_, Error>(Message::Text(text))));

        let stream = stream.filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Ok(_) => None,
                Err(e) => Some(Err(Error::from(e))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
