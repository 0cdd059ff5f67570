//! WebSocket transport boundary
//!
//! The decoder needs only two things from a transport: "a message arrived"
//! and "the connection closed". [`WebSocketClient`] opens a connection and
//! hands back an inbound [`MessageStream`]; anything able to produce one can
//! drive the firehose.

use std::fmt;
use std::future::Future;

use bytes::Bytes;
use n0_future::Stream;
use n0_future::stream::Boxed;
use url::Url;

use crate::error::StreamError;

/// Inbound WebSocket message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    /// Text message
    Text(String),
    /// Binary message, one firehose frame
    Binary(Bytes),
    /// Close frame, with its code when the peer sent one
    Close(Option<u16>),
}

impl WsMessage {
    /// Check if this is a binary message
    pub fn is_binary(&self) -> bool {
        matches!(self, WsMessage::Binary(_))
    }

    /// Check if this is a close message
    pub fn is_close(&self) -> bool {
        matches!(self, WsMessage::Close(_))
    }
}

impl From<Bytes> for WsMessage {
    fn from(bytes: Bytes) -> Self {
        WsMessage::Binary(bytes)
    }
}

impl From<Vec<u8>> for WsMessage {
    fn from(vec: Vec<u8>) -> Self {
        WsMessage::Binary(Bytes::from(vec))
    }
}

impl From<&str> for WsMessage {
    fn from(s: &str) -> Self {
        WsMessage::Text(s.to_owned())
    }
}

/// Inbound message stream of an open connection
pub struct MessageStream(Boxed<Result<WsMessage, StreamError>>);

impl MessageStream {
    /// Create a new message stream
    #[cfg(not(target_arch = "wasm32"))]
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<WsMessage, StreamError>> + Send + 'static,
    {
        Self(Box::pin(stream))
    }

    /// Create a new message stream
    #[cfg(target_arch = "wasm32")]
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<WsMessage, StreamError>> + 'static,
    {
        Self(Box::pin(stream))
    }

    /// Convert into the inner pinned boxed stream
    pub fn into_inner(self) -> Boxed<Result<WsMessage, StreamError>> {
        self.0
    }
}

impl fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStream").finish_non_exhaustive()
    }
}

/// WebSocket client trait
#[cfg_attr(not(target_arch = "wasm32"), trait_variant::make(Send))]
pub trait WebSocketClient {
    /// Error type for connection failures
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to a WebSocket endpoint
    fn connect(&self, url: Url) -> impl Future<Output = Result<MessageStream, Self::Error>>;
}

/// WebSocket client backed by tokio-tungstenite-wasm
#[cfg(feature = "websocket")]
pub mod tungstenite_client {
    use super::*;
    use futures::StreamExt;

    /// WebSocket client backed by tokio-tungstenite-wasm
    #[derive(Debug, Clone, Default)]
    pub struct TungsteniteClient;

    impl TungsteniteClient {
        /// Create a new tungstenite WebSocket client
        pub fn new() -> Self {
            Self
        }
    }

    impl WebSocketClient for TungsteniteClient {
        type Error = tokio_tungstenite_wasm::Error;

        async fn connect(&self, url: Url) -> Result<MessageStream, Self::Error> {
            let ws_stream = tokio_tungstenite_wasm::connect(url.as_str()).await?;

            // The outbound half is dropped: the subscription never sends.
            let (_sink, stream) = ws_stream.split();
            let rx = stream.map(|result| match result {
                Ok(msg) => Ok(convert_message(msg)),
                Err(e) => Err(StreamError::transport(e)),
            });

            Ok(MessageStream::new(rx))
        }
    }

    fn convert_message(msg: tokio_tungstenite_wasm::Message) -> WsMessage {
        use tokio_tungstenite_wasm::Message;

        match msg {
            Message::Text(text) => WsMessage::Text(text.to_string()),
            Message::Binary(data) => WsMessage::Binary(Bytes::from(data)),
            Message::Close(frame) => WsMessage::Close(frame.map(|f| u16::from(f.code))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_kinds() {
        assert!(WsMessage::from(vec![1, 2, 3]).is_binary());
        assert!(!WsMessage::from("hello").is_binary());
        assert!(WsMessage::Close(Some(1000)).is_close());
    }
}
