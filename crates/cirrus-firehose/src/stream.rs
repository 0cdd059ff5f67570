//! Pull-based batch stream over a message transport

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::Utc;
use cirrus_repo::ParseBatch;
use n0_future::Stream;
use n0_future::stream::Boxed;
use n0_future::time::{Duration, Instant};

use crate::config::FirehoseConfig;
use crate::error::StreamError;
use crate::frame::FrameDecoder;
use crate::websocket::{MessageStream, WebSocketClient, WsMessage};

/// Decoded firehose, one [`ParseBatch`] per inbound message
///
/// A message is read from the transport only when the consumer polls, so at
/// most one decoded batch is ever pending. The stream ends when the
/// connection closes, and fails once and ends on a transport error.
pub struct FirehoseStream {
    messages: Boxed<Result<WsMessage, StreamError>>,
    decoder: FrameDecoder,
    total_parse_time: Duration,
    done: bool,
}

impl FirehoseStream {
    /// Decode the messages of an open connection.
    pub fn new(messages: MessageStream, decoder: FrameDecoder) -> Self {
        Self {
            messages: messages.into_inner(),
            decoder,
            total_parse_time: Duration::ZERO,
            done: false,
        }
    }

    /// Decode time of every batch so far
    pub fn total_parse_time(&self) -> Duration {
        self.total_parse_time
    }

    fn decode(&mut self, message: WsMessage) -> Option<ParseBatch> {
        let received = Utc::now();
        let started = Instant::now();
        let records = match message {
            WsMessage::Binary(frame) => self.decoder.decode_frame(&frame, received),
            WsMessage::Text(text) => vec![self.decoder.text_message(&text, received)],
            WsMessage::Close(_) => return None,
        };
        let parse_time = started.elapsed();
        self.total_parse_time += parse_time;
        Some(ParseBatch {
            records,
            parse_time,
            total_parse_time: self.total_parse_time,
        })
    }
}

impl Stream for FirehoseStream {
    type Item = Result<ParseBatch, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.messages.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %e, "firehose transport failed");
                self.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(Some(Ok(message))) => match self.decode(message) {
                Some(batch) => Poll::Ready(Some(Ok(batch))),
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::info!("firehose connection closed");
                    self.done = true;
                    Poll::Ready(None)
                }
            },
        }
    }
}

impl fmt::Debug for FirehoseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirehoseStream")
            .field("total_parse_time", &self.total_parse_time)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

/// Connect with `client` and decode the repository event stream.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(relay = %config.relay, cursor = ?config.cursor)))]
pub async fn subscribe_repos<C>(
    client: &C,
    config: &FirehoseConfig,
) -> Result<FirehoseStream, StreamError>
where
    C: WebSocketClient,
{
    let url = config.subscription_url()?;
    let messages = client
        .connect(url)
        .await
        .map_err(StreamError::transport)?;
    Ok(FirehoseStream::new(
        messages,
        FrameDecoder::new(config.decode_options.clone()),
    ))
}

/// Connect to the configured relay over tokio-tungstenite-wasm.
#[cfg(feature = "websocket")]
pub async fn subscribe(config: &FirehoseConfig) -> Result<FirehoseStream, StreamError> {
    subscribe_repos(&crate::websocket::tungstenite_client::TungsteniteClient::new(), config).await
}
