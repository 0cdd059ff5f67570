//! AT Protocol firehose decoding
//!
//! Turns `com.atproto.sync.subscribeRepos` frames into [`FirehoseRecord`]s:
//!
//! - **Frames**: header and body decoding, with commit ops resolved against the
//!   blocks embedded in the commit
//! - **Stream**: a pull-based [`FirehoseStream`] yielding one batch per message
//! - **Transport**: a [`WebSocketClient`] trait, with a tokio-tungstenite-wasm
//!   client behind the `websocket` feature
//!
//! Decode problems never end the stream. A malformed frame becomes one error
//! record; an op that cannot be resolved becomes an error record alongside the
//! other ops of its commit. Only a transport failure ends the stream with an
//! error.
//!
//! # Example
//!
//! ```rust,ignore
//! use cirrus_firehose::{FirehoseConfig, subscribe};
//! use n0_future::StreamExt;
//!
//! let mut stream = subscribe(&FirehoseConfig::default()).await?;
//! while let Some(batch) = stream.next().await {
//!     for record in batch? {
//!         println!("{} {:?}", record.record_type(), record.action());
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
/// Single-frame decoding
pub mod frame;
pub mod stream;
pub mod websocket;

pub use cirrus_repo::{FirehoseRecord, ParseBatch};
pub use config::{DEFAULT_RELAY, FirehoseConfig};
pub use error::{FrameError, StreamError, StreamErrorKind};
pub use frame::{FrameDecoder, FrameHeader};
pub use stream::{FirehoseStream, subscribe_repos};
pub use websocket::{MessageStream, WebSocketClient, WsMessage};

#[cfg(feature = "websocket")]
pub use stream::subscribe;
#[cfg(feature = "websocket")]
pub use websocket::tungstenite_client::TungsteniteClient;
