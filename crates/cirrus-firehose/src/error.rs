//! Error types for the firehose stream

use std::error::Error;
use std::fmt;

use cirrus_codec::DecodeError;
use cirrus_repo::RepoError;

/// Boxed error type for error sources
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Terminal failure of a firehose stream
///
/// Problems inside a frame never surface here; they become error records.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub struct StreamError {
    kind: StreamErrorKind,
    #[source]
    source: Option<BoxError>,
    #[help]
    help: Option<String>,
}

/// Categories of stream errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// Network or I/O error
    Transport,
    /// Protocol violation or misconfiguration
    Protocol,
}

impl StreamError {
    /// Create a new stream error
    pub fn new(kind: StreamErrorKind, source: Option<BoxError>) -> Self {
        Self {
            kind,
            source,
            help: None,
        }
    }

    /// Add a help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> &StreamErrorKind {
        &self.kind
    }

    /// Create a transport error with source
    pub fn transport(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(StreamErrorKind::Transport, Some(Box::new(source)))
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::new(StreamErrorKind::Protocol, Some(msg.into().into()))
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            StreamErrorKind::Transport => write!(f, "Transport error"),
            StreamErrorKind::Protocol => write!(f, "Protocol error"),
        }?;

        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }

        Ok(())
    }
}

/// Why a whole frame could not be decoded
///
/// The message of this error becomes the frame's error record.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum FrameError {
    /// Header or body is not valid CBOR
    #[error(transparent)]
    #[diagnostic(code(cirrus::frame::decode))]
    Decode(#[from] DecodeError),

    /// The embedded block CAR is malformed
    #[error(transparent)]
    #[diagnostic(code(cirrus::frame::car))]
    Car(#[from] RepoError),

    /// Bytes left after the body
    #[error("Excess bytes in message.")]
    #[diagnostic(code(cirrus::frame::excess_bytes))]
    ExcessBytes {
        /// Number of unread bytes
        remaining: usize,
    },

    /// Header or body lacks a required field
    #[error("Malformed {frame} frame: {reason}")]
    #[diagnostic(code(cirrus::frame::malformed))]
    Malformed {
        /// Frame type, or `header`
        frame: &'static str,
        /// What was missing
        reason: &'static str,
    },
}
