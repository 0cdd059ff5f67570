//! Error types for repository decoding

use std::error::Error;
use std::fmt;

use cirrus_codec::DecodeError;

/// Boxed error type for error sources
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Result type alias for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

/// Repository decode error with rich diagnostics
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub struct RepoError {
    kind: RepoErrorKind,
    #[source]
    source: Option<BoxError>,
    #[help]
    help: Option<String>,
    context: Option<String>,
}

/// Error categories for repository decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoErrorKind {
    /// Structural failure in varint, CID or CBOR data
    Decode,
    /// CAR container is malformed
    Car,
    /// MST node or entry is malformed
    InvalidMst,
    /// I/O error
    Io,
}

impl RepoError {
    /// Create a new error with the given kind and optional source
    pub fn new(kind: RepoErrorKind, source: Option<BoxError>) -> Self {
        Self {
            kind,
            source,
            help: None,
            context: None,
        }
    }

    /// Add a help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Add context information to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> &RepoErrorKind {
        &self.kind
    }

    /// The underlying decode error, if this wraps one
    pub fn decode_error(&self) -> Option<&DecodeError> {
        self.source.as_deref()?.downcast_ref()
    }

    /// Create a decode error
    pub fn decode(source: DecodeError) -> Self {
        Self::new(RepoErrorKind::Decode, Some(Box::new(source)))
    }

    /// Create a CAR error from a structural decode failure
    pub fn car(source: DecodeError) -> Self {
        Self::new(RepoErrorKind::Car, Some(Box::new(source)))
    }

    /// Create an I/O error
    pub fn io(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Io, Some(Box::new(source)))
    }
}

impl fmt::Display for RepoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;

        if let Some(ctx) = &self.context {
            write!(f, ": {}", ctx)?;
        }

        if let Some(src) = &self.source {
            write!(f, ": {}", src)?;
        }

        Ok(())
    }
}

impl From<DecodeError> for RepoError {
    fn from(e: DecodeError) -> Self {
        RepoError::decode(e)
    }
}

// Internal granular errors

/// MST key reconstruction errors
#[derive(Debug, Clone, PartialEq, thiserror::Error, miette::Diagnostic)]
pub enum MstError {
    /// Key suffix is not valid UTF-8
    #[error("Key suffix of entry {index} is not valid UTF-8")]
    InvalidSuffix {
        /// Entry index within the node
        index: usize,
    },

    /// Shared prefix longer than the previous key
    #[error("Entry {index} shares {prefix} bytes with a key of {len} bytes")]
    PrefixOutOfRange {
        /// Entry index within the node
        index: usize,
        /// Declared shared prefix length
        prefix: usize,
        /// Length of the previous key
        len: usize,
    },

    /// Entry missing a field or carrying the wrong type
    #[error("Entry {index} is malformed: {reason}")]
    BadEntry {
        /// Entry index within the node
        index: usize,
        /// What was wrong with it
        reason: &'static str,
    },
}

impl From<MstError> for RepoError {
    fn from(e: MstError) -> Self {
        RepoError::new(RepoErrorKind::InvalidMst, Some(Box::new(e)))
            .with_help("MST nodes are maps with an entry array `e` of {p, k, v, t}")
    }
}
