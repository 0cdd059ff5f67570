//! Structural decode errors
//!
//! Every decoder in this crate fails synchronously with a [`DecodeError`]
//! describing the first structural problem it found. Offsets are byte
//! positions in the buffer handed to the failing call.

use smol_str::SmolStr;

/// Result type alias for decode operations
pub type Result<T> = std::result::Result<T, DecodeError>;

/// Structural decode failure
#[derive(Debug, Clone, PartialEq, thiserror::Error, miette::Diagnostic)]
pub enum DecodeError {
    /// Input ended before the item being read was complete
    #[error("unexpected end of data reading {what} at offset {offset}")]
    #[diagnostic(code(cirrus::decode::truncated))]
    Truncated {
        /// What was being read
        what: &'static str,
        /// Offset the read started at
        offset: usize,
    },

    /// Varint longer than the 10 bytes a u64 can need
    #[error("varint at offset {offset} is overlong or overflows 64 bits")]
    #[diagnostic(code(cirrus::decode::overlong))]
    Overlong {
        /// Offset of the first varint byte
        offset: usize,
    },

    /// Character outside the multibase alphabet
    #[error("invalid character {character:?} at position {position}")]
    #[diagnostic(code(cirrus::decode::invalid_character))]
    InvalidCharacter {
        /// The offending character
        character: char,
        /// Character index in the input
        position: usize,
    },

    /// Leftover bits after the last full byte are not zero padding
    #[error("malformed padding or trailing bits")]
    #[diagnostic(code(cirrus::decode::bad_padding))]
    BadPadding,

    /// Multibase prefix this crate has no alphabet for
    #[error("unknown multibase prefix {prefix:?}")]
    #[diagnostic(code(cirrus::decode::unknown_multibase))]
    UnknownMultibase {
        /// The prefix character
        prefix: char,
    },

    /// CID or CAR version other than the supported ones
    #[error("unsupported version {version}")]
    #[diagnostic(
        code(cirrus::decode::unsupported_version),
        help("CIDs must be version 0 or 1, CAR files version 1 or 2")
    )]
    UnsupportedVersion {
        /// The declared version
        version: u64,
    },

    /// Declared length disagrees with the bytes available
    #[error("length mismatch: declared {expected} bytes, found {actual}")]
    #[diagnostic(code(cirrus::decode::length_mismatch))]
    LengthMismatch {
        /// Length the encoding declares
        expected: usize,
        /// Length actually present
        actual: usize,
    },

    /// Map key that is not a text string
    #[error("map key at offset {offset} is not a text string")]
    #[diagnostic(code(cirrus::decode::non_string_key))]
    NonStringKey {
        /// Offset of the key
        offset: usize,
    },

    /// Same key twice in one map
    #[error("duplicate map key {key:?}")]
    #[diagnostic(code(cirrus::decode::duplicate_key))]
    DuplicateKey {
        /// The repeated key
        key: SmolStr,
    },

    /// CBOR tag with no registered handler
    #[error("unsupported CBOR tag {tag}")]
    #[diagnostic(code(cirrus::decode::unsupported_tag))]
    UnsupportedTag {
        /// The tag number
        tag: u64,
    },

    /// Tag 42 payload that is not a valid CID link
    #[error("malformed CID link: {reason}")]
    #[diagnostic(
        code(cirrus::decode::malformed_cid_link),
        help("tag 42 must wrap a byte string of 0x00 followed by binary CID bytes")
    )]
    MalformedCidLink {
        /// What was wrong with it
        reason: String,
    },

    /// Item the active decode options do not allow
    #[error("unsupported value at offset {offset}: {what}")]
    #[diagnostic(code(cirrus::decode::unsupported_value))]
    UnsupportedValue {
        /// Description of the rejected item
        what: &'static str,
        /// Offset of the item
        offset: usize,
    },

    /// Text string or key suffix that is not valid UTF-8
    #[error("invalid UTF-8 at offset {offset}")]
    #[diagnostic(code(cirrus::decode::invalid_utf8))]
    InvalidUtf8 {
        /// Offset of the string
        offset: usize,
    },

    /// Break code outside an indefinite-length container
    #[error("unexpected break at offset {offset}")]
    #[diagnostic(code(cirrus::decode::unexpected_break))]
    UnexpectedBreak {
        /// Offset of the break byte
        offset: usize,
    },

    /// Nesting deeper than the configured limit
    #[error("nesting exceeds {max} levels")]
    #[diagnostic(code(cirrus::decode::depth_limit))]
    DepthLimit {
        /// Configured limit
        max: usize,
    },

    /// Bytes left over after a complete top-level item
    #[error("{remaining} trailing bytes after decoded value")]
    #[diagnostic(code(cirrus::decode::trailing_data))]
    TrailingData {
        /// Number of unconsumed bytes
        remaining: usize,
    },

    /// CAR header that does not describe a CAR file
    #[error("invalid CAR header: {reason}")]
    #[diagnostic(
        code(cirrus::decode::bad_magic),
        help("a CAR v1 header is a DAG-CBOR map {{version: 1, roots: [CID...]}}")
    )]
    BadMagic {
        /// What was wrong with it
        reason: String,
    },

    /// CAR section declaring zero length
    #[error("zero-length CAR section at offset {offset}")]
    #[diagnostic(code(cirrus::decode::empty_section))]
    EmptySection {
        /// Offset of the section length prefix
        offset: usize,
    },
}

impl DecodeError {
    /// Create a truncation error
    pub fn truncated(what: &'static str, offset: usize) -> Self {
        Self::Truncated { what, offset }
    }

    pub(crate) fn unsupported(what: &'static str, offset: usize) -> Self {
        Self::UnsupportedValue { what, offset }
    }

    /// Create a bad-magic error
    pub fn bad_magic(reason: impl Into<String>) -> Self {
        Self::BadMagic {
            reason: reason.into(),
        }
    }
}
