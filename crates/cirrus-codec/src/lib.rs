//! Low-level decoding primitives for AT Protocol data
//!
//! This crate provides the byte-level building blocks the repository and
//! firehose decoders are made of:
//!
//! - **Varint**: unsigned LEB128, as used by multiformats and CAR framing
//! - **Multibase**: RFC 4648 and base-x alphabets (base32, base58btc, base64)
//! - **CID**: content identifiers and their multihash, binary and textual forms
//! - **CBOR**: a tokenizer and value builder for the DAG-CBOR dialect
//!
//! Decoders never mutate their input. Byte strings and CID bytes in decoded
//! values are [`bytes::Bytes`] slices of the input buffer rather than copies.
//!
//! # Example
//!
//! ```rust,ignore
//! use bytes::Bytes;
//! use cirrus_codec::cbor::Decoder;
//!
//! let value = Decoder::dag_cbor().decode(&Bytes::from_static(&[0xa1, 0x61, 0x61, 0x01]))?;
//! assert_eq!(value.get("a").and_then(|v| v.as_integer()), Some(1));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

/// DAG-CBOR tokenizer and value builder
pub mod cbor;
/// Content identifiers and multihashes
pub mod cid;
pub mod error;
/// Multibase alphabets
pub mod multibase;
pub mod varint;

pub use crate::cbor::{DecodeOptions, Decoder, Map, Value};
pub use crate::cid::{Cid, Multihash};
pub use error::{DecodeError, Result};
