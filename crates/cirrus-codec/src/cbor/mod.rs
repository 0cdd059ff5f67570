//! Decoding is split in two layers. [`Tokenizer`] reads one item header at a
//! time and enforces the per-item rules; [`Decoder`] assembles tokens into a
//! [`Value`] tree, handling container lengths, map keys and tags.

mod decode;
mod token;
mod value;

pub use decode::{
    CID_TAG, DEFAULT_MAX_DEPTH, DecodeOptions, Decoder, TagHandler, TagRegistry, decode_cid_link,
};
pub use token::{Length, MajorType, Token, TokenValue, Tokenizer};
pub use value::{Map, Value};
