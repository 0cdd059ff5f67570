use std::collections::{HashMap, HashSet};
use std::fmt;

use bytes::Bytes;
use smol_str::SmolStr;

use super::token::{Length, Token, TokenValue, Tokenizer};
use super::value::{Map, Value};
use crate::cid::Cid;
use crate::error::{DecodeError, Result};

/// Default nesting limit for arrays, maps and tags
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// CBOR tag carrying a CID link
pub const CID_TAG: u64 = 42;

/// What the decoder accepts beyond the deterministic DAG-CBOR subset
///
/// The defaults are the DAG-CBOR rules used for repository data.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder)]
#[builder(start_fn = new)]
pub struct DecodeOptions {
    /// Accept indefinite-length arrays and maps
    #[builder(default = false)]
    pub allow_indefinite: bool,
    /// Accept `undefined`, decoded as null
    #[builder(default = false)]
    pub allow_undefined: bool,
    /// Accept NaN floats
    #[builder(default = false)]
    pub allow_nan: bool,
    /// Accept infinite floats
    #[builder(default = false)]
    pub allow_infinity: bool,
    /// Decode integers outside the `i64` range as [`Value::BigInteger`]
    #[builder(default = true)]
    pub allow_big_int: bool,
    /// Reject integers and lengths not encoded in their shortest form
    #[builder(default = true)]
    pub strict: bool,
    /// Fail on a repeated map key; otherwise the last value wins
    #[builder(default = true)]
    pub reject_duplicate_map_keys: bool,
    /// Maximum container nesting
    #[builder(default = DEFAULT_MAX_DEPTH)]
    pub max_depth: usize,
}

impl DecodeOptions {
    /// Strict DAG-CBOR
    pub fn dag_cbor() -> Self {
        Self::new().build()
    }

    /// Everything the value model can represent
    pub fn lenient() -> Self {
        Self::new()
            .allow_indefinite(true)
            .allow_undefined(true)
            .allow_nan(true)
            .allow_infinity(true)
            .strict(false)
            .reject_duplicate_map_keys(false)
            .build()
    }
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self::dag_cbor()
    }
}

/// Transform applied to the value inside a tag
pub type TagHandler = fn(Value) -> Result<Value>;

/// Tag number to handler table, owned by a [`Decoder`]
#[derive(Clone, Default)]
pub struct TagRegistry {
    handlers: HashMap<u64, TagHandler>,
}

impl TagRegistry {
    /// No tags accepted
    pub fn empty() -> Self {
        Self::default()
    }

    /// Tag 42 only
    pub fn dag_cbor() -> Self {
        let mut tags = Self::empty();
        tags.register(CID_TAG, decode_cid_link);
        tags
    }

    /// Add or replace the handler for `tag`.
    pub fn register(&mut self, tag: u64, handler: TagHandler) -> &mut Self {
        self.handlers.insert(tag, handler);
        self
    }

    /// Handler for `tag`
    pub fn get(&self, tag: u64) -> Option<TagHandler> {
        self.handlers.get(&tag).copied()
    }
}

impl fmt::Debug for TagRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.handlers.keys().collect();
        tags.sort();
        f.debug_struct("TagRegistry").field("tags", &tags).finish()
    }
}

/// Tag 42 payload: a byte string of `0x00` followed by a binary CID
pub fn decode_cid_link(value: Value) -> Result<Value> {
    let Value::Bytes(bytes) = value else {
        return Err(DecodeError::MalformedCidLink {
            reason: format!("expected bytes, found {}", value.type_name()),
        });
    };
    if bytes.first() != Some(&0) {
        return Err(DecodeError::MalformedCidLink {
            reason: "expected leading 0x00".into(),
        });
    }
    Cid::decode(bytes.slice(1..))
        .map(Value::Link)
        .map_err(|e| DecodeError::MalformedCidLink {
            reason: e.to_string(),
        })
}

/// Builds [`Value`]s from a token stream
#[derive(Debug, Clone)]
pub struct Decoder {
    options: DecodeOptions,
    tags: TagRegistry,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::dag_cbor()
    }
}

impl Decoder {
    /// Decoder with explicit options and tags
    pub fn new(options: DecodeOptions, tags: TagRegistry) -> Self {
        Self { options, tags }
    }

    /// Strict DAG-CBOR with CID links
    pub fn dag_cbor() -> Self {
        Self::new(DecodeOptions::dag_cbor(), TagRegistry::dag_cbor())
    }

    /// Lenient options with CID links
    pub fn lenient() -> Self {
        Self::new(DecodeOptions::lenient(), TagRegistry::dag_cbor())
    }

    /// Active options
    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// Decode exactly one value; leftover bytes are an error.
    pub fn decode(&self, data: &Bytes) -> Result<Value> {
        let (value, used) = self.decode_first(data)?;
        if used < data.len() {
            return Err(DecodeError::TrailingData {
                remaining: data.len() - used,
            });
        }
        Ok(value)
    }

    /// Decode the value at the front of `data`, returning it and the number
    /// of bytes it occupied.
    pub fn decode_first(&self, data: &Bytes) -> Result<(Value, usize)> {
        let mut tokens = Tokenizer::new(data, &self.options);
        let value = self.read_value(&mut tokens, 0)?;
        Ok((value, tokens.pos()))
    }

    fn read_value(&self, tokens: &mut Tokenizer<'_>, depth: usize) -> Result<Value> {
        let token = tokens.next_token()?;
        self.build(tokens, token, depth)
    }

    fn build(&self, tokens: &mut Tokenizer<'_>, token: Token<'_>, depth: usize) -> Result<Value> {
        match token.value {
            TokenValue::Uint(n) => self.integer(i128::from(n), token.offset),
            TokenValue::NegInt(n) => self.integer(-1 - i128::from(n), token.offset),
            TokenValue::Bytes(bytes) => Ok(Value::Bytes(bytes)),
            TokenValue::Text(text) => Ok(Value::Text(SmolStr::new(text))),
            TokenValue::Float(f) => Ok(Value::Float(f)),
            TokenValue::Bool(b) => Ok(Value::Bool(b)),
            TokenValue::Null | TokenValue::Undefined => Ok(Value::Null),
            TokenValue::Break => Err(DecodeError::UnexpectedBreak {
                offset: token.offset,
            }),
            TokenValue::Array(length) => {
                self.check_depth(depth)?;
                self.array(tokens, length, depth + 1)
            }
            TokenValue::Map(length) => {
                self.check_depth(depth)?;
                self.map(tokens, length, depth + 1)
            }
            TokenValue::Tag(tag) => {
                self.check_depth(depth)?;
                let handler = self
                    .tags
                    .get(tag)
                    .ok_or(DecodeError::UnsupportedTag { tag })?;
                handler(self.read_value(tokens, depth + 1)?)
            }
        }
    }

    fn check_depth(&self, depth: usize) -> Result<()> {
        if depth >= self.options.max_depth {
            return Err(DecodeError::DepthLimit {
                max: self.options.max_depth,
            });
        }
        Ok(())
    }

    fn integer(&self, n: i128, offset: usize) -> Result<Value> {
        if let Ok(small) = i64::try_from(n) {
            return Ok(Value::Integer(small));
        }
        if !self.options.allow_big_int {
            return Err(DecodeError::unsupported("integer outside the i64 range", offset));
        }
        Ok(Value::BigInteger(n))
    }

    fn array(&self, tokens: &mut Tokenizer<'_>, length: Length, depth: usize) -> Result<Value> {
        match length {
            Length::Definite(n) => {
                // every item takes at least one byte
                let mut items = Vec::with_capacity(n.min(tokens.remaining()));
                for _ in 0..n {
                    items.push(self.read_value(tokens, depth)?);
                }
                Ok(Value::Array(items))
            }
            Length::Indefinite => {
                let mut items = Vec::new();
                loop {
                    let token = tokens.next_token()?;
                    if token.value == TokenValue::Break {
                        return Ok(Value::Array(items));
                    }
                    items.push(self.build(tokens, token, depth)?);
                }
            }
        }
    }

    fn map(&self, tokens: &mut Tokenizer<'_>, length: Length, depth: usize) -> Result<Value> {
        let mut map = match length {
            Length::Definite(n) => Map::with_capacity(n.min(tokens.remaining() / 2)),
            Length::Indefinite => Map::new(),
        };
        let mut seen = HashSet::new();
        let mut read = 0usize;

        loop {
            if let Length::Definite(n) = length {
                if read == n {
                    break;
                }
            }
            let key_token = tokens.next_token()?;
            let key = match key_token.value {
                TokenValue::Break if length == Length::Indefinite => break,
                TokenValue::Text(text) => SmolStr::new(text),
                _ => {
                    return Err(DecodeError::NonStringKey {
                        offset: key_token.offset,
                    });
                }
            };
            let value = self.read_value(tokens, depth)?;

            if self.options.reject_duplicate_map_keys {
                if !seen.insert(key.clone()) {
                    return Err(DecodeError::DuplicateKey { key });
                }
                map.push(key, value);
            } else {
                map.insert(key, value);
            }
            read += 1;
        }

        Ok(Value::Map(map))
    }
}
