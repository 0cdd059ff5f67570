//! MST node reading and key reconstruction
//!
//! Node entries store keys prefix-compressed against the previous entry of
//! the same node: `p` bytes are kept from the previous key and the suffix
//! `k` is appended. Keys are rebuilt here in entry order; entries of one node
//! must never be reordered or processed in parallel.

use cirrus_codec::cbor::Value;
use cirrus_codec::Cid;
use smol_str::SmolStr;

use crate::error::MstError;

/// Wire-format node, borrowed from a decoded block
///
/// Any map carrying an entry array `e` is treated as a node.
#[derive(Debug, Clone, Copy)]
pub struct NodeData<'a> {
    left: Option<&'a Cid>,
    entries: &'a [Value],
}

impl<'a> NodeData<'a> {
    /// View `value` as a node, if it has the node shape.
    pub fn from_value(value: &'a Value) -> Option<Self> {
        let map = value.as_map()?;
        let entries = map.get("e")?.as_array()?;
        Some(Self {
            left: map.get("l").and_then(Value::as_link),
            entries,
        })
    }

    /// Left-most subtree pointer
    pub fn left(&self) -> Option<&'a Cid> {
        self.left
    }

    /// Raw entries, in stream order
    pub fn entries(&self) -> &'a [Value] {
        self.entries
    }

    /// Rebuild every key of this node.
    pub fn leaves(&self) -> Leaves<'a> {
        Leaves {
            entries: self.entries.iter(),
            keys: KeyReconstructor::new(),
        }
    }
}

/// A leaf with its full key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry {
    /// Full key, `collection/rkey`
    pub key: SmolStr,
    /// Canonical string of the record CID
    pub value: SmolStr,
    /// Subtree to the right of this entry
    pub tree: Option<Cid>,
}

/// Stateful key builder for the entries of one node
///
/// Keys are handled as bytes: `p` counts bytes, and a multi-byte character may
/// be split between the kept prefix and the suffix.
#[derive(Debug, Clone, Default)]
pub struct KeyReconstructor {
    last_key: Vec<u8>,
    index: usize,
}

impl KeyReconstructor {
    /// Start a node with an empty previous key.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries consumed so far, failed ones included
    pub fn index(&self) -> usize {
        self.index
    }

    /// Apply the next entry of the node.
    ///
    /// A failed entry leaves the previous key in place.
    pub fn apply(&mut self, entry: &Value) -> Result<LeafEntry, MstError> {
        let index = self.index;
        self.index += 1;

        let suffix = entry
            .get("k")
            .and_then(Value::as_bytes)
            .ok_or(MstError::BadEntry {
                index,
                reason: "missing key suffix `k`",
            })?;
        let value = match entry.get("v") {
            Some(Value::Link(cid)) => SmolStr::new(cid.to_string()),
            Some(Value::Text(text)) => text.clone(),
            _ => {
                return Err(MstError::BadEntry {
                    index,
                    reason: "missing value link `v`",
                });
            }
        };
        let prefix = match entry.get("p") {
            None | Some(Value::Null) => 0,
            Some(Value::Integer(p)) => usize::try_from(*p).map_err(|_| MstError::BadEntry {
                index,
                reason: "negative prefix length `p`",
            })?,
            Some(_) => {
                return Err(MstError::BadEntry {
                    index,
                    reason: "prefix length `p` is not an integer",
                });
            }
        };
        if prefix > self.last_key.len() {
            return Err(MstError::PrefixOutOfRange {
                index,
                prefix,
                len: self.last_key.len(),
            });
        }

        let mut key = Vec::with_capacity(prefix + suffix.len());
        key.extend_from_slice(&self.last_key[..prefix]);
        key.extend_from_slice(suffix);
        let text = std::str::from_utf8(&key).map_err(|_| MstError::InvalidSuffix { index })?;
        let key_str = SmolStr::new(text);
        self.last_key = key;

        Ok(LeafEntry {
            key: key_str,
            value,
            tree: entry.get("t").and_then(Value::as_link).cloned(),
        })
    }
}

/// Iterator over the leaves of one node, see [`NodeData::leaves`]
#[derive(Debug, Clone)]
pub struct Leaves<'a> {
    entries: std::slice::Iter<'a, Value>,
    keys: KeyReconstructor,
}

impl Iterator for Leaves<'_> {
    type Item = Result<LeafEntry, MstError>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.next()?;
        Some(self.keys.apply(entry))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

/// Split a key into `(collection, rkey)`.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('/')
}
