use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::{DecodeError, Result};
use crate::multibase::{self, BASE58_BTC, Base};
use crate::varint;

/// dag-pb codec, implied by every CIDv0
pub const DAG_PB: u64 = 0x70;
/// dag-cbor codec, used by repository blocks
pub const DAG_CBOR: u64 = 0x71;
/// raw codec, used by blobs
pub const RAW: u64 = 0x55;
/// sha2-256 multihash code
pub const SHA2_256: u64 = 0x12;

const V0_DIGEST_SIZE: usize = 32;

/// A self-describing digest: `varint(code) ++ varint(size) ++ digest`
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Multihash {
    code: u64,
    digest: Bytes,
    bytes: Bytes,
}

impl Multihash {
    /// Wrap a digest produced by the hash function `code`.
    pub fn wrap(code: u64, digest: impl Into<Bytes>) -> Self {
        let digest = digest.into();
        let mut bytes = Vec::with_capacity(
            varint::encoding_length(code) + varint::encoding_length(digest.len() as u64) + digest.len(),
        );
        varint::encode_into(code, &mut bytes);
        varint::encode_into(digest.len() as u64, &mut bytes);
        bytes.extend_from_slice(&digest);
        let bytes = Bytes::from(bytes);
        let digest = bytes.slice(bytes.len() - digest.len()..);
        Self {
            code,
            digest,
            bytes,
        }
    }

    /// Hash function code
    pub fn code(&self) -> u64 {
        self.code
    }

    /// Digest length in bytes
    pub fn size(&self) -> usize {
        self.digest.len()
    }

    /// The digest itself
    pub fn digest(&self) -> &Bytes {
        &self.digest
    }

    /// The full encoded multihash
    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }
}

impl fmt::Debug for Multihash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multihash")
            .field("code", &format_args!("{:#x}", self.code))
            .field("size", &self.size())
            .finish()
    }
}

/// Sizes and codes read from the front of a binary CID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidSpecs {
    /// 0 or 1
    pub version: u64,
    /// Content codec (dag-pb for v0)
    pub codec: u64,
    /// Hash function code
    pub multihash_code: u64,
    /// Digest length
    pub digest_size: usize,
    /// Length of the multihash including its own varints
    pub multihash_size: usize,
    /// Length of the whole CID
    pub total_size: usize,
}

/// Read the version, codec and multihash header of a binary CID without
/// touching the digest bytes.
///
/// A leading varint of `0x12` (the sha2-256 multihash code) marks a CIDv0,
/// which has no version or codec prefix of its own. A CIDv0 may also be
/// written with an explicit `0x00` version and a codec; decoding normalises
/// that form to the bare multihash.
pub fn inspect(bytes: &[u8]) -> Result<CidSpecs> {
    let (mut version, mut offset) = varint::decode(bytes, 0)?;
    let mut codec = DAG_PB;
    if version == SHA2_256 {
        version = 0;
        offset = 0;
    } else {
        if version != 0 && version != 1 {
            return Err(DecodeError::UnsupportedVersion { version });
        }
        let (value, read) = varint::decode(bytes, offset)?;
        codec = value;
        offset += read;
    }

    let prefix_size = offset;
    let (multihash_code, read) = varint::decode(bytes, offset)?;
    offset += read;
    let (digest_size, read) = varint::decode_usize(bytes, offset)?;
    offset += read;
    let total_size = offset
        .checked_add(digest_size)
        .ok_or(DecodeError::Overlong { offset })?;

    Ok(CidSpecs {
        version,
        codec,
        multihash_code,
        digest_size,
        multihash_size: total_size - prefix_size,
        total_size,
    })
}

/// Content identifier
///
/// Equality, hashing and the textual form derive from the binary encoding.
#[derive(Clone)]
pub struct Cid {
    version: u64,
    codec: u64,
    multihash: Multihash,
    bytes: Bytes,
}

impl Cid {
    /// Build a CIDv0 from a 32-byte sha2-256 multihash.
    pub fn new_v0(multihash: Multihash) -> Result<Self> {
        if multihash.code() != SHA2_256 {
            return Err(DecodeError::unsupported("CIDv0 requires a sha2-256 multihash", 0));
        }
        if multihash.size() != V0_DIGEST_SIZE {
            return Err(DecodeError::LengthMismatch {
                expected: V0_DIGEST_SIZE,
                actual: multihash.size(),
            });
        }
        Ok(Self {
            version: 0,
            codec: DAG_PB,
            bytes: multihash.as_bytes().clone(),
            multihash,
        })
    }

    /// Build a CIDv1.
    pub fn new_v1(codec: u64, multihash: Multihash) -> Self {
        let mut bytes = Vec::with_capacity(
            1 + varint::encoding_length(codec) + multihash.as_bytes().len(),
        );
        varint::encode_into(1, &mut bytes);
        varint::encode_into(codec, &mut bytes);
        bytes.extend_from_slice(multihash.as_bytes());
        Self {
            version: 1,
            codec,
            multihash,
            bytes: Bytes::from(bytes),
        }
    }

    /// Decode a buffer holding exactly one binary CID.
    pub fn decode(bytes: Bytes) -> Result<Self> {
        let specs = inspect(&bytes)?;
        if specs.total_size != bytes.len() {
            return Err(DecodeError::LengthMismatch {
                expected: specs.total_size,
                actual: bytes.len(),
            });
        }
        Self::from_specs(specs, bytes)
    }

    /// Decode the CID at the front of `bytes`, returning it and its length.
    ///
    /// The returned CID shares storage with `bytes`.
    pub fn decode_first(bytes: &Bytes) -> Result<(Self, usize)> {
        let specs = inspect(bytes)?;
        if specs.total_size > bytes.len() {
            return Err(DecodeError::LengthMismatch {
                expected: specs.total_size,
                actual: bytes.len(),
            });
        }
        let cid = Self::from_specs(specs, bytes.slice(..specs.total_size))?;
        Ok((cid, specs.total_size))
    }

    fn from_specs(specs: CidSpecs, bytes: Bytes) -> Result<Self> {
        let multihash_start = specs.total_size - specs.multihash_size;
        let digest_start = specs.total_size - specs.digest_size;
        let multihash = Multihash {
            code: specs.multihash_code,
            digest: bytes.slice(digest_start..),
            bytes: bytes.slice(multihash_start..),
        };
        if specs.version == 0 {
            if specs.codec != DAG_PB {
                return Err(DecodeError::unsupported("CIDv0 requires the dag-pb codec", 0));
            }
            // explicit-prefix v0 collapses to the same bytes as `new_v0`
            return Self::new_v0(multihash);
        }
        Ok(Self {
            version: specs.version,
            codec: specs.codec,
            multihash,
            bytes,
        })
    }

    /// Parse the textual form: `Qm…` base58 for v0, any supported multibase
    /// for v1.
    pub fn parse(text: &str) -> Result<Self> {
        if text.starts_with('Q') {
            let cid = Self::decode(Bytes::from(BASE58_BTC.decode(text)?))?;
            if cid.version != 0 {
                return Err(DecodeError::UnsupportedVersion {
                    version: cid.version,
                });
            }
            return Ok(cid);
        }
        let (_, bytes) = multibase::decode(text)?;
        Self::decode(Bytes::from(bytes))
    }

    /// 0 or 1
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Content codec
    pub fn codec(&self) -> u64 {
        self.codec
    }

    /// The multihash
    pub fn multihash(&self) -> &Multihash {
        &self.multihash
    }

    /// Binary encoding
    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Render a v1 CID in the given multibase. v0 CIDs are always base58.
    pub fn to_string_of_base(&self, base: Base) -> String {
        match self.version {
            0 => BASE58_BTC.encode(&self.bytes),
            _ => multibase::encode(base, &self.bytes),
        }
    }
}

impl PartialEq for Cid {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Cid {}

impl std::hash::Hash for Cid {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_of_base(Base::Base32Lower))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({self})")
    }
}

impl FromStr for Cid {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
