//! Synchronous CAR reading over an in-memory buffer

use std::path::Path;

use bytes::Bytes;
use cirrus_codec::cbor::{Decoder, Value};
use cirrus_codec::varint;
use cirrus_codec::{Cid, DecodeError};

use crate::error::{RepoError, Result};

/// Length of the fixed CARv2 header that follows the pragma
pub const V2_HEADER_SIZE: usize = 40;

/// Decoded CAR header
#[derive(Debug, Clone, PartialEq)]
pub struct CarHeader {
    /// 1 or 2, as declared by the outermost header
    pub version: u64,
    /// Root CIDs of the embedded v1 payload, possibly empty
    pub roots: Vec<Cid>,
    /// CARv2 fixed header, when the file is version 2
    pub v2: Option<CarV2Header>,
}

/// Fixed-size header that follows a CARv2 pragma
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarV2Header {
    /// Characteristics bitfield
    pub characteristics: [u8; 16],
    /// Offset of the embedded v1 payload from the start of the file
    pub data_offset: u64,
    /// Length of the embedded v1 payload
    pub data_size: u64,
    /// Offset of the index, or 0 when absent
    pub index_offset: u64,
}

impl CarV2Header {
    fn parse(bytes: &[u8]) -> Self {
        let mut characteristics = [0u8; 16];
        characteristics.copy_from_slice(&bytes[..16]);
        let le = |at: usize| {
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(word)
        };
        Self {
            characteristics,
            data_offset: le(16),
            data_size: le(24),
            index_offset: le(32),
        }
    }
}

/// One CAR section: a CID and the block bytes it names
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Block CID
    pub cid: Cid,
    /// Block payload, a slice of the CAR buffer
    pub bytes: Bytes,
}

/// Reads the varint-prefixed header at `pos` and returns the decoded value
/// and the offset just past it. `end` bounds the readable region.
fn read_header_value(
    data: &Bytes,
    pos: usize,
    end: usize,
    decoder: &Decoder,
) -> cirrus_codec::Result<(Value, usize)> {
    let region = &data[..end];
    if pos >= end {
        return Err(DecodeError::truncated("CAR header", pos));
    }
    let (length, read) = varint::decode_usize(region, pos)?;
    if length == 0 {
        return Err(DecodeError::bad_magic("header length is zero"));
    }
    let start = pos + read;
    let stop = start
        .checked_add(length)
        .filter(|&stop| stop <= end)
        .ok_or(DecodeError::truncated("CAR header", pos))?;
    let value = decoder.decode(&data.slice(start..stop))?;
    Ok((value, stop))
}

fn header_version(value: &Value) -> cirrus_codec::Result<u64> {
    let map = value
        .as_map()
        .ok_or_else(|| DecodeError::bad_magic("header is not a map"))?;
    let version = map
        .get("version")
        .and_then(Value::as_integer)
        .ok_or_else(|| DecodeError::bad_magic("header has no integer version"))?;
    u64::try_from(version).map_err(|_| DecodeError::bad_magic("negative header version"))
}

fn header_roots(value: &Value) -> cirrus_codec::Result<Vec<Cid>> {
    let roots = value
        .get("roots")
        .and_then(Value::as_array)
        .ok_or_else(|| DecodeError::bad_magic("version 1 header lacks a roots array"))?;
    roots
        .iter()
        .map(|root| {
            root.as_link()
                .cloned()
                .ok_or_else(|| DecodeError::bad_magic("root is not a CID link"))
        })
        .collect()
}

/// Parse the header and locate the block region.
///
/// Returns the header, the offset of the first block and the end of the block
/// region.
fn read_header(data: &Bytes) -> cirrus_codec::Result<(CarHeader, usize, usize)> {
    let decoder = Decoder::dag_cbor();
    let (value, pos) = read_header_value(data, 0, data.len(), &decoder)?;

    match header_version(&value)? {
        1 => {
            let roots = header_roots(&value)?;
            Ok((
                CarHeader {
                    version: 1,
                    roots,
                    v2: None,
                },
                pos,
                data.len(),
            ))
        }
        2 => {
            let fixed = data
                .get(pos..pos + V2_HEADER_SIZE)
                .ok_or(DecodeError::truncated("CARv2 header", pos))?;
            let v2 = CarV2Header::parse(fixed);

            let start = usize::try_from(v2.data_offset)
                .map_err(|_| DecodeError::truncated("CARv2 data", pos))?;
            let end = usize::try_from(v2.data_size)
                .ok()
                .and_then(|size| start.checked_add(size))
                .filter(|&end| end <= data.len())
                .ok_or(DecodeError::truncated("CARv2 data", start))?;

            let (inner, blocks_start) = read_header_value(data, start, end, &decoder)?;
            match header_version(&inner)? {
                1 => {}
                version => return Err(DecodeError::UnsupportedVersion { version }),
            }
            let roots = header_roots(&inner)?;
            Ok((
                CarHeader {
                    version: 2,
                    roots,
                    v2: Some(v2),
                },
                blocks_start,
                end,
            ))
        }
        version => Err(DecodeError::UnsupportedVersion { version }),
    }
}

/// Single-pass reader over the blocks of an in-memory CAR
///
/// Iteration stops for good after the first error.
#[derive(Debug, Clone)]
pub struct CarReader {
    header: CarHeader,
    data: Bytes,
    pos: usize,
    end: usize,
}

impl CarReader {
    /// Parse the header of `data` and position the reader at the first block.
    pub fn new(data: Bytes) -> Result<Self> {
        let (header, pos, end) = read_header(&data).map_err(RepoError::car)?;
        Ok(Self {
            header,
            data,
            pos,
            end,
        })
    }

    /// Decoded header
    pub fn header(&self) -> &CarHeader {
        &self.header
    }

    /// Root CIDs
    pub fn roots(&self) -> &[Cid] {
        &self.header.roots
    }

    /// Byte offset of the next section
    pub fn position(&self) -> usize {
        self.pos
    }

    fn read_block(&mut self) -> cirrus_codec::Result<Block> {
        let start = self.pos;
        let region = &self.data[..self.end];
        let (length, read) = varint::decode_usize(region, start)?;
        if length == 0 {
            return Err(DecodeError::EmptySection { offset: start });
        }
        let section_start = start + read;
        let section_end = section_start
            .checked_add(length)
            .filter(|&end| end <= self.end)
            .ok_or(DecodeError::truncated("CAR section", start))?;

        let section = self.data.slice(section_start..section_end);
        let (cid, cid_len) = Cid::decode_first(&section)?;
        self.pos = section_end;
        Ok(Block {
            cid,
            bytes: section.slice(cid_len..),
        })
    }
}

impl Iterator for CarReader {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }
        match self.read_block() {
            Ok(block) => Some(Ok(block)),
            Err(e) => {
                let offset = self.pos;
                self.pos = self.end;
                Some(Err(
                    RepoError::car(e).with_context(format!("section at offset {offset}"))
                ))
            }
        }
    }
}

/// Parse a CAR held in memory.
pub fn read_car(data: Bytes) -> Result<CarReader> {
    CarReader::new(data)
}

/// Load a CAR file and parse its header.
pub async fn read_car_file(path: impl AsRef<Path>) -> Result<CarReader> {
    let data = tokio::fs::read(path).await.map_err(RepoError::io)?;
    CarReader::new(Bytes::from(data))
}
