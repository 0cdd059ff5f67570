use bytes::Bytes;

use super::DecodeOptions;
use crate::error::{DecodeError, Result};

/// CBOR major type, the top three bits of an item's initial byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MajorType {
    /// 0
    UnsignedInt = 0,
    /// 1
    NegativeInt = 1,
    /// 2
    ByteString = 2,
    /// 3
    TextString = 3,
    /// 4
    Array = 4,
    /// 5
    Map = 5,
    /// 6
    Tag = 6,
    /// 7: floats, booleans, null, undefined, break
    Simple = 7,
}

impl MajorType {
    /// Major type of an initial byte
    pub const fn of(initial: u8) -> Self {
        match initial >> 5 {
            0 => Self::UnsignedInt,
            1 => Self::NegativeInt,
            2 => Self::ByteString,
            3 => Self::TextString,
            4 => Self::Array,
            5 => Self::Map,
            6 => Self::Tag,
            _ => Self::Simple,
        }
    }
}

/// Element count of an array or map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    /// Known up front
    Definite(usize),
    /// Terminated by a break token
    Indefinite,
}

/// Payload of one token
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue<'a> {
    /// Unsigned integer
    Uint(u64),
    /// Negative integer, stored as the encoded argument `n` of `-1 - n`
    NegInt(u64),
    /// Byte string, a slice of the input
    Bytes(Bytes),
    /// Text string, borrowed from the input
    Text(&'a str),
    /// Array header
    Array(Length),
    /// Map header; the length counts pairs
    Map(Length),
    /// Tag number; the tagged item follows
    Tag(u64),
    /// Any float width, widened
    Float(f64),
    /// `true` or `false`
    Bool(bool),
    /// `null`
    Null,
    /// `undefined`
    Undefined,
    /// End of an indefinite-length container
    Break,
}

/// One decoded CBOR item header (plus its payload for scalars)
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    /// Decoded payload
    pub value: TokenValue<'a>,
    /// Where the token starts in the input
    pub offset: usize,
    /// Bytes the token occupies, header and inline payload together
    pub encoded_length: usize,
}

const MINOR_FALSE: u8 = 20;
const MINOR_TRUE: u8 = 21;
const MINOR_NULL: u8 = 22;
const MINOR_UNDEFINED: u8 = 23;
const MINOR_ONE_BYTE: u8 = 24;
const MINOR_TWO_BYTES: u8 = 25;
const MINOR_FOUR_BYTES: u8 = 26;
const MINOR_EIGHT_BYTES: u8 = 27;
const MINOR_INDEFINITE: u8 = 31;

/// Forward-only reader producing one [`Token`] per call
///
/// The tokenizer applies the item-level checks of its [`DecodeOptions`]
/// (minimal integer encoding, indefinite lengths, undefined, non-finite
/// floats). Container structure is left to the caller.
pub struct Tokenizer<'a> {
    data: &'a Bytes,
    pos: usize,
    options: &'a DecodeOptions,
}

impl<'a> Tokenizer<'a> {
    /// Start reading at the beginning of `data`.
    pub fn new(data: &'a Bytes, options: &'a DecodeOptions) -> Self {
        Self {
            data,
            pos: 0,
            options,
        }
    }

    /// Current read position
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// True once every input byte has been consumed
    pub fn done(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Unconsumed input bytes
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Decode the token at the current position and advance past it.
    pub fn next_token(&mut self) -> Result<Token<'a>> {
        let offset = self.pos;
        let Some(&initial) = self.data.get(offset) else {
            return Err(DecodeError::truncated("CBOR item", offset));
        };
        let major = MajorType::of(initial);
        let minor = initial & 0x1f;

        let (value, encoded_length) = match major {
            MajorType::UnsignedInt => {
                let (n, len) = self.argument(minor, offset)?;
                (TokenValue::Uint(n), len)
            }
            MajorType::NegativeInt => {
                let (n, len) = self.argument(minor, offset)?;
                (TokenValue::NegInt(n), len)
            }
            MajorType::ByteString => {
                let (bytes, len) = self.string_span(minor, offset)?;
                (TokenValue::Bytes(self.data.slice(bytes)), len)
            }
            MajorType::TextString => {
                let (span, len) = self.string_span(minor, offset)?;
                let data: &'a [u8] = self.data;
                let text = std::str::from_utf8(&data[span])
                    .map_err(|_| DecodeError::InvalidUtf8 { offset })?;
                (TokenValue::Text(text), len)
            }
            MajorType::Array => {
                let (length, len) = self.container_length(minor, offset)?;
                (TokenValue::Array(length), len)
            }
            MajorType::Map => {
                let (length, len) = self.container_length(minor, offset)?;
                (TokenValue::Map(length), len)
            }
            MajorType::Tag => {
                let (n, len) = self.argument(minor, offset)?;
                (TokenValue::Tag(n), len)
            }
            MajorType::Simple => self.simple(minor, offset)?,
        };

        self.pos = offset + encoded_length;
        Ok(Token {
            value,
            offset,
            encoded_length,
        })
    }

    /// Read the `n` big-endian bytes after the initial byte.
    fn read_be(&self, offset: usize, n: usize, what: &'static str) -> Result<u64> {
        let start = offset + 1;
        let bytes = self
            .data
            .get(start..start + n)
            .ok_or(DecodeError::truncated(what, offset))?;
        Ok(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
    }

    /// Decode the argument of an integer-like header, returning it and the
    /// header length.
    fn argument(&self, minor: u8, offset: usize) -> Result<(u64, usize)> {
        let (value, width, minimum) = match minor {
            0..=23 => return Ok((u64::from(minor), 1)),
            MINOR_ONE_BYTE => (self.read_be(offset, 1, "uint8")?, 1, 24),
            MINOR_TWO_BYTES => (self.read_be(offset, 2, "uint16")?, 2, 0x100),
            MINOR_FOUR_BYTES => (self.read_be(offset, 4, "uint32")?, 4, 0x1_0000),
            MINOR_EIGHT_BYTES => (self.read_be(offset, 8, "uint64")?, 8, 0x1_0000_0000),
            MINOR_INDEFINITE => {
                return Err(DecodeError::unsupported(
                    "indefinite length on an integer or tag",
                    offset,
                ));
            }
            _ => return Err(DecodeError::unsupported("reserved additional information", offset)),
        };
        if self.options.strict && value < minimum {
            return Err(DecodeError::unsupported(
                "integer encoded in more bytes than necessary",
                offset,
            ));
        }
        Ok((value, 1 + width))
    }

    fn length_argument(&self, minor: u8, offset: usize) -> Result<(usize, usize)> {
        let (value, len) = self.argument(minor, offset)?;
        let value =
            usize::try_from(value).map_err(|_| DecodeError::truncated("length", offset))?;
        Ok((value, len))
    }

    /// Span of a byte or text string payload and the token's total length.
    fn string_span(&self, minor: u8, offset: usize) -> Result<(std::ops::Range<usize>, usize)> {
        if minor == MINOR_INDEFINITE {
            return Err(DecodeError::unsupported("indefinite-length string", offset));
        }
        let (length, header) = self.length_argument(minor, offset)?;
        let start = offset + header;
        let end = start
            .checked_add(length)
            .filter(|&end| end <= self.data.len())
            .ok_or(DecodeError::truncated("string", offset))?;
        Ok((start..end, header + length))
    }

    fn container_length(&self, minor: u8, offset: usize) -> Result<(Length, usize)> {
        if minor == MINOR_INDEFINITE {
            if !self.options.allow_indefinite {
                return Err(DecodeError::unsupported("indefinite-length container", offset));
            }
            return Ok((Length::Indefinite, 1));
        }
        let (length, header) = self.length_argument(minor, offset)?;
        Ok((Length::Definite(length), header))
    }

    fn simple(&self, minor: u8, offset: usize) -> Result<(TokenValue<'a>, usize)> {
        match minor {
            MINOR_FALSE => Ok((TokenValue::Bool(false), 1)),
            MINOR_TRUE => Ok((TokenValue::Bool(true), 1)),
            MINOR_NULL => Ok((TokenValue::Null, 1)),
            MINOR_UNDEFINED => {
                if !self.options.allow_undefined {
                    return Err(DecodeError::unsupported("undefined", offset));
                }
                Ok((TokenValue::Undefined, 1))
            }
            MINOR_TWO_BYTES => {
                let half = self.read_be(offset, 2, "float16")? as u16;
                Ok((TokenValue::Float(self.check_float(f16_to_f64(half), offset)?), 3))
            }
            MINOR_FOUR_BYTES => {
                let bits = self.read_be(offset, 4, "float32")? as u32;
                let value = f64::from(f32::from_bits(bits));
                Ok((TokenValue::Float(self.check_float(value, offset)?), 5))
            }
            MINOR_EIGHT_BYTES => {
                let value = f64::from_bits(self.read_be(offset, 8, "float64")?);
                Ok((TokenValue::Float(self.check_float(value, offset)?), 9))
            }
            MINOR_INDEFINITE => {
                if !self.options.allow_indefinite {
                    return Err(DecodeError::unsupported("indefinite-length break", offset));
                }
                Ok((TokenValue::Break, 1))
            }
            _ => Err(DecodeError::unsupported("simple value", offset)),
        }
    }

    fn check_float(&self, value: f64, offset: usize) -> Result<f64> {
        if value.is_nan() && !self.options.allow_nan {
            return Err(DecodeError::unsupported("NaN", offset));
        }
        if value.is_infinite() && !self.options.allow_infinity {
            return Err(DecodeError::unsupported("Infinity", offset));
        }
        Ok(value)
    }
}

/// Widen an IEEE 754 half-precision float.
fn f16_to_f64(half: u16) -> f64 {
    let exponent = i32::from((half >> 10) & 0x1f);
    let mantissa = f64::from(half & 0x3ff);
    let magnitude = match exponent {
        0 => mantissa * 2f64.powi(-24),
        31 if mantissa == 0.0 => f64::INFINITY,
        31 => f64::NAN,
        _ => (mantissa + 1024.0) * 2f64.powi(exponent - 25),
    };
    if half & 0x8000 != 0 { -magnitude } else { magnitude }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens<'a>(data: &'a Bytes, options: &'a DecodeOptions) -> Result<Vec<TokenValue<'a>>> {
        let mut tokenizer = Tokenizer::new(data, options);
        let mut out = Vec::new();
        while !tokenizer.done() {
            out.push(tokenizer.next_token()?.value);
        }
        Ok(out)
    }

    fn input(bytes: &'static [u8]) -> Bytes {
        Bytes::from_static(bytes)
    }

    #[test]
    fn test_integers() {
        let strict = DecodeOptions::dag_cbor();
        assert_eq!(tokens(&input(&[0x17]), &strict).unwrap(), vec![TokenValue::Uint(23)]);
        assert_eq!(tokens(&input(&[0x18, 0x18]), &strict).unwrap(), vec![TokenValue::Uint(24)]);
        assert_eq!(
            tokens(&input(&[0x19, 0x01, 0x00]), &strict).unwrap(),
            vec![TokenValue::Uint(256)]
        );
        assert_eq!(tokens(&input(&[0x20]), &strict).unwrap(), vec![TokenValue::NegInt(0)]);
        assert_eq!(
            tokens(
                &input(&[0x1b, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]),
                &strict
            )
            .unwrap(),
            vec![TokenValue::Uint(u64::MAX)]
        );
    }

    #[test]
    fn test_strict_rejects_non_minimal_integers() {
        let data = input(&[0x18, 0x01]);
        assert!(matches!(
            tokens(&data, &DecodeOptions::dag_cbor()),
            Err(DecodeError::UnsupportedValue { offset: 0, .. })
        ));
        assert_eq!(
            tokens(&data, &DecodeOptions::lenient()).unwrap(),
            vec![TokenValue::Uint(1)]
        );
    }

    #[test]
    fn test_strings_borrow_the_input() {
        let strict = DecodeOptions::dag_cbor();
        let data = input(&[0x62, b'h', b'i', 0x42, 0x01, 0x02]);
        let values = tokens(&data, &strict).unwrap();
        assert_eq!(
            values,
            vec![
                TokenValue::Text("hi"),
                TokenValue::Bytes(Bytes::from_static(&[1, 2]))
            ]
        );
        // byte strings are views into the same allocation
        let TokenValue::Bytes(slice) = &values[1] else {
            panic!("expected bytes");
        };
        assert_eq!(slice.as_ptr(), data[4..].as_ptr());
    }

    #[test]
    fn test_truncated_payloads() {
        let strict = DecodeOptions::dag_cbor();
        assert!(matches!(
            tokens(&input(&[0x63, b'a']), &strict),
            Err(DecodeError::Truncated { .. })
        ));
        assert!(matches!(
            tokens(&input(&[0x19, 0x01]), &strict),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        assert_eq!(
            tokens(&input(&[0x61, 0xff]), &DecodeOptions::dag_cbor()),
            Err(DecodeError::InvalidUtf8 { offset: 0 })
        );
    }

    #[test]
    fn test_half_floats() {
        assert_eq!(f16_to_f64(0x3c00), 1.0);
        assert_eq!(f16_to_f64(0xc000), -2.0);
        assert_eq!(f16_to_f64(0x0001), 2f64.powi(-24));
        assert_eq!(f16_to_f64(0x7bff), 65504.0);
        assert!(f16_to_f64(0x7e00).is_nan());
        assert_eq!(f16_to_f64(0xfc00), f64::NEG_INFINITY);
    }

    #[test]
    fn test_dag_cbor_rejections() {
        let strict = DecodeOptions::dag_cbor();
        // NaN as float16
        assert!(tokens(&input(&[0xf9, 0x7e, 0x00]), &strict).is_err());
        // +Infinity as float64
        assert!(tokens(&input(&[0xfb, 0x7f, 0xf0, 0, 0, 0, 0, 0, 0]), &strict).is_err());
        assert!(tokens(&input(&[0xf7]), &strict).is_err());
        assert!(tokens(&input(&[0x9f, 0xff]), &strict).is_err());

        let lenient = DecodeOptions::lenient();
        assert_eq!(
            tokens(&input(&[0x9f, 0xff]), &lenient).unwrap(),
            vec![TokenValue::Array(Length::Indefinite), TokenValue::Break]
        );
        assert_eq!(
            tokens(&input(&[0xf7]), &lenient).unwrap(),
            vec![TokenValue::Undefined]
        );
    }

    #[test]
    fn test_indefinite_strings_always_rejected() {
        assert!(matches!(
            tokens(&input(&[0x5f, 0x41, 0x00, 0xff]), &DecodeOptions::lenient()),
            Err(DecodeError::UnsupportedValue { .. })
        ));
    }
}
