use crate::error::{DecodeError, Result};

const INVALID: u8 = 0xff;

const fn lookup_table(alphabet: &[u8]) -> [u8; 256] {
    let mut codes = [INVALID; 256];
    let mut i = 0;
    while i < alphabet.len() {
        codes[alphabet[i] as usize] = i as u8;
        i += 1;
    }
    codes
}

/// Power-of-two alphabet codec (base32, base64) per RFC 4648
#[derive(Debug, Clone, Copy)]
pub struct Rfc4648 {
    alphabet: &'static [u8],
    codes: [u8; 256],
    bits_per_char: u32,
    padding: bool,
}

/// Build an RFC 4648 codec for `alphabet`, which must have `2^bits_per_char` symbols.
pub const fn rfc4648(alphabet: &'static [u8], bits_per_char: u32, padding: bool) -> Rfc4648 {
    Rfc4648 {
        alphabet,
        codes: lookup_table(alphabet),
        bits_per_char,
        padding,
    }
}

impl Rfc4648 {
    /// Encode bytes. Always succeeds.
    pub fn encode(&self, data: &[u8]) -> String {
        let bpc = self.bits_per_char;
        let mask = (1u32 << bpc) - 1;
        let mut out = String::with_capacity((data.len() * 8).div_ceil(bpc as usize) + 2);

        let mut bits = 0u32;
        let mut buffer = 0u32;
        for &byte in data {
            buffer = ((buffer << 8) | u32::from(byte)) & 0xffff;
            bits += 8;
            while bits > bpc {
                bits -= bpc;
                out.push(self.alphabet[(mask & (buffer >> bits)) as usize] as char);
            }
        }

        if bits != 0 {
            out.push(self.alphabet[(mask & (buffer << (bpc - bits))) as usize] as char);
        }

        if self.padding {
            while (out.len() * bpc as usize) & 7 != 0 {
                out.push('=');
            }
        }

        out
    }

    /// Decode a string produced by [`Rfc4648::encode`].
    pub fn decode(&self, input: &str) -> Result<Vec<u8>> {
        let input = input.as_bytes();
        let bpc = self.bits_per_char;

        let mut end = input.len();
        if self.padding {
            while end > 0 && input[end - 1] == b'=' {
                end -= 1;
            }
        }

        let mut out = Vec::with_capacity(end * bpc as usize / 8);
        let mut bits = 0u32;
        let mut buffer = 0u32;
        for (position, &c) in input[..end].iter().enumerate() {
            let value = self.codes[c as usize];
            if value == INVALID {
                return Err(DecodeError::InvalidCharacter {
                    character: c as char,
                    position,
                });
            }
            buffer = ((buffer << bpc) | u32::from(value)) & 0xffff;
            bits += bpc;
            if bits >= 8 {
                bits -= 8;
                out.push((buffer >> bits) as u8);
            }
        }

        if bits >= bpc || (buffer << (8 - bits)) & 0xff != 0 {
            return Err(DecodeError::BadPadding);
        }

        Ok(out)
    }
}

/// Arbitrary-radix alphabet codec (base58) using repeated division
#[derive(Debug, Clone, Copy)]
pub struct BaseX {
    alphabet: &'static [u8],
    codes: [u8; 256],
}

/// Build a base-x codec; the radix is the alphabet length.
pub const fn base_x(alphabet: &'static [u8]) -> BaseX {
    BaseX {
        alphabet,
        codes: lookup_table(alphabet),
    }
}

impl BaseX {
    fn radix(&self) -> u32 {
        self.alphabet.len() as u32
    }

    /// Encode bytes. Leading zero bytes become leading zero symbols.
    pub fn encode(&self, data: &[u8]) -> String {
        let zeros = data.iter().take_while(|&&b| b == 0).count();
        let radix = self.radix();

        // little-endian digits in the target radix
        let mut digits: Vec<u8> = Vec::with_capacity(data.len() * 138 / 100 + 1);
        for &byte in &data[zeros..] {
            let mut carry = u32::from(byte);
            for digit in digits.iter_mut() {
                carry += u32::from(*digit) << 8;
                *digit = (carry % radix) as u8;
                carry /= radix;
            }
            while carry > 0 {
                digits.push((carry % radix) as u8);
                carry /= radix;
            }
        }

        let mut out = String::with_capacity(zeros + digits.len());
        out.extend(std::iter::repeat_n(self.alphabet[0] as char, zeros));
        out.extend(digits.iter().rev().map(|&d| self.alphabet[d as usize] as char));
        out
    }

    /// Decode a base-x string.
    pub fn decode(&self, input: &str) -> Result<Vec<u8>> {
        let input = input.as_bytes();
        let zero = self.alphabet[0];
        let zeros = input.iter().take_while(|&&c| c == zero).count();
        let radix = self.radix();

        let mut bytes: Vec<u8> = Vec::with_capacity(input.len() * 733 / 1000 + 1);
        for (position, &c) in input.iter().enumerate().skip(zeros) {
            let value = self.codes[c as usize];
            if value == INVALID {
                return Err(DecodeError::InvalidCharacter {
                    character: c as char,
                    position,
                });
            }
            let mut carry = u32::from(value);
            for byte in bytes.iter_mut() {
                carry += u32::from(*byte) * radix;
                *byte = (carry & 0xff) as u8;
                carry >>= 8;
            }
            while carry > 0 {
                bytes.push((carry & 0xff) as u8);
                carry >>= 8;
            }
        }

        let mut out = vec![0u8; zeros];
        out.extend(bytes.iter().rev());
        Ok(out)
    }
}

/// RFC 4648 base32, lowercase, unpadded (multibase `b`)
pub const BASE32: Rfc4648 = rfc4648(b"abcdefghijklmnopqrstuvwxyz234567", 5, false);
/// RFC 4648 base64, unpadded (multibase `m`)
pub const BASE64: Rfc4648 = rfc4648(
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/",
    6,
    false,
);
/// RFC 4648 base64, padded (multibase `M`)
pub const BASE64_PAD: Rfc4648 = rfc4648(
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/",
    6,
    true,
);
/// RFC 4648 URL-safe base64, unpadded (multibase `u`)
pub const BASE64_URL: Rfc4648 = rfc4648(
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_",
    6,
    false,
);
/// Bitcoin base58 (multibase `z`)
pub const BASE58_BTC: BaseX = base_x(b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz");

/// Multibase encodings understood by this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Base {
    /// `b`
    Base32Lower,
    /// `z`
    Base58Btc,
    /// `m`
    Base64,
    /// `M`
    Base64Pad,
    /// `u`
    Base64Url,
}

impl Base {
    /// The single-character multibase prefix
    pub fn prefix(self) -> char {
        match self {
            Base::Base32Lower => 'b',
            Base::Base58Btc => 'z',
            Base::Base64 => 'm',
            Base::Base64Pad => 'M',
            Base::Base64Url => 'u',
        }
    }

    /// Look up the base for a multibase prefix
    pub fn from_prefix(prefix: char) -> Result<Self> {
        Ok(match prefix {
            'b' => Base::Base32Lower,
            'z' => Base::Base58Btc,
            'm' => Base::Base64,
            'M' => Base::Base64Pad,
            'u' => Base::Base64Url,
            other => return Err(DecodeError::UnknownMultibase { prefix: other }),
        })
    }

    /// Encode without the prefix
    pub fn encode_raw(self, data: &[u8]) -> String {
        match self {
            Base::Base32Lower => BASE32.encode(data),
            Base::Base58Btc => BASE58_BTC.encode(data),
            Base::Base64 => BASE64.encode(data),
            Base::Base64Pad => BASE64_PAD.encode(data),
            Base::Base64Url => BASE64_URL.encode(data),
        }
    }

    /// Decode input that has no prefix
    pub fn decode_raw(self, input: &str) -> Result<Vec<u8>> {
        match self {
            Base::Base32Lower => BASE32.decode(input),
            Base::Base58Btc => BASE58_BTC.decode(input),
            Base::Base64 => BASE64.decode(input),
            Base::Base64Pad => BASE64_PAD.decode(input),
            Base::Base64Url => BASE64_URL.decode(input),
        }
    }
}

/// Encode with the multibase prefix for `base`
pub fn encode(base: Base, data: &[u8]) -> String {
    let mut out = String::new();
    out.push(base.prefix());
    out.push_str(&base.encode_raw(data));
    out
}

/// Decode a prefixed multibase string
pub fn decode(input: &str) -> Result<(Base, Vec<u8>)> {
    let mut chars = input.chars();
    let prefix = chars.next().ok_or(DecodeError::truncated("multibase prefix", 0))?;
    let base = Base::from_prefix(prefix)?;
    Ok((base, base.decode_raw(chars.as_str())?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base32_known_vectors() {
        // RFC 4648 section 10, lowercased and unpadded
        assert_eq!(BASE32.encode(b""), "");
        assert_eq!(BASE32.encode(b"f"), "my");
        assert_eq!(BASE32.encode(b"fo"), "mzxq");
        assert_eq!(BASE32.encode(b"foobar"), "mzxw6ytboi");
        assert_eq!(BASE32.decode("mzxw6ytboi").unwrap(), b"foobar");
    }

    #[test]
    fn test_base64_padding() {
        assert_eq!(BASE64_PAD.encode(b"f"), "Zg==");
        assert_eq!(BASE64.encode(b"f"), "Zg");
        assert_eq!(BASE64_PAD.decode("Zm8=").unwrap(), b"fo");
        assert_eq!(BASE64.decode("Zm8").unwrap(), b"fo");
    }

    #[test]
    fn test_invalid_character_is_reported() {
        assert_eq!(
            BASE32.decode("mz!q"),
            Err(DecodeError::InvalidCharacter {
                character: '!',
                position: 2
            })
        );
        assert!(matches!(
            BASE58_BTC.decode("0OIl"),
            Err(DecodeError::InvalidCharacter { position: 0, .. })
        ));
    }

    #[test]
    fn test_trailing_bits_must_be_zero() {
        // "mz" leaves nonzero bits after the single decoded byte
        assert_eq!(BASE32.decode("mz"), Err(DecodeError::BadPadding));
        // a lone base64 symbol cannot make a byte
        assert_eq!(BASE64.decode("Z"), Err(DecodeError::BadPadding));
    }

    #[test]
    fn test_base58_leading_zeros() {
        assert_eq!(BASE58_BTC.encode(&[0, 0, 1]), "112");
        assert_eq!(BASE58_BTC.decode("112").unwrap(), vec![0, 0, 1]);
        assert_eq!(BASE58_BTC.encode(b"hello world"), "StV1DL6CwTryKyV");
    }

    #[test]
    fn test_multibase_prefixes() {
        assert_eq!(encode(Base::Base32Lower, b"hi"), "bnbuq");
        assert_eq!(decode("bnbuq").unwrap(), (Base::Base32Lower, b"hi".to_vec()));
        assert_eq!(
            decode("?abc"),
            Err(DecodeError::UnknownMultibase { prefix: '?' })
        );
        assert!(matches!(decode(""), Err(DecodeError::Truncated { .. })));
    }
}
