//! Payload content decoding.
//!
//! A step's payload is configured as text plus an encoding tag. Decoding is
//! pure; the [`decode`] wrapper additionally absorbs malformed input into an
//! empty payload so a bad encoding never aborts a run.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use thiserror::Error;
use tracing::warn;

use crate::model::ContentEncoding;

// Standard alphabet, padding optional.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("hex payload has an odd number of digits")]
    OddHexLength,
    #[error("invalid hex digit {0:?}")]
    BadHexDigit(char),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Total decode: malformed input degrades to an empty payload with a warning.
pub fn decode(text: Option<&str>, encoding: ContentEncoding) -> Vec<u8> {
    match try_decode(text, encoding) {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!(%error, ?encoding, "payload decode failed, sending empty payload");
            Vec::new()
        }
    }
}

pub fn try_decode(text: Option<&str>, encoding: ContentEncoding) -> Result<Vec<u8>, DecodeError> {
    let text = text.unwrap_or_default();
    match encoding {
        ContentEncoding::Raw => Ok(text.as_bytes().to_vec()),
        ContentEncoding::Hex => decode_hex(text),
        ContentEncoding::Base64 => Ok(BASE64.decode(text)?),
        ContentEncoding::Escaped => Ok(decode_escaped(text)),
    }
}

fn decode_hex(text: &str) -> Result<Vec<u8>, DecodeError> {
    if text.len() % 2 != 0 {
        return Err(DecodeError::OddHexLength);
    }
    text.as_bytes()
        .chunks(2)
        .map(|pair| Ok(hex_value(pair[0])? << 4 | hex_value(pair[1])?))
        .collect()
}

fn hex_value(byte: u8) -> Result<u8, DecodeError> {
    (byte as char)
        .to_digit(16)
        .map(|v| v as u8)
        .ok_or(DecodeError::BadHexDigit(byte as char))
}

/// Interprets `\n`, `\t`, `\r`, `\\` and `\xHH`. Unknown escape sequences
/// pass through literally, as does a trailing backslash.
fn decode_escaped(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            push_char(&mut out, c);
            continue;
        }
        match chars.peek() {
            Some('n') => {
                chars.next();
                out.push(b'\n');
            }
            Some('t') => {
                chars.next();
                out.push(b'\t');
            }
            Some('r') => {
                chars.next();
                out.push(b'\r');
            }
            Some('\\') => {
                chars.next();
                out.push(b'\\');
            }
            Some('x') => {
                let mut look = chars.clone();
                look.next();
                let hi = look.next().and_then(|c| c.to_digit(16));
                let lo = look.next().and_then(|c| c.to_digit(16));
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    out.push((hi * 16 + lo) as u8);
                    chars = look;
                } else {
                    out.push(b'\\');
                }
            }
            _ => out.push(b'\\'),
        }
    }
    out
}

fn push_char(out: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}
