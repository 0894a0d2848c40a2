// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Order-preserving key encoding
//!
//! Each value becomes one self-delimiting segment that starts with a type tag.
//! Comparing two encoded keys byte by byte gives the same answer as comparing
//! their values column by column, and a proper prefix of a key sorts before
//! the key itself. Histogram boundaries are stored in this form, so the
//! encoding must stay stable across releases.
//!
//! | value  | tag    | payload                                        |
//! |--------|--------|------------------------------------------------|
//! | null   | `0x01` | none                                           |
//! | bool   | `0x02` | `0x01` false, `0x02` true                      |
//! | int    | `0x10` | 8 bytes big-endian, sign bit flipped           |
//! | double | `0x20` | 8 bytes big-endian, IEEE total order transform |
//! | text   | `0x30` | UTF-8, `0x00` escaped as `0x00 0xFF`, then `0x00` |
//! | bytes  | `0x40` | raw, `0x00` escaped as `0x00 0xFF`, then `0x00`   |

use byteorder::{BigEndian, ByteOrder};
use dotdb_common::KeyValue;
use thiserror::Error;

const TAG_NULL: u8 = 0x01;
const TAG_BOOL: u8 = 0x02;
const TAG_INT: u8 = 0x10;
const TAG_DOUBLE: u8 = 0x20;
const TAG_TEXT: u8 = 0x30;
const TAG_BYTES: u8 = 0x40;

const TERMINATOR: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const SIGN_BIT: u64 = 1 << 63;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Truncated key segment at offset {0}")]
    Truncated(usize),

    #[error("Unknown key segment tag {tag:#04x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("Invalid UTF-8 in text segment at offset {0}")]
    InvalidUtf8(usize),
}

pub type KeyResult<T> = std::result::Result<T, KeyError>;

/// Encode a full key
pub fn encode_key(values: &[KeyValue]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 9);
    for value in values {
        encode_value_into(value, &mut out);
    }
    out
}

/// Append one segment to `out`
pub fn encode_value_into(value: &KeyValue, out: &mut Vec<u8>) {
    match value {
        KeyValue::Null => out.push(TAG_NULL),
        KeyValue::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(if *b { 0x02 } else { 0x01 });
        }
        KeyValue::Int(i) => {
            out.push(TAG_INT);
            push_u64(out, (*i as u64) ^ SIGN_BIT);
        }
        KeyValue::Double(d) => {
            out.push(TAG_DOUBLE);
            // -0.0 and 0.0 compare equal, so they share one encoding
            let bits = if *d == 0.0 { 0.0f64.to_bits() } else { d.to_bits() };
            let ordered = if bits & SIGN_BIT != 0 { !bits } else { bits ^ SIGN_BIT };
            push_u64(out, ordered);
        }
        KeyValue::Text(s) => {
            out.push(TAG_TEXT);
            push_escaped(out, s.as_bytes());
        }
        KeyValue::Bytes(bytes) => {
            out.push(TAG_BYTES);
            push_escaped(out, bytes);
        }
    }
}

fn push_u64(out: &mut Vec<u8>, value: u64) {
    let mut buf = [0u8; 8];
    BigEndian::write_u64(&mut buf, value);
    out.extend_from_slice(&buf);
}

fn push_escaped(out: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        out.push(b);
        if b == TERMINATOR {
            out.push(ESCAPED_ZERO);
        }
    }
    out.push(TERMINATOR);
}

/// Decode every segment of `bytes`
pub fn decode_key(bytes: &[u8]) -> KeyResult<Vec<KeyValue>> {
    let mut values = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let (value, next) = decode_segment(bytes, offset)?;
        values.push(value);
        offset = next;
    }
    Ok(values)
}

/// Fill `ends` with the end offset of every segment in `bytes`, without decoding payloads
pub fn segment_ends(bytes: &[u8], ends: &mut Vec<usize>) -> KeyResult<()> {
    ends.clear();
    let mut offset = 0;
    while offset < bytes.len() {
        offset = skip_segment(bytes, offset)?;
        ends.push(offset);
    }
    Ok(())
}

/// Printable form of a key, e.g. `{null,"1983",(long)7}`
pub fn key_string(values: &[KeyValue]) -> String {
    let parts: Vec<String> = values.iter().map(|value| value.to_string()).collect();
    format!("{{{}}}", parts.join(","))
}

pub fn key_string_from_bytes(bytes: &[u8]) -> KeyResult<String> {
    Ok(key_string(&decode_key(bytes)?))
}

fn decode_segment(bytes: &[u8], offset: usize) -> KeyResult<(KeyValue, usize)> {
    let tag = bytes[offset];
    let payload = offset + 1;
    match tag {
        TAG_NULL => Ok((KeyValue::Null, payload)),
        TAG_BOOL => match bytes.get(payload) {
            Some(0x01) => Ok((KeyValue::Bool(false), payload + 1)),
            Some(0x02) => Ok((KeyValue::Bool(true), payload + 1)),
            Some(other) => Err(KeyError::UnknownTag { tag: *other, offset: payload }),
            None => Err(KeyError::Truncated(offset)),
        },
        TAG_INT => {
            let raw = read_u64(bytes, payload)?;
            Ok((KeyValue::Int((raw ^ SIGN_BIT) as i64), payload + 8))
        }
        TAG_DOUBLE => {
            let raw = read_u64(bytes, payload)?;
            let bits = if raw & SIGN_BIT != 0 { raw ^ SIGN_BIT } else { !raw };
            Ok((KeyValue::Double(f64::from_bits(bits)), payload + 8))
        }
        TAG_TEXT => {
            let (raw, next) = read_escaped(bytes, payload)?;
            let text = String::from_utf8(raw).map_err(|_| KeyError::InvalidUtf8(payload))?;
            Ok((KeyValue::Text(text), next))
        }
        TAG_BYTES => {
            let (raw, next) = read_escaped(bytes, payload)?;
            Ok((KeyValue::Bytes(raw), next))
        }
        other => Err(KeyError::UnknownTag { tag: other, offset }),
    }
}

fn skip_segment(bytes: &[u8], offset: usize) -> KeyResult<usize> {
    let payload = offset + 1;
    match bytes[offset] {
        TAG_NULL => Ok(payload),
        TAG_BOOL => {
            if payload < bytes.len() {
                Ok(payload + 1)
            } else {
                Err(KeyError::Truncated(offset))
            }
        }
        TAG_INT | TAG_DOUBLE => {
            if payload + 8 <= bytes.len() {
                Ok(payload + 8)
            } else {
                Err(KeyError::Truncated(offset))
            }
        }
        TAG_TEXT | TAG_BYTES => {
            let mut i = payload;
            loop {
                match bytes.get(i) {
                    None => return Err(KeyError::Truncated(offset)),
                    Some(&TERMINATOR) if bytes.get(i + 1) == Some(&ESCAPED_ZERO) => i += 2,
                    Some(&TERMINATOR) => return Ok(i + 1),
                    Some(_) => i += 1,
                }
            }
        }
        other => Err(KeyError::UnknownTag { tag: other, offset }),
    }
}

fn read_u64(bytes: &[u8], offset: usize) -> KeyResult<u64> {
    bytes.get(offset..offset + 8).map(BigEndian::read_u64).ok_or(KeyError::Truncated(offset))
}

fn read_escaped(bytes: &[u8], offset: usize) -> KeyResult<(Vec<u8>, usize)> {
    let mut raw = Vec::new();
    let mut i = offset;
    loop {
        match bytes.get(i) {
            None => return Err(KeyError::Truncated(offset)),
            Some(&TERMINATOR) if bytes.get(i + 1) == Some(&ESCAPED_ZERO) => {
                raw.push(TERMINATOR);
                i += 2;
            }
            Some(&TERMINATOR) => return Ok((raw, i + 1)),
            Some(&b) => {
                raw.push(b);
                i += 1;
            }
        }
    }
}
