//! Order-preserving encodings for integers and strings embedded in keys.
//!
//! Encoded bytes compare (byte-lexicographically) in the same order as the
//! values they encode, and each encoding is self-delimiting so fields can be
//! concatenated into a key without ambiguity.
//!
//! ```text
//! uint    count(u8) | big-endian significant bytes      0 -> 00, 300 -> 02 01 2c
//! string  bytes with 00 escaped as 00 ff | 00 00        "a\0b" -> 61 00 ff 62 00 00
//! ```

use crate::{DecodeError, DecodeResult};

/// Appends `value` so that smaller values encode to smaller byte strings.
pub fn pack_uint_preserving_sort<T: Into<u64>>(out: &mut Vec<u8>, value: T) {
    let v: u64 = value.into();
    let len = (64 - v.leading_zeros() as usize + 7) / 8;
    out.push(len as u8);
    out.extend_from_slice(&v.to_be_bytes()[8 - len..]);
}

/// Decodes a value written by [`pack_uint_preserving_sort`], advancing `data`.
///
/// Non-canonical encodings (a leading zero byte) are rejected so that every
/// value has exactly one key representation.
pub fn unpack_uint_preserving_sort<T: TryFrom<u64>>(data: &mut &[u8]) -> DecodeResult<T> {
    let (&len, rest) = data.split_first().ok_or(DecodeError::OutOfData)?;
    let len = usize::from(len);
    if len > 8 {
        return Err(DecodeError::Overflow);
    }
    if rest.len() < len {
        return Err(DecodeError::OutOfData);
    }
    let (bytes, rest) = rest.split_at(len);
    if bytes.first() == Some(&0) {
        return Err(DecodeError::Invalid("leading zero in sortable integer".into()));
    }
    let value = bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    *data = rest;
    T::try_from(value).map_err(|_| DecodeError::Overflow)
}

/// Appends `s` escaped and terminated so that concatenated keys keep the
/// lexicographic order of `s`.
pub fn pack_string_preserving_sort(out: &mut Vec<u8>, s: &[u8]) {
    for &b in s {
        out.push(b);
        if b == 0 {
            out.push(0xff);
        }
    }
    out.extend_from_slice(&[0, 0]);
}

/// Decodes a string written by [`pack_string_preserving_sort`], advancing
/// `data` past the terminator.
pub fn unpack_string_preserving_sort(data: &mut &[u8]) -> DecodeResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut i = 0;
    loop {
        let b = *data.get(i).ok_or(DecodeError::OutOfData)?;
        i += 1;
        if b != 0 {
            out.push(b);
            continue;
        }
        match data.get(i) {
            None => return Err(DecodeError::OutOfData),
            Some(0) => {
                i += 1;
                break;
            }
            Some(0xff) => {
                i += 1;
                out.push(0);
            }
            Some(&other) => {
                return Err(DecodeError::Invalid(format!(
                    "bad escape byte {:#04x} in sortable string",
                    other
                )))
            }
        }
    }
    *data = &data[i..];
    Ok(out)
}
