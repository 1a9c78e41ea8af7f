//! Unsigned varints and the other length-carrying integer encodings.
//!
//! ```text
//! pack_uint        7 payload bits per byte, low group first, high bit = more
//! pack_uint_last   little-endian, no length, occupies the rest of the buffer
//! pack_string      pack_uint(len) | bytes
//! ```

use crate::{DecodeError, DecodeResult};

/// Appends `value` as a varint.
pub fn pack_uint<T: Into<u64>>(out: &mut Vec<u8>, value: T) {
    let mut v: u64 = value.into();
    while v >= 0x80 {
        out.push((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

/// Decodes a varint from the front of `data`, advancing it.
///
/// Returns [`DecodeError::OutOfData`] if the buffer ends while the
/// continuation bit is still set, and [`DecodeError::Overflow`] if the value
/// needs more bits than `T` has. On overflow the whole varint is still
/// consumed.
pub fn unpack_uint<T: TryFrom<u64>>(data: &mut &[u8]) -> DecodeResult<T> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    let mut overflow = false;
    let mut i = 0;
    loop {
        let byte = *data.get(i).ok_or(DecodeError::OutOfData)?;
        i += 1;
        let bits = u64::from(byte & 0x7f);
        if shift < 64 {
            let shifted = bits << shift;
            if shifted >> shift != bits {
                overflow = true;
            }
            value |= shifted;
        } else if bits != 0 {
            overflow = true;
        }
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    *data = &data[i..];
    if overflow {
        return Err(DecodeError::Overflow);
    }
    T::try_from(value).map_err(|_| DecodeError::Overflow)
}

/// Appends `value` little-endian with no length marker.
///
/// Only usable as the final field of a buffer: the decoder takes all
/// remaining bytes. Zero encodes as no bytes at all.
pub fn pack_uint_last<T: Into<u64>>(out: &mut Vec<u8>, value: T) {
    let mut v: u64 = value.into();
    while v != 0 {
        out.push(v as u8);
        v >>= 8;
    }
}

/// Decodes a value written by [`pack_uint_last`] from all of `data`.
pub fn unpack_uint_last<T: TryFrom<u64>>(data: &[u8]) -> DecodeResult<T> {
    let mut value: u64 = 0;
    for &b in data.iter().rev() {
        if value >> 56 != 0 {
            return Err(DecodeError::Overflow);
        }
        value = (value << 8) | u64::from(b);
    }
    T::try_from(value).map_err(|_| DecodeError::Overflow)
}

/// Appends `s` prefixed by its varint length.
pub fn pack_string(out: &mut Vec<u8>, s: &[u8]) {
    pack_uint(out, s.len() as u64);
    out.extend_from_slice(s);
}

/// Decodes a length-prefixed string, advancing `data`.
pub fn unpack_string<'a>(data: &mut &'a [u8]) -> DecodeResult<&'a [u8]> {
    let len: usize = unpack_uint(data)?;
    if len > data.len() {
        return Err(DecodeError::OutOfData);
    }
    let (s, rest) = data.split_at(len);
    *data = rest;
    Ok(s)
}
