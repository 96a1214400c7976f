//! Variable-length-quantity integer encoding.
//!
//! Every numeric parameter in a Klipper command or response is encoded as a
//! signed LEB128-style VLQ: seven payload bits per byte, high bit set while
//! more bytes follow, sign-extended on decode. This keeps small values
//! (oids, short counters) to a single byte while still covering the full
//! `u32`/`i32` range used by clocks and intervals.

#[cfg(feature = "alloc")]
use alloc::vec::Vec;
#[cfg(feature = "std")]
use std::vec::Vec;

/// Appends the VLQ encoding of `value` to `out`.
pub fn encode_vlq(value: i64, out: &mut Vec<u8>) {
    let mut v = value;
    loop {
        let mut byte = (v & 0x7f) as u8;
        v >>= 7;
        let done = (v == 0 && byte & 0x40 == 0) || (v == -1 && byte & 0x40 != 0);
        if !done {
            byte |= 0x80;
        }
        out.push(byte);
        if done {
            break;
        }
    }
}

/// Decodes a single VLQ value from the start of `data`.
///
/// Returns the decoded value and the number of bytes consumed, or `None` if
/// `data` ends before a terminating byte (high bit clear) is found.
pub fn decode_vlq(data: &[u8]) -> Option<(i64, usize)> {
    let mut result: i64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in data.iter().enumerate() {
        result |= ((byte & 0x7f) as i64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            if shift < 64 && byte & 0x40 != 0 {
                result |= (-1i64) << shift;
            }
            return Some((result, i + 1));
        }
        if shift >= 63 {
            return None;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: i64) {
        let mut buf = Vec::new();
        encode_vlq(v, &mut buf);
        let (decoded, consumed) = decode_vlq(&buf).unwrap();
        assert_eq!(decoded, v, "roundtrip mismatch for {v}");
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn roundtrips_small_values() {
        for v in -5..=5 {
            roundtrip(v);
        }
    }

    #[test]
    fn roundtrips_boundaries() {
        roundtrip(0);
        roundtrip(63);
        roundtrip(64);
        roundtrip(-64);
        roundtrip(-65);
        roundtrip(i32::MAX as i64);
        roundtrip(i32::MIN as i64);
        roundtrip(u32::MAX as i64);
    }

    #[test]
    fn single_byte_for_small_magnitudes() {
        let mut buf = Vec::new();
        encode_vlq(5, &mut buf);
        assert_eq!(buf, vec![5]);
        buf.clear();
        encode_vlq(-1, &mut buf);
        assert_eq!(buf, vec![0x7f]);
    }

    #[test]
    fn incomplete_buffer_returns_none() {
        assert_eq!(decode_vlq(&[0x80, 0x80]), None);
        assert_eq!(decode_vlq(&[]), None);
    }
}
