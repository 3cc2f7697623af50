//! Self-delimiting length prefix.
//!
//! 7 bits per byte, most significant group first. Every byte except the
//! last has bit 7 set.

/// Longest encoding of a `u64` (10 × 7 ≥ 64).
pub const MAX_LEN: usize = 10;

/// Number of bytes [`encode`] produces for `value`.
pub fn encoded_len(value: u64) -> usize {
    let mut len = 1;
    while value.checked_shr(7 * len as u32).unwrap_or(0) != 0 {
        len += 1;
    }
    len
}

/// Append the encoding of `value` to `out`.
pub fn encode(value: u64, out: &mut Vec<u8>) {
    let len = encoded_len(value);
    for i in (0..len).rev() {
        let group = (value >> (7 * i)) as u8 & 0x7f;
        out.push(if i > 0 { group | 0x80 } else { group });
    }
}

/// Decode a prefix from the start of `data`.
///
/// Returns the value and the number of bytes consumed, or `None` when the
/// input ends mid-prefix or the value would not fit in a `u64`.
pub fn decode(data: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, byte) in data.iter().take(MAX_LEN).enumerate() {
        if value >> 57 != 0 {
            return None;
        }
        value = (value << 7) | u64::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_sizes() {
        for (value, len) in [(0u64, 1usize), (127, 1), (128, 2), (16383, 2), (16384, 3)] {
            let mut out = Vec::new();
            encode(value, &mut out);
            assert_eq!(out.len(), len, "length for {value}");
            assert_eq!(encoded_len(value), len);
            assert_eq!(decode(&out), Some((value, len)));
        }
    }

    #[test]
    fn most_significant_group_first() {
        let mut out = Vec::new();
        encode(300, &mut out);
        assert_eq!(out, vec![0x82, 0x2c]);
    }

    #[test]
    fn max_value() {
        let mut out = Vec::new();
        encode(u64::MAX, &mut out);
        assert_eq!(out.len(), MAX_LEN);
        assert_eq!(decode(&out), Some((u64::MAX, MAX_LEN)));
    }

    #[test]
    fn incomplete_prefix() {
        assert_eq!(decode(&[0x81]), None);
        assert_eq!(decode(&[]), None);
    }

    #[test]
    fn trailing_bytes_are_left_alone() {
        assert_eq!(decode(&[0x05, 0xff, 0xff]), Some((5, 1)));
    }
}
