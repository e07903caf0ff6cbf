//! Centralized on-disk checksum and native-endian codec.
//!
//! Design Notes (spec.md §9): native-endian integers are an intentional
//! performance choice; every place that reads or writes them goes
//! through this module, so a future endian-portable variant is a
//! single change.

/// Sum of 32-bit little-native words, folded with a device-wide salt.
///
/// `data.len()` need not be a multiple of 4; a short trailing tail is
/// summed byte-wise. The salt is XORed into the running sum rather than
/// appended, so a header checksummed with the wrong device's salt is
/// vanishingly unlikely to validate by chance.
#[must_use]
pub fn checksum(data: &[u8], salt: u32) -> u32 {
    let mut sum = salt;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let word = u32::from_ne_bytes(chunk.try_into().unwrap());
        sum = sum.wrapping_add(word);
    }
    let rem = chunks.remainder();
    if !rem.is_empty() {
        let mut buf = [0u8; 4];
        buf[..rem.len()].copy_from_slice(rem);
        sum = sum.wrapping_add(u32::from_ne_bytes(buf));
    }
    !sum
}

/// Verifies that `data` (with its embedded checksum field already zeroed
/// by the caller before the field was filled in) checksums to `expected`.
#[must_use]
pub fn verify(data: &[u8], salt: u32, expected: u32) -> bool {
    checksum(data, salt) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_same_checksum() {
        let data = [1u8, 2, 3, 4, 5, 6, 7];
        assert_eq!(checksum(&data, 42), checksum(&data, 42));
    }

    #[test]
    fn different_salt_differs() {
        let data = [1u8, 2, 3, 4];
        assert_ne!(checksum(&data, 1), checksum(&data, 2));
    }

    #[test]
    fn verify_round_trips() {
        let data = [9u8, 9, 9, 9, 9];
        let sum = checksum(&data, 7);
        assert!(verify(&data, 7, sum));
        assert!(!verify(&data, 7, sum.wrapping_add(1)));
    }
}
