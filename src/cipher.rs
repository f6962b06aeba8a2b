//! Byte-level obfuscation and checksums used by HPI archives
//!
//! Two unrelated legacy transforms live here: the archive-wide cipher keyed by
//! the header and the absolute stream position, and the per-chunk transform
//! keyed only by the byte index inside the chunk payload. Neither is
//! cryptographically meaningful.

/// Derive the effective cipher key from the header key field
///
/// A header key of zero means the archive is stored in the clear.
pub fn derive_key(header_key: u32) -> Option<u8> {
    if header_key == 0 {
        return None;
    }
    let k = header_key as u8;
    Some(!k.rotate_left(2))
}

/// Decrypt bytes read from absolute stream offset `position`
pub fn decrypt_in_place(key: u8, position: u64, data: &mut [u8]) {
    for (i, byte) in data.iter_mut().enumerate() {
        let tkey = (position.wrapping_add(i as u64) as u8) ^ key;
        *byte = !(tkey ^ *byte);
    }
}

/// Inverse of [`decrypt_in_place`]
pub fn encrypt_in_place(key: u8, position: u64, data: &mut [u8]) {
    // ~(t ^ b) is its own inverse
    decrypt_in_place(key, position, data);
}

/// Undo the per-chunk obfuscation: `b[j] = (b[j] - j) ^ j`
pub fn chunk_deobfuscate(data: &mut [u8]) {
    for (j, byte) in data.iter_mut().enumerate() {
        let j = j as u8;
        *byte = byte.wrapping_sub(j) ^ j;
    }
}

/// Apply the per-chunk obfuscation, inverse of [`chunk_deobfuscate`]
pub fn chunk_obfuscate(data: &mut [u8]) {
    for (j, byte) in data.iter_mut().enumerate() {
        let j = j as u8;
        *byte = (*byte ^ j).wrapping_add(j);
    }
}

/// 32-bit wrapping sum of all bytes
pub fn checksum(data: &[u8]) -> u32 {
    data.iter()
        .fold(0u32, |sum, &b| sum.wrapping_add(b as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_derivation() {
        assert_eq!(derive_key(0), None);
        // ~((0x7D << 2) | (0x7D >> 6)) = ~0xF5 = 0x0A
        assert_eq!(derive_key(0x7D), Some(0x0A));
        // only the low byte participates
        assert_eq!(derive_key(0x1234_567D), Some(0x0A));
    }

    #[test]
    fn test_container_cipher_round_trip() {
        let plain: Vec<u8> = (0..600).map(|i| (i * 7) as u8).collect();
        let mut data = plain.clone();
        encrypt_in_place(0x5C, 1000, &mut data);
        assert_ne!(data, plain);
        decrypt_in_place(0x5C, 1000, &mut data);
        assert_eq!(data, plain);
    }

    #[test]
    fn test_container_cipher_formula() {
        let mut data = [0x00u8, 0xFF];
        decrypt_in_place(0x0F, 0x10, &mut data);
        assert_eq!(data[0], !(0x10 ^ 0x0F ^ 0x00));
        assert_eq!(data[1], !(0x11 ^ 0x0F ^ 0xFF));
    }

    #[test]
    fn test_chunk_obfuscation_round_trip() {
        let plain: Vec<u8> = (0..300).map(|i| (i % 251) as u8).collect();
        let mut data = plain.clone();
        chunk_obfuscate(&mut data);
        chunk_deobfuscate(&mut data);
        assert_eq!(data, plain);

        let mut single = [0x10u8, 0x10, 0x10];
        chunk_deobfuscate(&mut single);
        assert_eq!(single, [0x10, 0x0F ^ 1, 0x0E ^ 2]);
    }

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[1, 2, 3]), 6);
        assert_eq!(checksum(&[0xFF; 4]), 0x3FC);
    }
}
