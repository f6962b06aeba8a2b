//! DEFLATE length and distance symbol tables

use super::MAX_MATCH;

/// Base match length for length symbols 257..=285
pub const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115,
    131, 163, 195, 227, 258,
];

/// Extra bits for length symbols 257..=285
pub const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

/// Base distance for distance symbols 0..=29
pub const DIST_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];

/// Extra bits for distance symbols 0..=29
pub const DIST_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

const fn build_length_symbols() -> [u16; MAX_MATCH + 1] {
    let mut table = [0u16; MAX_MATCH + 1];
    let mut length = 3;
    let mut sym = 0;
    while length <= MAX_MATCH {
        while sym + 1 < 28 && LENGTH_BASE[sym + 1] as usize <= length {
            sym += 1;
        }
        table[length] = 257 + sym as u16;
        length += 1;
    }
    // 258 has its own symbol
    table[MAX_MATCH] = 285;
    table
}

static LENGTH_SYMBOL: [u16; MAX_MATCH + 1] = build_length_symbols();

#[inline]
fn floor_log2(value: u32) -> u32 {
    31 - value.leading_zeros()
}

/// Literal/length symbol for a match length in `3..=258`
#[inline]
pub fn length_symbol(length: usize) -> usize {
    LENGTH_SYMBOL[length] as usize
}

/// Number of extra bits carried by a match length
#[inline]
pub fn length_extra_bits(length: usize) -> u32 {
    LENGTH_EXTRA[length_symbol(length) - 257] as u32
}

/// Value of the extra bits carried by a match length
#[inline]
pub fn length_extra_bits_value(length: usize) -> u32 {
    (length - LENGTH_BASE[length_symbol(length) - 257] as usize) as u32
}

/// Extra bits for a literal/length symbol (0 for literals)
#[inline]
pub fn length_symbol_extra_bits(symbol: usize) -> u32 {
    if (257..=285).contains(&symbol) {
        LENGTH_EXTRA[symbol - 257] as u32
    } else {
        0
    }
}

/// Distance symbol for a distance in `1..=32768`
#[inline]
pub fn dist_symbol(dist: usize) -> usize {
    if dist < 5 {
        dist.saturating_sub(1)
    } else {
        let l = floor_log2(dist as u32 - 1);
        let r = ((dist as u32 - 1) >> (l - 1)) & 1;
        (l * 2 + r) as usize
    }
}

/// Number of extra bits carried by a distance
#[inline]
pub fn dist_extra_bits(dist: usize) -> u32 {
    if dist < 5 {
        0
    } else {
        floor_log2(dist as u32 - 1) - 1
    }
}

/// Value of the extra bits carried by a distance
#[inline]
pub fn dist_extra_bits_value(dist: usize) -> u32 {
    if dist < 5 {
        0
    } else {
        let l = floor_log2(dist as u32 - 1);
        (dist as u32 - (1 + (1 << l))) & ((1 << (l - 1)) - 1)
    }
}

/// Extra bits for a distance symbol
#[inline]
pub fn dist_symbol_extra_bits(symbol: usize) -> u32 {
    DIST_EXTRA.get(symbol).copied().unwrap_or(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_symbols_match_bases() {
        for (i, &base) in LENGTH_BASE.iter().enumerate() {
            let length = base as usize;
            assert_eq!(length_symbol(length), 257 + i, "length {}", length);
            assert_eq!(length_extra_bits_value(length), 0);
        }
        assert_eq!(length_symbol(10), 264);
        assert_eq!(length_symbol(12), 265);
        assert_eq!(length_extra_bits_value(12), 1);
        assert_eq!(length_symbol(257), 284);
        assert_eq!(length_extra_bits(257), 5);
        assert_eq!(length_extra_bits_value(257), 30);
        assert_eq!(length_symbol(258), 285);
        assert_eq!(length_extra_bits(258), 0);
    }

    #[test]
    fn test_distance_symbols_match_bases() {
        for (i, &base) in DIST_BASE.iter().enumerate() {
            let dist = base as usize;
            assert_eq!(dist_symbol(dist), i, "dist {}", dist);
            assert_eq!(dist_extra_bits(dist), DIST_EXTRA[i] as u32);
            assert_eq!(dist_extra_bits_value(dist), 0);
        }
        assert_eq!(dist_symbol(32768), 29);
        assert_eq!(dist_extra_bits_value(32768), 8191);
        assert_eq!(dist_symbol(6), 4);
        assert_eq!(dist_extra_bits_value(6), 1);
    }
}
