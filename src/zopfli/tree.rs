//! Huffman tree helpers: entropy estimates and canonical codes

use super::katajainen::length_limited_code_lengths;
use crate::Result;

/// Estimated bit cost per symbol from a histogram
///
/// Symbols that never occur are priced as if they occurred once.
pub fn calculate_entropy(counts: &[usize], bit_lengths: &mut [f64]) {
    let sum: usize = counts.iter().sum();
    let log2sum = if sum == 0 {
        (counts.len() as f64).log2()
    } else {
        (sum as f64).log2()
    };
    for (cost, &count) in bit_lengths.iter_mut().zip(counts) {
        *cost = if count == 0 {
            log2sum
        } else {
            log2sum - (count as f64).log2()
        };
        // rounding can leave a tiny negative instead of zero
        if *cost < 0.0 && *cost > -1e-5 {
            *cost = 0.0;
        }
    }
}

/// Optimal code lengths limited to `max_bits`
pub fn calculate_bit_lengths(
    counts: &[usize],
    max_bits: usize,
    bit_lengths: &mut [u32],
) -> Result<()> {
    length_limited_code_lengths(counts, max_bits, bit_lengths)
}

/// Canonical Huffman codes for the given lengths
pub fn lengths_to_symbols(lengths: &[u32], max_bits: u32, symbols: &mut [u32]) {
    let max_bits = max_bits as usize;
    let mut bl_count = vec![0u32; max_bits + 1];
    let mut next_code = vec![0u32; max_bits + 1];

    symbols.fill(0);
    for &len in lengths {
        bl_count[len as usize] += 1;
    }

    let mut code = 0u32;
    bl_count[0] = 0;
    for bits in 1..=max_bits {
        code = (code + bl_count[bits - 1]) << 1;
        next_code[bits] = code;
    }

    for (symbol, &len) in symbols.iter_mut().zip(lengths) {
        if len != 0 {
            *symbol = next_code[len as usize];
            next_code[len as usize] += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_codes() {
        // RFC 1951 section 3.2.2 example
        let lengths = [3, 3, 3, 3, 3, 2, 4, 4];
        let mut symbols = [0u32; 8];
        lengths_to_symbols(&lengths, 15, &mut symbols);
        assert_eq!(symbols, [0b010, 0b011, 0b100, 0b101, 0b110, 0b00, 0b1110, 0b1111]);
    }

    #[test]
    fn test_entropy() {
        let mut costs = [0f64; 4];
        calculate_entropy(&[2, 2, 4, 0], &mut costs);
        assert_eq!(costs[0], 2.0);
        assert_eq!(costs[2], 1.0);
        assert_eq!(costs[3], 3.0);

        calculate_entropy(&[0, 0, 0, 0], &mut costs);
        assert_eq!(costs, [2.0; 4]);

        calculate_entropy(&[5, 0, 0, 0], &mut costs);
        assert_eq!(costs[0], 0.0);
    }
}
