//! DEFLATE block cost estimation and emission

use log::trace;

use super::lz77::{BlockState, Lz77Store};
use super::squeeze::lz77_optimal_fixed;
use super::symbols::{
    dist_extra_bits, dist_extra_bits_value, dist_symbol, dist_symbol_extra_bits,
    length_extra_bits, length_extra_bits_value, length_symbol, length_symbol_extra_bits,
};
use super::tree::{calculate_bit_lengths, lengths_to_symbols};
use super::{BlockType, ZopfliOptions, NUM_D, NUM_LL};
use crate::bitstream::BitWriter;
use crate::Result;

/// Largest payload of a single stored block
const MAX_STORED_BLOCK: usize = 65535;

/// Order in which code length code lengths are transmitted
const CL_ORDER: [usize; 19] = [16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15];

type LlLengths = [u32; NUM_LL];
type DLengths = [u32; NUM_D];

fn fixed_tree() -> (LlLengths, DLengths) {
    let mut ll = [0u32; NUM_LL];
    ll[..144].fill(8);
    ll[144..256].fill(9);
    ll[256..280].fill(7);
    ll[280..].fill(8);
    (ll, [5; NUM_D])
}

/// Ensure at least two distance codes exist; some inflaters reject fewer
fn patch_distance_codes(d_lengths: &mut DLengths) {
    let used = d_lengths[..30].iter().filter(|&&l| l != 0).count();
    match used {
        0 => {
            d_lengths[0] = 1;
            d_lengths[1] = 1;
        }
        1 => {
            let slot = if d_lengths[0] != 0 { 1 } else { 0 };
            d_lengths[slot] = 1;
        }
        _ => {}
    }
}

/// Run-length encode the code lengths and optionally emit the tree
///
/// Returns the size of the encoded tree in bits.
fn encode_tree(
    ll_lengths: &LlLengths,
    d_lengths: &DLengths,
    use_16: bool,
    use_17: bool,
    use_18: bool,
    mut out: Option<&mut BitWriter>,
) -> Result<usize> {
    let emit = out.is_some();
    let mut rle: Vec<usize> = Vec::new();
    let mut rle_bits: Vec<u32> = Vec::new();
    let mut cl_counts = [0usize; 19];

    let mut hlit = 29;
    while hlit > 0 && ll_lengths[257 + hlit - 1] == 0 {
        hlit -= 1;
    }
    let mut hdist = 29;
    while hdist > 0 && d_lengths[hdist] == 0 {
        hdist -= 1;
    }
    let hlit2 = hlit + 257;
    let lld_total = hlit2 + hdist + 1;
    let length_at = |i: usize| -> usize {
        if i < hlit2 {
            ll_lengths[i] as usize
        } else {
            d_lengths[i - hlit2] as usize
        }
    };

    let mut i = 0;
    while i < lld_total {
        let symbol = length_at(i);
        let mut count = 1;
        if use_16 || (symbol == 0 && (use_17 || use_18)) {
            let mut j = i + 1;
            while j < lld_total && length_at(j) == symbol {
                count += 1;
                j += 1;
            }
        }
        i += count;

        if symbol == 0 && count >= 3 {
            if use_18 {
                while count >= 11 {
                    let run = count.min(138);
                    if emit {
                        rle.push(18);
                        rle_bits.push((run - 11) as u32);
                    }
                    cl_counts[18] += 1;
                    count -= run;
                }
            }
            if use_17 {
                while count >= 3 {
                    let run = count.min(10);
                    if emit {
                        rle.push(17);
                        rle_bits.push((run - 3) as u32);
                    }
                    cl_counts[17] += 1;
                    count -= run;
                }
            }
        }

        if use_16 && count >= 4 {
            // the first occurrence is sent literally
            count -= 1;
            cl_counts[symbol] += 1;
            if emit {
                rle.push(symbol);
                rle_bits.push(0);
            }
            while count >= 3 {
                let run = count.min(6);
                if emit {
                    rle.push(16);
                    rle_bits.push((run - 3) as u32);
                }
                cl_counts[16] += 1;
                count -= run;
            }
        }

        cl_counts[symbol] += count;
        if emit {
            for _ in 0..count {
                rle.push(symbol);
                rle_bits.push(0);
            }
        }
    }

    let mut cl_lengths = [0u32; 19];
    calculate_bit_lengths(&cl_counts, 7, &mut cl_lengths)?;

    let mut hclen = 15;
    while hclen > 0 && cl_counts[CL_ORDER[hclen + 4 - 1]] == 0 {
        hclen -= 1;
    }

    if let Some(out) = out.as_deref_mut() {
        let mut cl_symbols = [0u32; 19];
        lengths_to_symbols(&cl_lengths, 7, &mut cl_symbols);

        out.write_bits(hlit as u32, 5);
        out.write_bits(hdist as u32, 5);
        out.write_bits(hclen as u32, 4);
        for &symbol in CL_ORDER.iter().take(hclen + 4) {
            out.write_bits(cl_lengths[symbol], 3);
        }
        for (&symbol, &extra) in rle.iter().zip(rle_bits.iter()) {
            out.write_huffman_bits(cl_symbols[symbol], cl_lengths[symbol]);
            match symbol {
                16 => out.write_bits(extra, 2),
                17 => out.write_bits(extra, 3),
                18 => out.write_bits(extra, 7),
                _ => {}
            }
        }
    }

    let mut size = 14 + (hclen + 4) * 3;
    for (&len, &count) in cl_lengths.iter().zip(cl_counts.iter()) {
        size += len as usize * count;
    }
    size += cl_counts[16] * 2 + cl_counts[17] * 3 + cl_counts[18] * 7;
    Ok(size)
}

/// Pick the cheapest combination of repeat codes
fn best_tree_flags(ll_lengths: &LlLengths, d_lengths: &DLengths) -> Result<(u8, usize)> {
    let mut best = 0u8;
    let mut best_size = 0usize;
    for flags in 0..8u8 {
        let size = encode_tree(
            ll_lengths,
            d_lengths,
            flags & 1 != 0,
            flags & 2 != 0,
            flags & 4 != 0,
            None,
        )?;
        if best_size == 0 || size < best_size {
            best_size = size;
            best = flags;
        }
    }
    Ok((best, best_size))
}

fn add_dynamic_tree(
    ll_lengths: &LlLengths,
    d_lengths: &DLengths,
    out: &mut BitWriter,
) -> Result<()> {
    let (flags, _) = best_tree_flags(ll_lengths, d_lengths)?;
    encode_tree(ll_lengths, d_lengths, flags & 1 != 0, flags & 2 != 0, flags & 4 != 0, Some(out))?;
    Ok(())
}

fn calculate_tree_size(ll_lengths: &LlLengths, d_lengths: &DLengths) -> Result<usize> {
    best_tree_flags(ll_lengths, d_lengths).map(|(_, size)| size)
}

fn block_symbol_size_small(
    ll_lengths: &LlLengths,
    d_lengths: &DLengths,
    lz77: &Lz77Store,
    lstart: usize,
    lend: usize,
) -> usize {
    let mut result = 0;
    for i in lstart..lend {
        let litlen = lz77.litlens[i] as usize;
        let dist = lz77.dists[i] as usize;
        if dist == 0 {
            result += ll_lengths[litlen] as usize;
        } else {
            let ll = length_symbol(litlen);
            let d = dist_symbol(dist);
            result += ll_lengths[ll] as usize + d_lengths[d] as usize;
            result += (length_symbol_extra_bits(ll) + dist_symbol_extra_bits(d)) as usize;
        }
    }
    result + ll_lengths[256] as usize
}

fn block_symbol_size_given_counts(
    ll_counts: &[usize; NUM_LL],
    d_counts: &[usize; NUM_D],
    ll_lengths: &LlLengths,
    d_lengths: &DLengths,
    lz77: &Lz77Store,
    lstart: usize,
    lend: usize,
) -> usize {
    if lstart + NUM_LL * 3 > lend {
        return block_symbol_size_small(ll_lengths, d_lengths, lz77, lstart, lend);
    }
    let mut result = 0;
    for i in 0..256 {
        result += ll_lengths[i] as usize * ll_counts[i];
    }
    for i in 257..286 {
        result += ll_lengths[i] as usize * ll_counts[i];
        result += length_symbol_extra_bits(i) as usize * ll_counts[i];
    }
    for i in 0..30 {
        result += d_lengths[i] as usize * d_counts[i];
        result += dist_symbol_extra_bits(i) as usize * d_counts[i];
    }
    result + ll_lengths[256] as usize
}

fn block_symbol_size(
    ll_lengths: &LlLengths,
    d_lengths: &DLengths,
    lz77: &Lz77Store,
    lstart: usize,
    lend: usize,
) -> usize {
    if lstart + NUM_LL * 3 > lend {
        block_symbol_size_small(ll_lengths, d_lengths, lz77, lstart, lend)
    } else {
        let (ll_counts, d_counts) = lz77.histogram(lstart, lend);
        block_symbol_size_given_counts(
            &ll_counts, &d_counts, ll_lengths, d_lengths, lz77, lstart, lend,
        )
    }
}

/// Nudge a histogram so the run-length coded tree gets shorter
fn optimize_huffman_for_rle(counts: &mut [usize]) {
    // trailing zeros are left alone
    let mut length = counts.len();
    while length > 0 && counts[length - 1] == 0 {
        length -= 1;
    }
    if length == 0 {
        return;
    }
    let counts = &mut counts[..length];

    // Mark runs that already encode well: 5+ zeros or 7+ equal non-zeros
    let mut good_for_rle = vec![false; length];
    let mut symbol = counts[0];
    let mut stride = 0;
    for i in 0..=length {
        if i == length || counts[i] != symbol {
            if (symbol == 0 && stride >= 5) || (symbol != 0 && stride >= 7) {
                for k in 0..stride {
                    good_for_rle[i - k - 1] = true;
                }
            }
            stride = 1;
            if i != length {
                symbol = counts[i];
            }
        } else {
            stride += 1;
        }
    }

    // Collapse near-equal strides into their average
    let mut stride = 0;
    let mut limit = counts[0];
    let mut sum = 0;
    for i in 0..=length {
        if i == length || good_for_rle[i] || counts[i].abs_diff(limit) >= 4 {
            if stride >= 4 || (stride >= 3 && sum == 0) {
                let mut count = ((sum + stride / 2) / stride).max(1);
                if sum == 0 {
                    count = 0;
                }
                for k in 0..stride {
                    counts[i - k - 1] = count;
                }
            }
            stride = 0;
            sum = 0;
            limit = if i + 3 < length {
                (counts[i] + counts[i + 1] + counts[i + 2] + counts[i + 3] + 2) / 4
            } else if i < length {
                counts[i]
            } else {
                0
            };
        }
        stride += 1;
        if i != length {
            sum += counts[i];
        }
    }
}

/// Keep the RLE-friendlier code lengths when they shrink tree plus data
fn try_optimize_huffman_for_rle(
    lz77: &Lz77Store,
    lstart: usize,
    lend: usize,
    ll_counts: &[usize; NUM_LL],
    d_counts: &[usize; NUM_D],
    ll_lengths: &mut LlLengths,
    d_lengths: &mut DLengths,
) -> Result<f64> {
    let tree_size = calculate_tree_size(ll_lengths, d_lengths)?;
    let data_size = block_symbol_size_given_counts(
        ll_counts, d_counts, ll_lengths, d_lengths, lz77, lstart, lend,
    );

    let mut ll_counts2 = *ll_counts;
    let mut d_counts2 = *d_counts;
    optimize_huffman_for_rle(&mut ll_counts2);
    optimize_huffman_for_rle(&mut d_counts2);
    let mut ll_lengths2 = [0u32; NUM_LL];
    let mut d_lengths2 = [0u32; NUM_D];
    calculate_bit_lengths(&ll_counts2, 15, &mut ll_lengths2)?;
    calculate_bit_lengths(&d_counts2, 15, &mut d_lengths2)?;
    patch_distance_codes(&mut d_lengths2);

    let tree_size2 = calculate_tree_size(&ll_lengths2, &d_lengths2)?;
    let data_size2 = block_symbol_size_given_counts(
        ll_counts,
        d_counts,
        &ll_lengths2,
        &d_lengths2,
        lz77,
        lstart,
        lend,
    );

    if tree_size2 + data_size2 < tree_size + data_size {
        *ll_lengths = ll_lengths2;
        *d_lengths = d_lengths2;
        return Ok((tree_size2 + data_size2) as f64);
    }
    Ok((tree_size + data_size) as f64)
}

/// Code lengths for a dynamic block; returns tree plus data size in bits
fn dynamic_lengths(
    lz77: &Lz77Store,
    lstart: usize,
    lend: usize,
    ll_lengths: &mut LlLengths,
    d_lengths: &mut DLengths,
) -> Result<f64> {
    let (mut ll_counts, d_counts) = lz77.histogram(lstart, lend);
    ll_counts[256] = 1;
    calculate_bit_lengths(&ll_counts, 15, ll_lengths)?;
    calculate_bit_lengths(&d_counts, 15, d_lengths)?;
    patch_distance_codes(d_lengths);
    try_optimize_huffman_for_rle(lz77, lstart, lend, &ll_counts, &d_counts, ll_lengths, d_lengths)
}

/// Size in bits of entries `lstart..lend` encoded as one block of `btype`
pub fn calculate_block_size(
    lz77: &Lz77Store,
    lstart: usize,
    lend: usize,
    btype: BlockType,
) -> Result<f64> {
    match btype {
        BlockType::Stored => {
            let length = lz77.byte_range(lstart, lend);
            let blocks = length.div_ceil(MAX_STORED_BLOCK);
            // 3 header bits, padding, LEN and NLEN per block
            Ok((blocks * 5 * 8 + length * 8) as f64)
        }
        BlockType::Fixed => {
            let (ll, d) = fixed_tree();
            Ok(3.0 + block_symbol_size(&ll, &d, lz77, lstart, lend) as f64)
        }
        BlockType::Dynamic => {
            let mut ll = [0u32; NUM_LL];
            let mut d = [0u32; NUM_D];
            Ok(3.0 + dynamic_lengths(lz77, lstart, lend, &mut ll, &mut d)?)
        }
    }
}

/// Size in bits of the cheapest block type for entries `lstart..lend`
pub fn calculate_block_size_auto_type(lz77: &Lz77Store, lstart: usize, lend: usize) -> Result<f64> {
    let stored = calculate_block_size(lz77, lstart, lend, BlockType::Stored)?;
    // large blocks are unlikely to benefit from the fixed tree
    let fixed = if lz77.len() > 1000 {
        stored
    } else {
        calculate_block_size(lz77, lstart, lend, BlockType::Fixed)?
    };
    let dynamic = calculate_block_size(lz77, lstart, lend, BlockType::Dynamic)?;
    Ok(if stored < fixed && stored < dynamic {
        stored
    } else {
        fixed.min(dynamic)
    })
}

/// Emit `data[start..end]` as stored blocks of at most 65535 bytes
pub fn add_non_compressed_block(
    is_final: bool,
    data: &[u8],
    start: usize,
    end: usize,
    out: &mut BitWriter,
) {
    let mut pos = start;
    loop {
        let block_size = MAX_STORED_BLOCK.min(end - pos);
        let current_final = pos + block_size >= end;
        let nlen = !(block_size as u16);

        out.write_bit(is_final && current_final);
        out.write_bit(false);
        out.write_bit(false);
        out.align_to_byte();

        out.write_bytes(&(block_size as u16).to_le_bytes());
        out.write_bytes(&nlen.to_le_bytes());
        out.write_bytes(&data[pos..pos + block_size]);

        if current_final {
            break;
        }
        pos += block_size;
    }
}

fn add_lz77_data(
    lz77: &Lz77Store,
    lstart: usize,
    lend: usize,
    ll_symbols: &[u32; NUM_LL],
    ll_lengths: &LlLengths,
    d_symbols: &[u32; NUM_D],
    d_lengths: &DLengths,
    out: &mut BitWriter,
) -> usize {
    let mut written = 0;
    for i in lstart..lend {
        let litlen = lz77.litlens[i] as usize;
        let dist = lz77.dists[i] as usize;
        if dist == 0 {
            out.write_huffman_bits(ll_symbols[litlen], ll_lengths[litlen]);
            written += 1;
        } else {
            let ll = length_symbol(litlen);
            let d = dist_symbol(dist);
            out.write_huffman_bits(ll_symbols[ll], ll_lengths[ll]);
            out.write_bits(length_extra_bits_value(litlen), length_extra_bits(litlen));
            out.write_huffman_bits(d_symbols[d], d_lengths[d]);
            out.write_bits(dist_extra_bits_value(dist), dist_extra_bits(dist));
            written += litlen;
        }
    }
    written
}

/// Emit entries `lstart..lend` as one block of the given type
pub fn add_lz77_block(
    btype: BlockType,
    is_final: bool,
    data: &[u8],
    lz77: &Lz77Store,
    lstart: usize,
    lend: usize,
    expected_data_size: usize,
    out: &mut BitWriter,
) -> Result<()> {
    let (ll_lengths, d_lengths) = match btype {
        BlockType::Stored => {
            let length = lz77.byte_range(lstart, lend);
            let pos = if lstart == lend { 0 } else { lz77.pos[lstart] };
            add_non_compressed_block(is_final, data, pos, pos + length, out);
            return Ok(());
        }
        BlockType::Fixed => {
            out.write_bit(is_final);
            out.write_bits(1, 2);
            fixed_tree()
        }
        BlockType::Dynamic => {
            out.write_bit(is_final);
            out.write_bits(2, 2);
            let mut ll = [0u32; NUM_LL];
            let mut d = [0u32; NUM_D];
            dynamic_lengths(lz77, lstart, lend, &mut ll, &mut d)?;
            let before = out.bit_len();
            add_dynamic_tree(&ll, &d, out)?;
            trace!("tree size: {} bits", out.bit_len() - before);
            (ll, d)
        }
    };

    let mut ll_symbols = [0u32; NUM_LL];
    let mut d_symbols = [0u32; NUM_D];
    lengths_to_symbols(&ll_lengths, 15, &mut ll_symbols);
    lengths_to_symbols(&d_lengths, 15, &mut d_symbols);

    let written = add_lz77_data(
        lz77,
        lstart,
        lend,
        &ll_symbols,
        &ll_lengths,
        &d_symbols,
        &d_lengths,
        out,
    );
    debug_assert!(expected_data_size == 0 || written == expected_data_size);
    out.write_huffman_bits(ll_symbols[256], ll_lengths[256]);
    Ok(())
}

/// Emit entries `lstart..lend` using whichever block type is smallest
pub fn add_lz77_block_auto_type(
    options: &ZopfliOptions,
    is_final: bool,
    data: &[u8],
    lz77: &Lz77Store,
    lstart: usize,
    lend: usize,
    expected_data_size: usize,
    out: &mut BitWriter,
) -> Result<()> {
    if lstart == lend {
        // the smallest empty block is a fixed one holding only end-of-block
        out.write_bit(is_final);
        out.write_bits(1, 2);
        out.write_bits(0, 7);
        return Ok(());
    }

    let stored = calculate_block_size(lz77, lstart, lend, BlockType::Stored)?;
    let fixed = calculate_block_size(lz77, lstart, lend, BlockType::Fixed)?;
    let dynamic = calculate_block_size(lz77, lstart, lend, BlockType::Dynamic)?;

    // Re-parsing for the fixed tree only pays off for small or fixed-friendly blocks
    let expensive_fixed = lz77.len() < 1000 || fixed <= dynamic * 1.1;
    let mut fixed_cost = fixed;
    let mut fixed_store = None;
    if expensive_fixed {
        let start = lz77.pos[lstart];
        let end = start + lz77.byte_range(lstart, lend);
        let mut state = BlockState::new(options, start, end, true);
        let store = lz77_optimal_fixed(&mut state, data, start, end);
        fixed_cost = calculate_block_size(&store, 0, store.len(), BlockType::Fixed)?;
        fixed_store = Some(store);
    }

    let (btype, store, first, last) = if stored < fixed_cost && stored < dynamic {
        (BlockType::Stored, lz77, lstart, lend)
    } else if fixed_cost < dynamic {
        match &fixed_store {
            Some(store) => (BlockType::Fixed, store, 0, store.len()),
            None => (BlockType::Fixed, lz77, lstart, lend),
        }
    } else {
        (BlockType::Dynamic, lz77, lstart, lend)
    };
    add_lz77_block(btype, is_final, data, store, first, last, expected_data_size, out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_distance_codes() {
        let mut d = [0u32; NUM_D];
        patch_distance_codes(&mut d);
        assert_eq!(&d[..2], &[1, 1]);

        let mut d = [0u32; NUM_D];
        d[0] = 1;
        patch_distance_codes(&mut d);
        assert_eq!(&d[..2], &[1, 1]);

        let mut d = [0u32; NUM_D];
        d[7] = 3;
        patch_distance_codes(&mut d);
        assert_eq!(d[0], 1);
        assert_eq!(d[7], 3);
    }

    #[test]
    fn test_optimize_for_rle_flattens_noise() {
        let mut counts = [10, 11, 9, 10, 12, 0, 0, 0];
        optimize_huffman_for_rle(&mut counts);
        assert_eq!(counts, [10, 10, 10, 10, 10, 0, 0, 0]);
    }

    #[test]
    fn test_stored_block_layout() {
        let mut out = BitWriter::new();
        add_non_compressed_block(true, b"hello", 0, 5, &mut out);
        assert_eq!(out.into_inner(), vec![0x01, 5, 0, 0xFA, 0xFF, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_stored_size_counts_headers() {
        let mut store = Lz77Store::new();
        for i in 0..70000usize {
            store.push((i % 251) as u16, 0, i);
        }
        let bits = calculate_block_size(&store, 0, store.len(), BlockType::Stored).unwrap();
        assert_eq!(bits, (2 * 5 * 8 + 70000 * 8) as f64);
    }

    #[test]
    fn test_tree_size_matches_emitted_bits() {
        let mut ll = [0u32; NUM_LL];
        ll[..144].fill(8);
        ll[144..256].fill(9);
        ll[256..280].fill(7);
        ll[280..].fill(8);
        let d = [5u32; NUM_D];
        for flags in 0..8u8 {
            let mut out = BitWriter::new();
            let (a, b, c) = (flags & 1 != 0, flags & 2 != 0, flags & 4 != 0);
            let predicted = encode_tree(&ll, &d, a, b, c, None).unwrap();
            let emitted = encode_tree(&ll, &d, a, b, c, Some(&mut out)).unwrap();
            assert_eq!(predicted, emitted);
            assert_eq!(out.bit_len(), emitted);
        }
    }
}
