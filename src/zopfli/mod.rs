//! Optimal DEFLATE encoder
//!
//! A Zopfli-style compressor: hash-chain match finding with a longest-match
//! cache, iterative cost-directed optimal parsing, block splitting and
//! length-limited Huffman coding. It is encode only; output is plain DEFLATE
//! readable by any inflater.
//!
//! # Example
//!
//! ```
//! use hpi::zopfli::{zlib_compress, ZopfliOptions};
//!
//! let data = b"abcabcabcabcabcabcabcabc".repeat(100);
//! let options = ZopfliOptions::default().with_iteration_count(5);
//! let compressed = zlib_compress(&options, &data).unwrap();
//! assert!(compressed.len() < data.len());
//! ```

mod blocks;
mod blocksplitter;
mod cache;
mod hash;
mod katajainen;
mod lz77;
mod squeeze;
mod symbols;
mod tree;

use log::debug;
use rayon::prelude::*;

use crate::bitstream::BitWriter;
use crate::Result;
use blocks::{
    add_lz77_block, add_lz77_block_auto_type, add_non_compressed_block,
    calculate_block_size_auto_type,
};
use blocksplitter::{block_split, block_split_lz77};
use lz77::{BlockState, Lz77Store};
use squeeze::{lz77_optimal, lz77_optimal_fixed};

/// Size of the DEFLATE sliding window (32KB)
pub const WINDOW_SIZE: usize = 0x8000;

/// Mask for positions inside the window
pub const WINDOW_MASK: usize = WINDOW_SIZE - 1;

/// Shortest DEFLATE match
pub const MIN_MATCH: usize = 3;

/// Longest DEFLATE match
pub const MAX_MATCH: usize = 258;

/// Literal/length alphabet size
pub const NUM_LL: usize = 288;

/// Distance alphabet size
pub const NUM_D: usize = 32;

/// Stand-in for an unreachable cost
pub const LARGE_FLOAT: f64 = 1e30;

/// DEFLATE block type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    /// Uncompressed (BTYPE 00)
    Stored = 0,
    /// Fixed Huffman tree (BTYPE 01)
    Fixed = 1,
    /// Dynamic Huffman tree (BTYPE 10); also the "pick the best" mode
    Dynamic = 2,
}

/// Encoder tuning knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZopfliOptions {
    /// Optimal parsing passes per block
    pub iteration_count: usize,
    /// Split the input into several Huffman blocks
    pub block_splitting: bool,
    /// Split after optimising instead of before
    pub block_splitting_last: bool,
    /// Maximum number of blocks per split (0 = unlimited)
    pub block_splitting_max: usize,
    /// Bytes per independently compressed master block (0 = whole input)
    pub master_block_size: usize,
    /// Hash chain links visited per match search
    pub max_chain_hits: usize,
    /// Sublen samples kept per position in the match cache (0 = no cache)
    pub cache_length: usize,
    /// Defer a match by one byte when the next one is longer
    pub lazy_matching: bool,
}

impl Default for ZopfliOptions {
    fn default() -> Self {
        Self {
            iteration_count: 15,
            block_splitting: true,
            block_splitting_last: false,
            block_splitting_max: 15,
            master_block_size: 0,
            max_chain_hits: 8192,
            cache_length: 8,
            lazy_matching: true,
        }
    }
}

impl ZopfliOptions {
    /// Set the number of optimisation passes
    pub fn with_iteration_count(mut self, iterations: usize) -> Self {
        self.iteration_count = iterations;
        self
    }

    /// Enable or disable block splitting
    pub fn with_block_splitting(mut self, enabled: bool) -> Self {
        self.block_splitting = enabled;
        self
    }

    /// Split after optimising (smaller, single threaded) instead of before
    pub fn with_block_splitting_last(mut self, last: bool) -> Self {
        self.block_splitting_last = last;
        self
    }

    /// Cap the number of blocks per split (0 = unlimited)
    pub fn with_block_splitting_max(mut self, max: usize) -> Self {
        self.block_splitting_max = max;
        self
    }

    /// Compress in independent master blocks of this many bytes (0 = off)
    pub fn with_master_block_size(mut self, size: usize) -> Self {
        self.master_block_size = size;
        self
    }

    /// Limit hash chain traversal per search
    pub fn with_max_chain_hits(mut self, hits: usize) -> Self {
        self.max_chain_hits = hits.max(1);
        self
    }

    /// Number of sublen samples cached per position (0 disables the cache)
    pub fn with_cache_length(mut self, samples: usize) -> Self {
        self.cache_length = samples;
        self
    }

    /// Enable or disable lazy matching in the greedy pass
    pub fn with_lazy_matching(mut self, lazy: bool) -> Self {
        self.lazy_matching = lazy;
        self
    }
}

/// Blocks of one dynamic-type part: LZ77 stream plus split points into it
fn optimise_split_first(
    options: &ZopfliOptions,
    data: &[u8],
    start: usize,
    end: usize,
) -> Result<(Lz77Store, Vec<usize>)> {
    let byte_points = if options.block_splitting {
        block_split(options, data, start, end, options.block_splitting_max)?
    } else {
        Vec::new()
    };

    let mut bounds = Vec::with_capacity(byte_points.len() + 2);
    bounds.push(start);
    bounds.extend_from_slice(&byte_points);
    bounds.push(end);

    // sub-blocks are independent once split points are fixed
    let parts = bounds
        .par_windows(2)
        .map(|range| -> Result<(Lz77Store, f64)> {
            let mut state = BlockState::new(options, range[0], range[1], true);
            let store =
                lz77_optimal(&mut state, data, range[0], range[1], options.iteration_count)?;
            let cost = calculate_block_size_auto_type(&store, 0, store.len())?;
            Ok((store, cost))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut lz77 = Lz77Store::new();
    let mut split_points = Vec::with_capacity(byte_points.len());
    let mut total_cost = 0.0;
    for (i, (store, cost)) in parts.iter().enumerate() {
        total_cost += cost;
        lz77.append(store);
        if i + 1 < parts.len() {
            split_points.push(lz77.len());
        }
    }

    // A second split on the optimised stream sometimes does better
    if options.block_splitting && split_points.len() > 1 {
        let points2 = block_split_lz77(&lz77, options.block_splitting_max)?;
        let mut total_cost2 = 0.0;
        for i in 0..=points2.len() {
            let lstart = if i == 0 { 0 } else { points2[i - 1] };
            let lend = if i == points2.len() { lz77.len() } else { points2[i] };
            total_cost2 += calculate_block_size_auto_type(&lz77, lstart, lend)?;
        }
        if total_cost2 < total_cost {
            split_points = points2;
        }
    }

    Ok((lz77, split_points))
}

fn optimise_split_last(
    options: &ZopfliOptions,
    data: &[u8],
    start: usize,
    end: usize,
) -> Result<(Lz77Store, Vec<usize>)> {
    let mut state = BlockState::new(options, start, end, true);
    let lz77 = lz77_optimal(&mut state, data, start, end, options.iteration_count)?;
    let split_points = if options.block_splitting {
        block_split_lz77(&lz77, options.block_splitting_max)?
    } else {
        Vec::new()
    };
    Ok((lz77, split_points))
}

/// Compress `data[start..end]` as one or more DEFLATE blocks
pub fn deflate_part(
    options: &ZopfliOptions,
    btype: BlockType,
    is_final: bool,
    data: &[u8],
    start: usize,
    end: usize,
    out: &mut BitWriter,
) -> Result<()> {
    match btype {
        BlockType::Stored => {
            add_non_compressed_block(is_final, data, start, end, out);
            return Ok(());
        }
        BlockType::Fixed => {
            let mut state = BlockState::new(options, start, end, true);
            let store = lz77_optimal_fixed(&mut state, data, start, end);
            return add_lz77_block(BlockType::Fixed, is_final, data, &store, 0, store.len(), 0, out);
        }
        BlockType::Dynamic if start == end => {
            let empty = Lz77Store::new();
            return add_lz77_block_auto_type(options, is_final, data, &empty, 0, 0, 0, out);
        }
        BlockType::Dynamic => {}
    }

    let (lz77, split_points) = if options.block_splitting_last {
        optimise_split_last(options, data, start, end)?
    } else {
        optimise_split_first(options, data, start, end)?
    };
    debug!(
        "deflate {}..{}: {} symbols in {} blocks",
        start,
        end,
        lz77.len(),
        split_points.len() + 1
    );

    for i in 0..=split_points.len() {
        let lstart = if i == 0 { 0 } else { split_points[i - 1] };
        let lend = if i == split_points.len() { lz77.len() } else { split_points[i] };
        let last = i == split_points.len();
        add_lz77_block_auto_type(options, last && is_final, data, &lz77, lstart, lend, 0, out)?;
    }
    Ok(())
}

/// Compress `data` into raw DEFLATE, appending to `out`
///
/// With a non-zero `master_block_size` the input is processed in independent
/// slices to bound memory; only the last one may carry the final flag.
pub fn deflate(
    options: &ZopfliOptions,
    btype: BlockType,
    is_final: bool,
    data: &[u8],
    out: &mut BitWriter,
) -> Result<()> {
    if options.master_block_size == 0 {
        return deflate_part(options, btype, is_final, data, 0, data.len(), out);
    }

    let mut i = 0;
    loop {
        let master_final = i + options.master_block_size >= data.len();
        let size = if master_final {
            data.len() - i
        } else {
            options.master_block_size
        };
        deflate_part(options, btype, is_final && master_final, data, i, i + size, out)?;
        i += size;
        if i >= data.len() {
            break;
        }
    }
    Ok(())
}

/// Compress `data` into a zlib stream (header 0x78 0xDA, Adler-32 trailer)
pub fn zlib_compress(options: &ZopfliOptions, data: &[u8]) -> Result<Vec<u8>> {
    let mut out = BitWriter::with_bytes(vec![0x78, 0xDA]);
    deflate(options, BlockType::Dynamic, true, data, &mut out)?;
    out.align_to_byte();
    out.write_bytes(&adler::adler32_slice(data).to_be_bytes());
    Ok(out.into_inner())
}
