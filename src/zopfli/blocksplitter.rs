//! Block splitting
//!
//! Finds points where starting a new Huffman block lowers the total size.
//! Splitting recurses into the largest remaining range until no split helps
//! or the block limit is reached.

use super::blocks::calculate_block_size_auto_type;
use super::hash::ZopfliHash;
use super::lz77::{greedy, BlockState, Lz77Store};
use super::{ZopfliOptions, LARGE_FLOAT};
use crate::Result;

/// Number of probe points per round when searching large ranges
const PROBES: usize = 9;

/// Minimise `f` over `start..end`, returning `(position, value)`
fn find_minimum<F>(f: F, mut start: usize, mut end: usize) -> Result<(usize, f64)>
where
    F: Fn(usize) -> Result<f64>,
{
    if end - start < 1024 {
        let mut best = LARGE_FLOAT;
        let mut result = start;
        for i in start..end {
            let v = f(i)?;
            if v < best {
                best = v;
                result = i;
            }
        }
        return Ok((result, best));
    }

    let mut last_best = LARGE_FLOAT;
    let mut pos = start;
    let mut p = [0usize; PROBES];
    let mut vp = [0f64; PROBES];
    while end - start > PROBES {
        for i in 0..PROBES {
            p[i] = start + (i + 1) * ((end - start) / (PROBES + 1));
            vp[i] = f(p[i])?;
        }
        let mut best_i = 0;
        let mut best = vp[0];
        for i in 1..PROBES {
            if vp[i] < best {
                best = vp[i];
                best_i = i;
            }
        }
        if best > last_best {
            break;
        }

        start = if best_i == 0 { start } else { p[best_i - 1] };
        end = if best_i == PROBES - 1 { end } else { p[best_i + 1] };

        pos = p[best_i];
        last_best = best;
    }
    Ok((pos, last_best))
}

fn estimate_cost(lz77: &Lz77Store, lstart: usize, lend: usize) -> Result<f64> {
    calculate_block_size_auto_type(lz77, lstart, lend)
}

/// Insert keeping ascending order
fn add_sorted(value: usize, out: &mut Vec<usize>) {
    let at = out.partition_point(|&v| v <= value);
    out.insert(at, value);
}

/// Largest range not yet marked done, as `(lstart, lend)`
fn find_largest_splittable_block(
    lz77_size: usize,
    done: &[bool],
    split_points: &[usize],
) -> Option<(usize, usize)> {
    let mut longest = 0;
    let mut found = None;
    for i in 0..=split_points.len() {
        let start = if i == 0 { 0 } else { split_points[i - 1] };
        let end = if i == split_points.len() {
            lz77_size - 1
        } else {
            split_points[i]
        };
        if !done[start] && end - start > longest {
            found = Some((start, end));
            longest = end - start;
        }
    }
    found
}

/// Split points (LZ77 entry indices) for an already parsed stream
pub fn block_split_lz77(lz77: &Lz77Store, max_blocks: usize) -> Result<Vec<usize>> {
    let mut split_points = Vec::new();
    // tiny inputs never benefit
    if lz77.len() < 10 {
        return Ok(split_points);
    }

    let mut done = vec![false; lz77.len()];
    let mut lstart = 0;
    let mut lend = lz77.len();
    let mut num_blocks = 1;
    loop {
        if max_blocks > 0 && num_blocks >= max_blocks {
            break;
        }

        let (llpos, split_cost) = find_minimum(
            |i| Ok(estimate_cost(lz77, lstart, i)? + estimate_cost(lz77, i, lend)?),
            lstart + 1,
            lend,
        )?;
        let orig_cost = estimate_cost(lz77, lstart, lend)?;

        if split_cost > orig_cost || llpos == lstart + 1 || llpos == lend {
            done[lstart] = true;
        } else {
            add_sorted(llpos, &mut split_points);
            num_blocks += 1;
        }

        match find_largest_splittable_block(lz77.len(), &done, &split_points) {
            Some((start, end)) => {
                lstart = start;
                lend = end;
            }
            None => break,
        }
        if lend - lstart < 10 {
            break;
        }
    }
    Ok(split_points)
}

/// Split points (input byte positions) for `data[start..end]`
///
/// A greedy parse gives better split points here than the optimal one.
pub fn block_split(
    options: &ZopfliOptions,
    data: &[u8],
    start: usize,
    end: usize,
    max_blocks: usize,
) -> Result<Vec<usize>> {
    let mut state = BlockState::new(options, start, end, false);
    let mut store = Lz77Store::new();
    let mut hash = ZopfliHash::new();
    greedy(&mut state, data, start, end, &mut store, &mut hash);

    let lz77_points = block_split_lz77(&store, max_blocks)?;

    let mut split_points = Vec::with_capacity(lz77_points.len());
    let mut pos = start;
    let mut next = lz77_points.iter().peekable();
    for i in 0..store.len() {
        if next.peek() == Some(&&i) {
            split_points.push(pos);
            next.next();
            if next.peek().is_none() {
                break;
            }
        }
        pos += if store.dists[i] == 0 { 1 } else { store.litlens[i] as usize };
    }
    Ok(split_points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_minimum_small_range() {
        let (pos, value) = find_minimum(|i| Ok(((i as f64) - 40.0).abs()), 0, 100).unwrap();
        assert_eq!(pos, 40);
        assert_eq!(value, 0.0);
    }

    #[test]
    fn test_find_minimum_large_range() {
        let (pos, _) = find_minimum(|i| Ok(((i as f64) - 5000.0).powi(2)), 0, 20000).unwrap();
        assert!((pos as i64 - 5000).abs() < 20, "pos {}", pos);
    }

    #[test]
    fn test_add_sorted() {
        let mut points = vec![];
        for v in [50, 10, 30, 40, 20] {
            add_sorted(v, &mut points);
        }
        assert_eq!(points, vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_split_mixed_content() {
        let options = ZopfliOptions::default();
        // text followed by pseudo-random bytes splits near the boundary
        let mut data: Vec<u8> = b"lorem ipsum dolor sit amet "
            .iter()
            .cycle()
            .take(20000)
            .copied()
            .collect();
        let mut seed = 12345u32;
        for _ in 0..20000 {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            data.push((seed >> 16) as u8);
        }
        let points = block_split(&options, &data, 0, data.len(), 15).unwrap();
        assert!(!points.is_empty());
        assert!(points.windows(2).all(|w| w[0] < w[1]));
        assert!(points.iter().any(|&p| (15000..22000).contains(&p)), "{:?}", points);
    }
}
