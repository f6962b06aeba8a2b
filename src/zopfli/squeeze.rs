//! Iterative optimal parsing
//!
//! Each pass finds the cheapest path through the block under a cost model
//! derived from the previous pass's symbol statistics. Passes stop improving
//! after a while; the statistics are then perturbed to escape local minima
//! and the best parse seen is kept.

use log::debug;

use super::blocks::calculate_block_size;
use super::hash::ZopfliHash;
use super::lz77::{greedy, BlockState, Lz77Store, Sublen};
use super::symbols::{
    dist_extra_bits, dist_symbol, length_extra_bits, length_symbol, DIST_BASE,
};
use super::tree::calculate_entropy;
use super::{BlockType, LARGE_FLOAT, MAX_MATCH, MIN_MATCH, NUM_D, NUM_LL, WINDOW_MASK};
use crate::Result;

/// Bit cost of a literal (`dist == 0`) or a length/distance pair
trait CostModel {
    fn cost(&self, litlen: usize, dist: usize) -> f64;
}

/// Cost under the fixed DEFLATE tree
struct FixedCost;

impl CostModel for FixedCost {
    fn cost(&self, litlen: usize, dist: usize) -> f64 {
        if dist == 0 {
            return if litlen <= 143 { 8.0 } else { 9.0 };
        }
        let symbol_bits = if length_symbol(litlen) <= 279 { 7 } else { 8 };
        // every distance symbol is 5 bits
        (symbol_bits + 5 + dist_extra_bits(dist) + length_extra_bits(litlen)) as f64
    }
}

/// Symbol frequencies of a parse and the entropy costs derived from them
#[derive(Debug, Clone)]
struct SymbolStats {
    litlens: [usize; NUM_LL],
    dists: [usize; NUM_D],
    ll_symbols: [f64; NUM_LL],
    d_symbols: [f64; NUM_D],
}

impl SymbolStats {
    fn new() -> Self {
        Self {
            litlens: [0; NUM_LL],
            dists: [0; NUM_D],
            ll_symbols: [0.0; NUM_LL],
            d_symbols: [0.0; NUM_D],
        }
    }

    fn from_store(store: &Lz77Store) -> Self {
        let mut stats = Self::new();
        for i in 0..store.len() {
            let litlen = store.litlens[i] as usize;
            let dist = store.dists[i] as usize;
            if dist == 0 {
                stats.litlens[litlen] += 1;
            } else {
                stats.litlens[length_symbol(litlen)] += 1;
                stats.dists[dist_symbol(dist)] += 1;
            }
        }
        stats.litlens[256] = 1;
        stats.calculate();
        stats
    }

    fn calculate(&mut self) {
        calculate_entropy(&self.litlens, &mut self.ll_symbols);
        calculate_entropy(&self.dists, &mut self.d_symbols);
    }

    /// Blend in `other`'s frequencies at the given weights
    fn add_weighted(&mut self, weight: f64, other: &SymbolStats, other_weight: f64) {
        for (mine, &theirs) in self.litlens.iter_mut().zip(other.litlens.iter()) {
            *mine = (*mine as f64 * weight + theirs as f64 * other_weight) as usize;
        }
        for (mine, &theirs) in self.dists.iter_mut().zip(other.dists.iter()) {
            *mine = (*mine as f64 * weight + theirs as f64 * other_weight) as usize;
        }
        self.litlens[256] = 1;
    }

    fn randomize(&mut self, ran: &mut RanState) {
        randomize_freqs(ran, &mut self.litlens);
        randomize_freqs(ran, &mut self.dists);
        self.litlens[256] = 1;
    }
}

impl CostModel for SymbolStats {
    fn cost(&self, litlen: usize, dist: usize) -> f64 {
        if dist == 0 {
            return self.ll_symbols[litlen];
        }
        let lsym = length_symbol(litlen);
        let dsym = dist_symbol(dist);
        (length_extra_bits(litlen) + dist_extra_bits(dist)) as f64
            + self.ll_symbols[lsym]
            + self.d_symbols[dsym]
    }
}

/// Multiply-with-carry generator (George Marsaglia)
struct RanState {
    m_w: u32,
    m_z: u32,
}

impl RanState {
    fn new() -> Self {
        Self { m_w: 1, m_z: 2 }
    }

    fn next(&mut self) -> u32 {
        self.m_z = 36969u32
            .wrapping_mul(self.m_z & 65535)
            .wrapping_add(self.m_z >> 16);
        self.m_w = 18000u32
            .wrapping_mul(self.m_w & 65535)
            .wrapping_add(self.m_w >> 16);
        (self.m_z << 16).wrapping_add(self.m_w)
    }
}

fn randomize_freqs(ran: &mut RanState, freqs: &mut [usize]) {
    let n = freqs.len();
    for i in 0..n {
        if (ran.next() >> 4) % 3 == 0 {
            let from = ran.next() as usize % n;
            freqs[i] = freqs[from];
        }
    }
}

/// Cheapest cost any length/distance pair can have under `model`
fn min_cost(model: &dyn CostModel) -> f64 {
    let mut best_length = 0;
    let mut best = LARGE_FLOAT;
    for length in MIN_MATCH..=MAX_MATCH {
        let c = model.cost(length, 1);
        if c < best {
            best_length = length;
            best = c;
        }
    }

    let mut best_dist = 0;
    best = LARGE_FLOAT;
    for &dist in DIST_BASE.iter() {
        let c = model.cost(MIN_MATCH, dist as usize);
        if c < best {
            best_dist = dist as usize;
            best = c;
        }
    }

    model.cost(best_length, best_dist)
}

/// Reusable buffers for one block's optimal runs
struct Squeezer {
    length_array: Vec<u16>,
    costs: Vec<f32>,
    hash: ZopfliHash,
}

impl Squeezer {
    fn new(block_size: usize) -> Self {
        Self {
            length_array: vec![0; block_size + 1],
            costs: vec![0.0; block_size + 1],
            hash: ZopfliHash::new(),
        }
    }

    /// Forward pass: cheapest cost to reach each position and the step taken
    fn best_lengths(
        &mut self,
        s: &mut BlockState<'_>,
        data: &[u8],
        start: usize,
        end: usize,
        model: &dyn CostModel,
    ) -> f64 {
        let block_size = end - start;
        if block_size == 0 {
            return 0.0;
        }
        let min_cost = min_cost(model);
        let h = &mut self.hash;
        let costs = &mut self.costs;
        let length_array = &mut self.length_array;
        let mut sublen: Sublen = [0; MAX_MATCH + 1];

        h.prepare(data, start, end);
        costs[1..=block_size].fill(LARGE_FLOAT as f32);
        costs[0] = 0.0;
        length_array[0] = 0;

        let mut i = start;
        while i < end {
            let mut j = i - start;
            h.update(data, i, end);

            // Inside a long run of one byte, step whole maximal matches
            if h.same[i & WINDOW_MASK] as usize > MAX_MATCH * 2
                && i > start + MAX_MATCH + 1
                && i + MAX_MATCH * 2 + 1 < end
                && h.same[(i - MAX_MATCH) & WINDOW_MASK] as usize > MAX_MATCH
            {
                let symbol_cost = model.cost(MAX_MATCH, 1);
                for _ in 0..MAX_MATCH {
                    costs[j + MAX_MATCH] = (costs[j] as f64 + symbol_cost) as f32;
                    length_array[j + MAX_MATCH] = MAX_MATCH as u16;
                    i += 1;
                    j += 1;
                    h.update(data, i, end);
                }
            }

            let (_, leng) = s.find_longest_match(h, data, i, end, MAX_MATCH, Some(&mut sublen));

            // Literal
            if i < end {
                let new_cost = model.cost(data[i] as usize, 0) + costs[j] as f64;
                if new_cost < costs[j + 1] as f64 {
                    costs[j + 1] = new_cost as f32;
                    length_array[j + 1] = 1;
                }
            }

            // Matches
            let k_end = (leng as usize).min(end - i);
            let min_cost_here = min_cost + costs[j] as f64;
            for k in MIN_MATCH..=k_end {
                // already as cheap as the model allows
                if costs[j + k] as f64 <= min_cost_here {
                    continue;
                }
                let new_cost = model.cost(k, sublen[k] as usize) + costs[j] as f64;
                if new_cost < costs[j + k] as f64 {
                    costs[j + k] = new_cost as f32;
                    length_array[j + k] = k as u16;
                }
            }
            i += 1;
        }

        costs[block_size] as f64
    }

    /// Walk the length array back from the end to recover the chosen steps
    fn trace_backwards(&self, size: usize) -> Vec<u16> {
        let mut path = Vec::new();
        let mut index = size;
        while index > 0 {
            let step = self.length_array[index];
            path.push(step);
            index -= step as usize;
        }
        path.reverse();
        path
    }

    /// Replay a path into concrete LZ77 entries
    fn follow_path(
        &mut self,
        s: &mut BlockState<'_>,
        data: &[u8],
        start: usize,
        end: usize,
        path: &[u16],
        store: &mut Lz77Store,
    ) {
        if start == end {
            return;
        }
        let h = &mut self.hash;
        h.prepare(data, start, end);

        let mut pos = start;
        for &step in path {
            let mut length = step as usize;
            h.update(data, pos, end);

            if length >= MIN_MATCH {
                // recover the distance; the found length must equal the step
                let (dist, _) = s.find_longest_match(h, data, pos, end, length, None);
                store.push(length as u16, dist, pos);
            } else {
                length = 1;
                store.push(data[pos] as u16, 0, pos);
            }

            for j in 1..length {
                h.update(data, pos + j, end);
            }
            pos += length;
        }
    }

    fn optimal_run(
        &mut self,
        s: &mut BlockState<'_>,
        data: &[u8],
        start: usize,
        end: usize,
        model: &dyn CostModel,
        store: &mut Lz77Store,
    ) -> f64 {
        let cost = self.best_lengths(s, data, start, end, model);
        let path = self.trace_backwards(end - start);
        self.follow_path(s, data, start, end, &path, store);
        cost
    }
}

/// Optimal parse of `data[start..end]` over `iterations` refinement passes
pub fn lz77_optimal(
    s: &mut BlockState<'_>,
    data: &[u8],
    start: usize,
    end: usize,
    iterations: usize,
) -> Result<Lz77Store> {
    let mut squeezer = Squeezer::new(end - start);
    let mut ran = RanState::new();

    let mut current = Lz77Store::new();
    greedy(s, data, start, end, &mut current, &mut squeezer.hash);
    let mut stats = SymbolStats::from_store(&current);

    let mut best_store = Lz77Store::new();
    let mut best_stats = stats.clone();
    let mut best_cost = LARGE_FLOAT;
    let mut last_cost = 0.0;
    let mut randomized = false;

    for i in 0..iterations {
        current = Lz77Store::new();
        squeezer.optimal_run(s, data, start, end, &stats, &mut current);
        let cost = calculate_block_size(&current, 0, current.len(), BlockType::Dynamic)?;
        if cost < best_cost {
            debug!("iteration {}: {} bits", i, cost as u64);
            best_store = current.clone();
            best_stats = stats.clone();
            best_cost = cost;
        }

        let last_stats = stats;
        stats = SymbolStats::from_store(&current);
        if randomized {
            // converges slower but better once randomness has kicked in
            stats.add_weighted(1.0, &last_stats, 0.5);
            stats.calculate();
        }
        if i > 5 && cost == last_cost {
            stats = best_stats.clone();
            stats.randomize(&mut ran);
            stats.calculate();
            randomized = true;
        }
        last_cost = cost;
    }

    if iterations == 0 {
        return Ok(current);
    }
    Ok(best_store)
}

/// Optimal parse under the fixed tree; a single pass suffices
pub fn lz77_optimal_fixed(
    s: &mut BlockState<'_>,
    data: &[u8],
    start: usize,
    end: usize,
) -> Lz77Store {
    s.block_start = start;
    s.block_end = end;
    let mut squeezer = Squeezer::new(end - start);
    let mut store = Lz77Store::new();
    squeezer.optimal_run(s, data, start, end, &FixedCost, &mut store);
    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zopfli::ZopfliOptions;

    fn replay(store: &Lz77Store) -> Vec<u8> {
        let mut out = Vec::new();
        for i in 0..store.len() {
            if store.dists[i] == 0 {
                out.push(store.litlens[i] as u8);
            } else {
                let from = out.len() - store.dists[i] as usize;
                for k in 0..store.litlens[i] as usize {
                    out.push(out[from + k]);
                }
            }
        }
        out
    }

    fn sample() -> Vec<u8> {
        let mut data = Vec::new();
        for i in 0..400u32 {
            data.extend_from_slice(format!("record {} value {};", i % 37, i * 7 % 11).as_bytes());
        }
        data.extend(std::iter::repeat(b'z').take(2000));
        data
    }

    #[test]
    fn test_optimal_parse_reproduces_input() {
        let options = ZopfliOptions::default();
        let data = sample();
        let mut state = BlockState::new(&options, 0, data.len(), true);
        let store = lz77_optimal(&mut state, &data, 0, data.len(), 5).unwrap();
        assert_eq!(replay(&store), data);
    }

    #[test]
    fn test_optimal_not_worse_than_greedy() {
        let options = ZopfliOptions::default();
        let data = sample();
        let mut state = BlockState::new(&options, 0, data.len(), true);
        let mut greedy_store = Lz77Store::new();
        let mut hash = ZopfliHash::new();
        greedy(&mut state, &data, 0, data.len(), &mut greedy_store, &mut hash);
        let greedy_cost =
            calculate_block_size(&greedy_store, 0, greedy_store.len(), BlockType::Dynamic).unwrap();

        let optimal = lz77_optimal(&mut state, &data, 0, data.len(), 10).unwrap();
        let optimal_cost =
            calculate_block_size(&optimal, 0, optimal.len(), BlockType::Dynamic).unwrap();
        assert!(optimal_cost <= greedy_cost, "{} > {}", optimal_cost, greedy_cost);
    }

    #[test]
    fn test_fixed_parse_reproduces_input() {
        let options = ZopfliOptions::default();
        let data = sample();
        let mut state = BlockState::new(&options, 0, data.len(), true);
        let store = lz77_optimal_fixed(&mut state, &data, 0, data.len());
        assert_eq!(replay(&store), data);
    }

    #[test]
    fn test_ran_state_sequence() {
        let mut ran = RanState::new();
        // m_z = 36969*2, m_w = 18000
        assert_eq!(ran.next(), ((36969u32 * 2) << 16).wrapping_add(18000));
    }
}
