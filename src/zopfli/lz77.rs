//! LZ77 symbol store, match finder and greedy parser

use super::cache::LongestMatchCache;
use super::hash::ZopfliHash;
use super::symbols::{dist_symbol, length_symbol};
use super::{ZopfliOptions, MAX_MATCH, MIN_MATCH, NUM_D, NUM_LL, WINDOW_MASK, WINDOW_SIZE};

/// Scratch table: smallest distance for every match length
pub type Sublen = [u16; MAX_MATCH + 1];

/// A parsed LZ77 stream
///
/// Entries with `dist == 0` are literals (`litlen` is the byte), the others
/// are back-references of length `litlen`. Symbol histograms are snapshotted
/// every `NUM_LL` / `NUM_D` entries so range histograms stay cheap.
#[derive(Debug, Clone, Default)]
pub struct Lz77Store {
    pub litlens: Vec<u16>,
    pub dists: Vec<u16>,
    /// Input position of each entry
    pub pos: Vec<usize>,
    pub ll_symbol: Vec<u16>,
    pub d_symbol: Vec<u16>,
    ll_counts: Vec<usize>,
    d_counts: Vec<usize>,
}

impl Lz77Store {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.litlens.len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.litlens.is_empty()
    }

    /// Append a literal (`dist == 0`) or a back-reference
    pub fn push(&mut self, length: u16, dist: u16, pos: usize) {
        let size = self.len();
        let ll_start = NUM_LL * (size / NUM_LL);
        let d_start = NUM_D * (size / NUM_D);

        if size % NUM_LL == 0 {
            for i in 0..NUM_LL {
                let carry = if size == 0 { 0 } else { self.ll_counts[size - NUM_LL + i] };
                self.ll_counts.push(carry);
            }
        }
        if size % NUM_D == 0 {
            for i in 0..NUM_D {
                let carry = if size == 0 { 0 } else { self.d_counts[size - NUM_D + i] };
                self.d_counts.push(carry);
            }
        }

        self.litlens.push(length);
        self.dists.push(dist);
        self.pos.push(pos);

        if dist == 0 {
            self.ll_symbol.push(length);
            self.d_symbol.push(0);
            self.ll_counts[ll_start + length as usize] += 1;
        } else {
            let ll = length_symbol(length as usize);
            let d = dist_symbol(dist as usize);
            self.ll_symbol.push(ll as u16);
            self.d_symbol.push(d as u16);
            self.ll_counts[ll_start + ll] += 1;
            self.d_counts[d_start + d] += 1;
        }
    }

    /// Append every entry of `other`
    pub fn append(&mut self, other: &Lz77Store) {
        for i in 0..other.len() {
            self.push(other.litlens[i], other.dists[i], other.pos[i]);
        }
    }

    /// Number of input bytes covered by entries `lstart..lend`
    pub fn byte_range(&self, lstart: usize, lend: usize) -> usize {
        if lstart == lend {
            return 0;
        }
        let l = lend - 1;
        let last = if self.dists[l] == 0 { 1 } else { self.litlens[l] as usize };
        self.pos[l] + last - self.pos[lstart]
    }

    fn histogram_at(
        &self,
        lpos: usize,
        ll_counts: &mut [usize; NUM_LL],
        d_counts: &mut [usize; NUM_D],
    ) {
        let ll_pos = NUM_LL * (lpos / NUM_LL);
        let d_pos = NUM_D * (lpos / NUM_D);
        ll_counts.copy_from_slice(&self.ll_counts[ll_pos..ll_pos + NUM_LL]);
        for i in (lpos + 1)..(ll_pos + NUM_LL).min(self.len()) {
            ll_counts[self.ll_symbol[i] as usize] -= 1;
        }
        d_counts.copy_from_slice(&self.d_counts[d_pos..d_pos + NUM_D]);
        for i in (lpos + 1)..(d_pos + NUM_D).min(self.len()) {
            if self.dists[i] != 0 {
                d_counts[self.d_symbol[i] as usize] -= 1;
            }
        }
    }

    /// Symbol histograms of entries `lstart..lend`
    pub fn histogram(&self, lstart: usize, lend: usize) -> ([usize; NUM_LL], [usize; NUM_D]) {
        let mut ll_counts = [0usize; NUM_LL];
        let mut d_counts = [0usize; NUM_D];
        if lstart + NUM_LL * 3 > lend {
            for i in lstart..lend {
                ll_counts[self.ll_symbol[i] as usize] += 1;
                if self.dists[i] != 0 {
                    d_counts[self.d_symbol[i] as usize] += 1;
                }
            }
        } else {
            self.histogram_at(lend - 1, &mut ll_counts, &mut d_counts);
            if lstart > 0 {
                let mut ll_before = [0usize; NUM_LL];
                let mut d_before = [0usize; NUM_D];
                self.histogram_at(lstart - 1, &mut ll_before, &mut d_before);
                for (count, before) in ll_counts.iter_mut().zip(ll_before.iter()) {
                    *count -= before;
                }
                for (count, before) in d_counts.iter_mut().zip(d_before.iter()) {
                    *count -= before;
                }
            }
        }
        (ll_counts, d_counts)
    }
}

/// Per-block parsing context
#[derive(Debug)]
pub struct BlockState<'a> {
    pub options: &'a ZopfliOptions,
    /// Longest match cache covering `block_start..block_end`
    pub lmc: Option<LongestMatchCache>,
    pub block_start: usize,
    pub block_end: usize,
}

impl<'a> BlockState<'a> {
    /// Create the state for `start..end`, optionally with a match cache
    pub fn new(options: &'a ZopfliOptions, start: usize, end: usize, add_lmc: bool) -> Self {
        let lmc = (add_lmc && options.cache_length > 0)
            .then(|| LongestMatchCache::new(end - start, options.cache_length));
        Self {
            options,
            lmc,
            block_start: start,
            block_end: end,
        }
    }

    fn try_cache(
        &self,
        pos: usize,
        limit: &mut usize,
        sublen: Option<&mut Sublen>,
    ) -> Option<(u16, u16)> {
        let lmc = self.lmc.as_ref()?;
        let lmc_pos = pos - self.block_start;
        if !lmc.has_entry(lmc_pos) {
            return None;
        }
        let cached_len = lmc.length[lmc_pos] as usize;
        let max_sublen = lmc.max_sublen(lmc_pos);
        let limit_ok = *limit == MAX_MATCH
            || cached_len <= *limit
            || (sublen.is_some() && max_sublen >= *limit);
        if !limit_ok {
            return None;
        }

        if sublen.is_none() || cached_len <= max_sublen {
            let length = cached_len.min(*limit);
            let distance = match sublen {
                Some(sublen) => {
                    lmc.load_sublen(lmc_pos, length, sublen);
                    sublen[length]
                }
                None => lmc.dist[lmc_pos],
            };
            return Some((distance, length as u16));
        }

        // Sublens must be recomputed, but the walk can stop at the cached length
        *limit = cached_len;
        None
    }

    fn store_cache(
        &mut self,
        pos: usize,
        limit: usize,
        sublen: Option<&Sublen>,
        distance: u16,
        length: u16,
    ) {
        let Some(sublen) = sublen else { return };
        if limit != MAX_MATCH {
            return;
        }
        let block_start = self.block_start;
        let Some(lmc) = self.lmc.as_mut() else { return };
        let lmc_pos = pos - block_start;
        if lmc.has_entry(lmc_pos) {
            return;
        }
        let short = (length as usize) < MIN_MATCH;
        lmc.dist[lmc_pos] = if short { 0 } else { distance };
        lmc.length[lmc_pos] = if short { 0 } else { length };
        lmc.store_sublen(sublen, lmc_pos, length as usize);
    }

    /// Find the longest match at `pos` within `data[..size]`
    ///
    /// Returns `(distance, length)`. When `sublen` is given it receives, for
    /// every length up to the result, the smallest distance achieving it.
    pub fn find_longest_match(
        &mut self,
        h: &ZopfliHash,
        data: &[u8],
        pos: usize,
        size: usize,
        mut limit: usize,
        mut sublen: Option<&mut Sublen>,
    ) -> (u16, u16) {
        if let Some(found) = self.try_cache(pos, &mut limit, sublen.as_deref_mut()) {
            return found;
        }

        if size - pos < MIN_MATCH {
            return (0, 0);
        }
        if pos + limit > size {
            limit = size - pos;
        }

        let hpos = pos & WINDOW_MASK;
        let array_end = pos + limit;
        let mut best_dist: u16 = 0;
        let mut best_length: usize = 1;
        let mut chain_counter = self.options.max_chain_hits.max(1);

        let mut use_second = false;
        let mut pp = h.head[h.val as usize].max(0) as usize;
        let mut p = h.prev[pp] as usize;
        let mut dist = if p < pp { pp - p } else { WINDOW_SIZE - p + pp };

        while dist < WINDOW_SIZE {
            let mut current_length = 0;
            if dist > 0 {
                let mut scan = pos;
                let mut mtch = pos - dist;

                if pos + best_length >= size
                    || data[scan + best_length] == data[mtch + best_length]
                {
                    let same0 = h.same[pos & WINDOW_MASK] as usize;
                    if same0 > 2 && data[scan] == data[mtch] {
                        let same1 = h.same[(pos - dist) & WINDOW_MASK] as usize;
                        let same = same0.min(same1).min(limit);
                        scan += same;
                        mtch += same;
                    }
                    while scan < array_end && data[scan] == data[mtch] {
                        scan += 1;
                        mtch += 1;
                    }
                    current_length = scan - pos;
                }

                if current_length > best_length {
                    if let Some(sublen) = sublen.as_deref_mut() {
                        for slot in &mut sublen[best_length + 1..=current_length] {
                            *slot = dist as u16;
                        }
                    }
                    best_dist = dist as u16;
                    best_length = current_length;
                    if current_length >= limit {
                        break;
                    }
                }
            }

            // Hop to the run-aware chain once it skips more than it misses
            if !use_second && best_length >= h.same[hpos] as usize && h.val2 == h.hashval2[p] {
                use_second = true;
            }

            pp = p;
            p = if use_second { h.prev2[p] } else { h.prev[p] } as usize;
            if p == pp {
                break;
            }
            dist += if p < pp { pp - p } else { WINDOW_SIZE - p + pp };

            chain_counter -= 1;
            if chain_counter == 0 {
                break;
            }
        }

        self.store_cache(pos, limit, sublen.as_deref(), best_dist, best_length as u16);
        (best_dist, best_length as u16)
    }
}

/// Length score used by lazy matching; long distances cost an extra bit or so
#[inline]
fn length_score(length: usize, distance: usize) -> usize {
    if distance > 1024 {
        length.saturating_sub(1)
    } else {
        length
    }
}

/// Greedy LZ77 parse of `data[start..end]` with optional one-step lazy matching
pub fn greedy(
    s: &mut BlockState<'_>,
    data: &[u8],
    start: usize,
    end: usize,
    store: &mut Lz77Store,
    h: &mut ZopfliHash,
) {
    if start == end {
        return;
    }
    h.prepare(data, start, end);

    let lazy = s.options.lazy_matching;
    let mut sublen: Sublen = [0; MAX_MATCH + 1];
    let mut prev_length = 0usize;
    let mut prev_match = 0usize;
    let mut match_available = false;

    let mut i = start;
    while i < end {
        h.update(data, i, end);
        let (dist, leng) = s.find_longest_match(h, data, i, end, MAX_MATCH, Some(&mut sublen));
        let (mut dist, mut leng) = (dist as usize, leng as usize);
        let score = length_score(leng, dist);

        if lazy {
            let prev_score = length_score(prev_length, prev_match);
            if match_available {
                match_available = false;
                if score > prev_score + 1 {
                    store.push(data[i - 1] as u16, 0, i - 1);
                    if score >= MIN_MATCH && leng < MAX_MATCH {
                        match_available = true;
                        prev_length = leng;
                        prev_match = dist;
                        i += 1;
                        continue;
                    }
                } else {
                    // The previous match wins
                    leng = prev_length;
                    dist = prev_match;
                    store.push(leng as u16, dist as u16, i - 1);
                    for _ in 2..leng {
                        i += 1;
                        h.update(data, i, end);
                    }
                    i += 1;
                    continue;
                }
            } else if score >= MIN_MATCH && leng < MAX_MATCH {
                match_available = true;
                prev_length = leng;
                prev_match = dist;
                i += 1;
                continue;
            }
        }

        if score >= MIN_MATCH {
            store.push(leng as u16, dist as u16, i);
        } else {
            leng = 1;
            store.push(data[i] as u16, 0, i);
        }
        for _ in 1..leng {
            i += 1;
            h.update(data, i, end);
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replay(store: &Lz77Store, data: &[u8], start: usize) -> Vec<u8> {
        let mut out = data[..start].to_vec();
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

    #[test]
    fn test_greedy_reproduces_input() {
        let options = ZopfliOptions::default();
        let data: Vec<u8> = b"the quick brown fox jumps over the lazy dog; the quick brown cat"
            .iter()
            .cycle()
            .take(3000)
            .copied()
            .collect();
        let mut state = BlockState::new(&options, 0, data.len(), true);
        let mut store = Lz77Store::new();
        let mut hash = ZopfliHash::new();
        greedy(&mut state, &data, 0, data.len(), &mut store, &mut hash);

        assert!(store.len() < data.len() / 4);
        assert_eq!(store.byte_range(0, store.len()), data.len());
        assert_eq!(replay(&store, &data, 0), data);
    }

    #[test]
    fn test_greedy_with_preceding_window() {
        let options = ZopfliOptions::default().with_lazy_matching(false);
        let data: Vec<u8> = (0..4000u32).map(|i| (i % 97) as u8).collect();
        let mut state = BlockState::new(&options, 2000, data.len(), false);
        let mut store = Lz77Store::new();
        let mut hash = ZopfliHash::new();
        greedy(&mut state, &data, 2000, data.len(), &mut store, &mut hash);
        assert_eq!(store.pos[0], 2000);
        assert_eq!(replay(&store, &data, 2000), data);
    }

    #[test]
    fn test_histogram_ranges_agree() {
        let options = ZopfliOptions::default();
        let data: Vec<u8> = (0..20000u32).map(|i| ((i * i) % 251) as u8 ^ (i % 7) as u8).collect();
        let mut state = BlockState::new(&options, 0, data.len(), false);
        let mut store = Lz77Store::new();
        let mut hash = ZopfliHash::new();
        greedy(&mut state, &data, 0, data.len(), &mut store, &mut hash);
        assert!(store.len() > NUM_LL * 4);

        let (lstart, lend) = (100, store.len() - 50);
        let (ll, d) = store.histogram(lstart, lend);
        let mut ll_direct = [0usize; NUM_LL];
        let mut d_direct = [0usize; NUM_D];
        for i in lstart..lend {
            ll_direct[store.ll_symbol[i] as usize] += 1;
            if store.dists[i] != 0 {
                d_direct[store.d_symbol[i] as usize] += 1;
            }
        }
        assert_eq!(ll, ll_direct);
        assert_eq!(d, d_direct);
    }
}
