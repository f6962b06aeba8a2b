//! Longest-match cache
//!
//! Optimal parsing runs the match finder over the same block once per
//! iteration. The cache remembers, per block position, the longest match and
//! a bounded number of (length, distance) sample points from its sublen
//! table so later passes can skip the hash chain walk.

use super::MIN_MATCH;

/// Per-block longest match memo
#[derive(Debug, Clone)]
pub struct LongestMatchCache {
    /// Longest match length per position (1 = not yet computed)
    pub length: Vec<u16>,
    /// Distance of the longest match per position
    pub dist: Vec<u16>,
    /// Packed sublen samples, 3 bytes per sample
    sublen: Vec<u8>,
    /// Number of samples kept per position
    samples: usize,
}

impl LongestMatchCache {
    /// Allocate a cache for `block_size` positions keeping `samples` sublen points each
    pub fn new(block_size: usize, samples: usize) -> Self {
        Self {
            length: vec![1; block_size],
            dist: vec![0; block_size],
            sublen: vec![0; samples * 3 * block_size],
            samples,
        }
    }

    fn slot(&self, pos: usize) -> usize {
        self.samples * pos * 3
    }

    /// Whether position `pos` holds a computed entry
    pub fn has_entry(&self, pos: usize) -> bool {
        self.length[pos] == 0 || self.dist[pos] != 0
    }

    /// Record the sublen table of a match of `length` at `pos`
    pub fn store_sublen(&mut self, sublen: &[u16], pos: usize, length: usize) {
        if length < MIN_MATCH || self.samples == 0 {
            return;
        }
        let base = self.slot(pos);
        let mut j = 0;
        let mut best_length = 0;
        for i in MIN_MATCH..=length {
            if i == length || sublen[i] != sublen[i + 1] {
                let at = base + j * 3;
                self.sublen[at] = (i - MIN_MATCH) as u8;
                self.sublen[at + 1] = (sublen[i] & 0xFF) as u8;
                self.sublen[at + 2] = (sublen[i] >> 8) as u8;
                best_length = i;
                j += 1;
                if j >= self.samples {
                    break;
                }
            }
        }
        if j < self.samples {
            debug_assert_eq!(best_length, length);
            self.sublen[base + (self.samples - 1) * 3] = (best_length - MIN_MATCH) as u8;
        }
    }

    /// Expand the cached samples at `pos` back into a sublen table
    pub fn load_sublen(&self, pos: usize, length: usize, sublen: &mut [u16]) {
        if length < MIN_MATCH {
            return;
        }
        let max_length = self.max_sublen(pos);
        let base = self.slot(pos);
        let mut prev_length = 0;
        for j in 0..self.samples {
            let at = base + j * 3;
            let len = self.sublen[at] as usize + MIN_MATCH;
            let dist = self.sublen[at + 1] as u16 | ((self.sublen[at + 2] as u16) << 8);
            for slot in sublen.iter_mut().take(len + 1).skip(prev_length) {
                *slot = dist;
            }
            if len == max_length {
                break;
            }
            prev_length = len + 1;
        }
    }

    /// Longest length recoverable from the cached samples at `pos`
    pub fn max_sublen(&self, pos: usize) -> usize {
        if self.samples == 0 {
            return 0;
        }
        let base = self.slot(pos);
        if self.sublen[base + 1] == 0 && self.sublen[base + 2] == 0 {
            return 0;
        }
        self.sublen[base + (self.samples - 1) * 3] as usize + MIN_MATCH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sublen_round_trip() {
        let mut sublen = [0u16; 259];
        for (i, slot) in sublen.iter_mut().enumerate().take(21).skip(3) {
            *slot = if i < 10 { 4 } else { 300 };
        }
        let mut cache = LongestMatchCache::new(4, 8);
        assert!(!cache.has_entry(2));
        cache.store_sublen(&sublen, 2, 20);
        assert_eq!(cache.max_sublen(2), 20);

        let mut restored = [0u16; 259];
        cache.load_sublen(2, 20, &mut restored);
        assert_eq!(&restored[3..=20], &sublen[3..=20]);
        assert_eq!(cache.max_sublen(1), 0);
    }

    #[test]
    fn test_samples_cap_longest_length() {
        let mut sublen = [0u16; 259];
        for (i, slot) in sublen.iter_mut().enumerate().take(40).skip(3) {
            *slot = i as u16;
        }
        let mut cache = LongestMatchCache::new(1, 2);
        cache.store_sublen(&sublen, 0, 39);
        // only two distinct distances fit
        assert_eq!(cache.max_sublen(0), 4);
    }
}
