//! Rolling hash chains for the match finder
//!
//! Two hash chains are maintained side by side. The first hashes the next
//! three bytes; the second additionally folds in the length of the run of
//! identical bytes starting at each position, which lets the match finder hop
//! across long runs instead of visiting every link.

use super::{MIN_MATCH, WINDOW_MASK, WINDOW_SIZE};

const HASH_SHIFT: u32 = 5;
const HASH_MASK: i32 = 32767;
const HEAD_SIZE: usize = 65536;

/// Hash chain state over a sliding window
#[derive(Debug, Clone)]
pub struct ZopfliHash {
    /// Most recent window position for each hash value (-1 = none)
    pub head: Vec<i32>,
    /// Previous window position with the same hash
    pub prev: Vec<u16>,
    /// Hash value recorded at each window position
    pub hashval: Vec<i32>,
    /// Current hash value
    pub val: i32,

    /// Second chain, keyed on the run-length aware hash
    pub head2: Vec<i32>,
    pub prev2: Vec<u16>,
    pub hashval2: Vec<i32>,
    pub val2: i32,

    /// Number of following bytes equal to the byte at each position
    pub same: Vec<u16>,
}

impl Default for ZopfliHash {
    fn default() -> Self {
        Self::new()
    }
}

impl ZopfliHash {
    /// Allocate a hash sized for the DEFLATE window
    pub fn new() -> Self {
        let mut hash = Self {
            head: vec![-1; HEAD_SIZE],
            prev: vec![0; WINDOW_SIZE],
            hashval: vec![-1; WINDOW_SIZE],
            val: 0,
            head2: vec![-1; HEAD_SIZE],
            prev2: vec![0; WINDOW_SIZE],
            hashval2: vec![-1; WINDOW_SIZE],
            val2: 0,
            same: vec![0; WINDOW_SIZE],
        };
        hash.reset();
        hash
    }

    /// Forget every recorded position
    pub fn reset(&mut self) {
        self.val = 0;
        self.val2 = 0;
        self.head.fill(-1);
        self.head2.fill(-1);
        self.hashval.fill(-1);
        self.hashval2.fill(-1);
        self.same.fill(0);
        for (i, (p, p2)) in self.prev.iter_mut().zip(self.prev2.iter_mut()).enumerate() {
            *p = i as u16;
            *p2 = i as u16;
        }
    }

    #[inline]
    fn update_value(&mut self, c: u8) {
        self.val = ((self.val << HASH_SHIFT) ^ c as i32) & HASH_MASK;
    }

    /// Prime the rolling value with the first bytes at `pos`
    pub fn warmup(&mut self, data: &[u8], pos: usize, end: usize) {
        self.update_value(data[pos]);
        if pos + 1 < end {
            self.update_value(data[pos + 1]);
        }
    }

    /// Insert position `pos` into both chains
    pub fn update(&mut self, data: &[u8], pos: usize, end: usize) {
        let hpos = pos & WINDOW_MASK;

        let c = if pos + MIN_MATCH <= end {
            data[pos + MIN_MATCH - 1]
        } else {
            0
        };
        self.update_value(c);
        self.hashval[hpos] = self.val;
        let head = self.head[self.val as usize];
        self.prev[hpos] = if head != -1 && self.hashval[head as usize] == self.val {
            head as u16
        } else {
            hpos as u16
        };
        self.head[self.val as usize] = hpos as i32;

        // Extend the run length of the previous position when possible
        let mut amount: usize = 0;
        let prev_same = self.same[pos.wrapping_sub(1) & WINDOW_MASK];
        if prev_same > 1 {
            amount = prev_same as usize - 1;
        }
        while pos + amount + 1 < end
            && data[pos] == data[pos + amount + 1]
            && amount < u16::MAX as usize
        {
            amount += 1;
        }
        self.same[hpos] = amount as u16;

        self.val2 = ((amount as i32 - MIN_MATCH as i32) & 255) ^ self.val;
        self.hashval2[hpos] = self.val2;
        let head2 = self.head2[self.val2 as usize];
        self.prev2[hpos] = if head2 != -1 && self.hashval2[head2 as usize] == self.val2 {
            head2 as u16
        } else {
            hpos as u16
        };
        self.head2[self.val2 as usize] = hpos as i32;
    }

    /// Reset and feed the window preceding `start`
    pub fn prepare(&mut self, data: &[u8], start: usize, end: usize) {
        let window_start = start.saturating_sub(WINDOW_SIZE);
        self.reset();
        self.warmup(data, window_start, end);
        for i in window_start..start {
            self.update(data, i, end);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_links_repeated_trigram() {
        let data = b"abcXabcYabc";
        let mut hash = ZopfliHash::new();
        hash.warmup(data, 0, data.len());
        for i in 0..=8 {
            hash.update(data, i, data.len());
        }
        // position 8 chains back to 4 then 0
        assert_eq!(hash.prev[8], 4);
        assert_eq!(hash.prev[4], 0);
        assert_eq!(hash.prev[0], 0);
    }

    #[test]
    fn test_same_counts_runs() {
        let data = [7u8; 20];
        let mut hash = ZopfliHash::new();
        hash.warmup(&data, 0, data.len());
        for i in 0..data.len() {
            hash.update(&data, i, data.len());
        }
        assert_eq!(hash.same[0], 19);
        assert_eq!(hash.same[5], 14);
        assert_eq!(hash.same[19], 0);
    }
}
