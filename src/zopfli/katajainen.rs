//! Length-limited Huffman code lengths via boundary package-merge
//!
//! Jyrki Katajainen, Alistair Moffat and Andrew Turpin, "A Fast and
//! Space-Economical Algorithm for Length-Limited Coding". Chains are nodes in
//! an index arena; each list keeps only its two lookahead chains.

use crate::{HpiError, Result};

/// Sentinel for "no tail"
const NIL: usize = usize::MAX;

#[derive(Debug, Clone, Copy)]
struct Node {
    /// Total weight of the chain
    weight: usize,
    /// Number of leaves to the left of this chain, or the symbol for leaves
    count: usize,
    /// Previous node in the chain
    tail: usize,
}

#[derive(Debug, Clone, Copy)]
struct Leaf {
    weight: usize,
    symbol: usize,
}

struct PackageMerge<'a> {
    leaves: &'a [Leaf],
    arena: Vec<Node>,
    /// Two lookahead chains per list
    lists: Vec<[usize; 2]>,
}

impl<'a> PackageMerge<'a> {
    fn new(leaves: &'a [Leaf], max_bits: usize) -> Self {
        let mut arena = Vec::with_capacity(max_bits * 2 * leaves.len());
        arena.push(Node {
            weight: leaves[0].weight,
            count: 1,
            tail: NIL,
        });
        arena.push(Node {
            weight: leaves[1].weight,
            count: 2,
            tail: NIL,
        });
        Self {
            leaves,
            arena,
            lists: vec![[0, 1]; max_bits],
        }
    }

    fn alloc(&mut self, node: Node) -> usize {
        self.arena.push(node);
        self.arena.len() - 1
    }

    fn boundary_pm(&mut self, index: usize) {
        let num_symbols = self.leaves.len();
        let last_count = self.arena[self.lists[index][1]].count;
        if index == 0 && last_count >= num_symbols {
            return;
        }

        let old_chain = self.lists[index][1];
        if index == 0 {
            let new_chain = self.alloc(Node {
                weight: self.leaves[last_count].weight,
                count: last_count + 1,
                tail: NIL,
            });
            self.lists[index] = [old_chain, new_chain];
            return;
        }

        let [a, b] = self.lists[index - 1];
        let sum = self.arena[a].weight + self.arena[b].weight;
        if last_count < num_symbols && sum > self.leaves[last_count].weight {
            // A leaf joins this list
            let new_chain = self.alloc(Node {
                weight: self.leaves[last_count].weight,
                count: last_count + 1,
                tail: self.arena[old_chain].tail,
            });
            self.lists[index] = [old_chain, new_chain];
        } else {
            let new_chain = self.alloc(Node {
                weight: sum,
                count: last_count,
                tail: b,
            });
            self.lists[index] = [old_chain, new_chain];
            // Both lookahead chains of the previous list were consumed
            self.boundary_pm(index - 1);
            self.boundary_pm(index - 1);
        }
    }

    fn boundary_pm_final(&mut self, index: usize) {
        let num_symbols = self.leaves.len();
        let last = self.lists[index][1];
        let last_count = self.arena[last].count;
        let [a, b] = self.lists[index - 1];
        let sum = self.arena[a].weight + self.arena[b].weight;
        if last_count < num_symbols && sum > self.leaves[last_count].weight {
            let tail = self.arena[last].tail;
            let new_chain = self.alloc(Node {
                weight: 0,
                count: last_count + 1,
                tail,
            });
            self.lists[index][1] = new_chain;
        } else {
            self.arena[last].tail = b;
        }
    }

    fn extract_bit_lengths(&self, chain: usize, bit_lengths: &mut [u32]) {
        let mut counts = [0usize; 16];
        let mut end = 16;
        let mut node = chain;
        while node != NIL {
            end -= 1;
            counts[end] = self.arena[node].count;
            node = self.arena[node].tail;
        }

        let mut ptr = 15;
        let mut value = 1;
        let mut val = counts[15];
        while ptr >= end {
            while val > counts[ptr - 1] {
                bit_lengths[self.leaves[val - 1].symbol] = value;
                val -= 1;
            }
            ptr -= 1;
            value += 1;
        }
    }
}

/// Compute code lengths of at most `max_bits` for the given symbol frequencies
///
/// Symbols with zero frequency get length 0. A lone used symbol gets length 1.
pub fn length_limited_code_lengths(
    frequencies: &[usize],
    max_bits: usize,
    bit_lengths: &mut [u32],
) -> Result<()> {
    bit_lengths.fill(0);

    let mut leaves: Vec<Leaf> = frequencies
        .iter()
        .enumerate()
        .filter(|(_, &f)| f > 0)
        .map(|(symbol, &weight)| Leaf { weight, symbol })
        .collect();

    if (1usize << max_bits) < leaves.len() {
        return Err(HpiError::InvalidInput(format!(
            "{} symbols cannot be coded in {} bits",
            leaves.len(),
            max_bits
        )));
    }
    match leaves.len() {
        0 => return Ok(()),
        1 => {
            bit_lengths[leaves[0].symbol] = 1;
            return Ok(());
        }
        2 => {
            bit_lengths[leaves[0].symbol] += 1;
            bit_lengths[leaves[1].symbol] += 1;
            return Ok(());
        }
        _ => {}
    }

    // Stable by symbol index
    leaves.sort_by_key(|leaf| (leaf.weight, leaf.symbol));

    let max_bits = max_bits.min(leaves.len() - 1);
    let mut pm = PackageMerge::new(&leaves, max_bits);

    // The last list needs 2n-2 active chains; two exist already
    let runs = 2 * leaves.len() - 4;
    for _ in 0..runs - 1 {
        pm.boundary_pm(max_bits - 1);
    }
    pm.boundary_pm_final(max_bits - 1);

    pm.extract_bit_lengths(pm.lists[max_bits - 1][1], bit_lengths);
    Ok(())
}
