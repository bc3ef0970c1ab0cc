//! Sparse character coverage map
//!
//! Coverage is stored as 256-codepoint blocks; blocks with no characters
//! take no storage. Maps are shared through `Rc` between a face and every
//! sized font built from it.

use crate::unicode::hash_mix;

const BLOCK_SIZE: u32 = 256;
const BLOCK_BYTES: usize = (BLOCK_SIZE / 8) as usize;
const BLOCK_SHIFT: u32 = 8;

type Block = [u8; BLOCK_BYTES];

/// Set of Unicode code points supported by a face or family
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacterMap {
    blocks: Vec<Option<Box<Block>>>,
}

impl CharacterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn test(&self, ch: u32) -> bool {
        let index = (ch >> BLOCK_SHIFT) as usize;
        match self.blocks.get(index) {
            Some(Some(block)) => {
                let bit = (ch & (BLOCK_SIZE - 1)) as usize;
                block[bit >> 3] & (1 << (bit & 7)) != 0
            }
            _ => false,
        }
    }

    fn block_mut(&mut self, index: usize) -> &mut Block {
        if index >= self.blocks.len() {
            self.blocks.resize_with(index + 1, || None);
        }
        self.blocks[index].get_or_insert_with(|| Box::new([0; BLOCK_BYTES]))
    }

    pub fn set(&mut self, ch: u32) {
        let block = self.block_mut((ch >> BLOCK_SHIFT) as usize);
        let bit = (ch & (BLOCK_SIZE - 1)) as usize;
        block[bit >> 3] |= 1 << (bit & 7);
    }

    /// Sets every code point in `start..=end`.
    pub fn set_range(&mut self, start: u32, end: u32) {
        if start > end {
            return;
        }
        for block_index in (start >> BLOCK_SHIFT)..=(end >> BLOCK_SHIFT) {
            let block_start = block_index << BLOCK_SHIFT;
            let lo = start.max(block_start) - block_start;
            let hi = end.min(block_start + BLOCK_SIZE - 1) - block_start;
            let block = self.block_mut(block_index as usize);
            if lo == 0 && hi == BLOCK_SIZE - 1 {
                *block = [0xFF; BLOCK_BYTES];
                continue;
            }
            for bit in lo..=hi {
                block[(bit >> 3) as usize] |= 1 << (bit & 7);
            }
        }
    }

    pub fn clear(&mut self, ch: u32) {
        let index = (ch >> BLOCK_SHIFT) as usize;
        if let Some(Some(block)) = self.blocks.get_mut(index) {
            let bit = (ch & (BLOCK_SIZE - 1)) as usize;
            block[bit >> 3] &= !(1 << (bit & 7));
        }
    }

    pub fn union_with(&mut self, other: &CharacterMap) {
        for (index, block) in other.blocks.iter().enumerate() {
            let Some(src) = block else {
                continue;
            };
            let dst = self.block_mut(index);
            for (d, s) in dst.iter_mut().zip(src.iter()) {
                *d |= *s;
            }
        }
    }

    /// Drops empty blocks and trailing capacity.
    pub fn compact(&mut self) {
        for block in &mut self.blocks {
            if block.as_ref().is_some_and(|b| b.iter().all(|&x| x == 0)) {
                *block = None;
            }
        }
        while matches!(self.blocks.last(), Some(None)) {
            self.blocks.pop();
        }
        self.blocks.shrink_to_fit();
    }

    pub fn is_empty(&self) -> bool {
        self.blocks
            .iter()
            .flatten()
            .all(|b| b.iter().all(|&x| x == 0))
    }

    /// Number of code points in the map
    pub fn count(&self) -> usize {
        self.blocks
            .iter()
            .flatten()
            .map(|b| b.iter().map(|x| x.count_ones() as usize).sum::<usize>())
            .sum()
    }

    /// Content hash, used to share identical maps between faces.
    pub fn hash(&self) -> u32 {
        let mut hash = 0u32;
        for (index, block) in self.blocks.iter().enumerate() {
            let Some(block) = block else {
                continue;
            };
            hash = hash_mix(hash, index as u32);
            for chunk in block.chunks(4) {
                let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                hash = hash_mix(hash, word);
            }
        }
        hash
    }

    pub fn size_of_excluding_this(&self) -> usize {
        self.blocks.capacity() * std::mem::size_of::<Option<Box<Block>>>()
            + self.blocks.iter().flatten().count() * BLOCK_BYTES
    }

    pub fn size_of_including_this(&self) -> usize {
        std::mem::size_of::<Self>() + self.size_of_excluding_this()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_test() {
        let mut map = CharacterMap::new();
        map.set('A' as u32);
        map.set(0x1F600);
        assert!(map.test('A' as u32));
        assert!(map.test(0x1F600));
        assert!(!map.test('B' as u32));
        assert!(!map.test(0x10FFFF));
        assert_eq!(map.count(), 2);
    }

    #[test]
    fn test_set_range_across_blocks() {
        let mut map = CharacterMap::new();
        map.set_range(0xF0, 0x310);
        assert!(!map.test(0xEF));
        assert!(map.test(0xF0));
        assert!(map.test(0x200));
        assert!(map.test(0x310));
        assert!(!map.test(0x311));
        assert_eq!(map.count(), 0x310 - 0xF0 + 1);
    }

    #[test]
    fn test_union_and_compact() {
        let mut a = CharacterMap::new();
        a.set_range(0x20, 0x7E);
        let mut b = CharacterMap::new();
        b.set(0x4E00);
        a.union_with(&b);
        assert!(a.test(0x4E00));
        assert!(a.test('z' as u32));

        a.clear(0x4E00);
        a.compact();
        assert!(!a.test(0x4E00));
        assert_eq!(a.count(), 0x7E - 0x20 + 1);
    }

    #[test]
    fn test_equal_maps_hash_equal() {
        let mut a = CharacterMap::new();
        let mut b = CharacterMap::new();
        a.set_range(0x41, 0x5A);
        for ch in 0x41..=0x5A {
            b.set(ch);
        }
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
    }
}
