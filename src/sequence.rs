//! Tiered sequence storage.
//!
//! A `TieredSequence` keeps its elements in a list of blocks of roughly
//! √N elements each, plus the cumulative start offset of every block. That
//! gives O(log √N) random access and O(√N) positional insert/delete, which
//! is what both table columns (rows removed from the middle) and index
//! entries (rows re-inserted at their sorted position) need.

use crate::error::{Result, ViewError};
use std::cmp::Ordering;

#[derive(Debug, Clone)]
pub struct TieredSequence<T> {
    blocks: Vec<Vec<T>>,
    /// `block_starts[i]` is the global position of `blocks[i][0]`.
    block_starts: Vec<usize>,
    size: usize,
}

impl<T: Clone> TieredSequence<T> {
    const MIN_BLOCK_SIZE: usize = 16;
    const MAX_BLOCK_SIZE: usize = 4096;

    pub fn new() -> Self {
        TieredSequence {
            blocks: Vec::new(),
            block_starts: Vec::new(),
            size: 0,
        }
    }

    pub fn from_vec(values: Vec<T>) -> Self {
        let mut sequence = Self::new();
        sequence.size = values.len();
        sequence.rebuild_blocks(values);
        sequence
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn ideal_block_size(&self) -> usize {
        let sqrt = (self.size as f64).sqrt() as usize;
        sqrt.clamp(Self::MIN_BLOCK_SIZE, Self::MAX_BLOCK_SIZE)
    }

    fn locate(&self, index: usize) -> Result<(usize, usize)> {
        if index >= self.size {
            return Err(ViewError::IndexOutOfRange {
                index,
                len: self.size,
            });
        }
        let block = match self.block_starts.binary_search(&index) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        Ok((block, index - self.block_starts[block]))
    }

    fn shift_starts_after(&mut self, block: usize, delta: isize) {
        for start in self.block_starts.iter_mut().skip(block + 1) {
            *start = (*start as isize + delta) as usize;
        }
    }

    fn split_if_large(&mut self, block: usize) {
        if self.blocks[block].len() <= 2 * self.ideal_block_size() {
            return;
        }
        let mid = self.blocks[block].len() / 2;
        let tail = self.blocks[block].split_off(mid);
        let tail_start = self.block_starts[block] + mid;
        self.blocks.insert(block + 1, tail);
        self.block_starts.insert(block + 1, tail_start);
    }

    fn merge_if_small(&mut self, block: usize) {
        if self.blocks[block].is_empty() {
            self.blocks.remove(block);
            self.block_starts.remove(block);
            return;
        }
        let ideal = self.ideal_block_size();
        if self.blocks.len() <= 1 || self.blocks[block].len() >= ideal / 4 {
            return;
        }
        if block + 1 < self.blocks.len()
            && self.blocks[block].len() + self.blocks[block + 1].len() <= 2 * ideal
        {
            let next = self.blocks.remove(block + 1);
            self.block_starts.remove(block + 1);
            self.blocks[block].extend(next);
        } else if block > 0 && self.blocks[block - 1].len() + self.blocks[block].len() <= 2 * ideal {
            let current = self.blocks.remove(block);
            self.block_starts.remove(block);
            self.blocks[block - 1].extend(current);
        }
    }

    fn rebuild_blocks(&mut self, values: Vec<T>) {
        self.blocks.clear();
        self.block_starts.clear();
        let block_size = self.ideal_block_size();
        let mut start = 0;
        for chunk in values.chunks(block_size) {
            self.blocks.push(chunk.to_vec());
            self.block_starts.push(start);
            start += chunk.len();
        }
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.locate(index)
            .ok()
            .map(|(block, offset)| &self.blocks[block][offset])
    }

    pub fn set(&mut self, index: usize, value: T) -> Result<()> {
        let (block, offset) = self.locate(index)?;
        self.blocks[block][offset] = value;
        Ok(())
    }

    pub fn push(&mut self, value: T) {
        if self.blocks.is_empty() {
            self.blocks.push(vec![value]);
            self.block_starts.push(0);
            self.size = 1;
            return;
        }
        let last = self.blocks.len() - 1;
        self.blocks[last].push(value);
        self.size += 1;
        self.split_if_large(last);
    }

    pub fn insert(&mut self, index: usize, value: T) -> Result<()> {
        if index > self.size {
            return Err(ViewError::IndexOutOfRange {
                index,
                len: self.size,
            });
        }
        if index == self.size {
            self.push(value);
            return Ok(());
        }
        let (block, offset) = self.locate(index)?;
        self.blocks[block].insert(offset, value);
        self.size += 1;
        self.shift_starts_after(block, 1);
        self.split_if_large(block);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<T> {
        let (block, offset) = self.locate(index)?;
        let value = self.blocks[block].remove(offset);
        self.size -= 1;
        self.shift_starts_after(block, -1);
        self.merge_if_small(block);
        Ok(value)
    }

    /// Position of the first element for which `predicate` is false, given
    /// that the sequence is partitioned by it.
    pub fn partition_point<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let block = self
            .blocks
            .partition_point(|block| block.last().map_or(true, &mut predicate));
        if block == self.blocks.len() {
            return self.size;
        }
        self.block_starts[block] + self.blocks[block].partition_point(predicate)
    }

    /// Inserts `value` at its position in a sequence sorted by `compare`,
    /// after any equal elements. Returns the position used.
    pub fn insert_sorted_by<F>(&mut self, value: T, mut compare: F) -> Result<usize>
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        let position = self.partition_point(|existing| compare(existing, &value) != Ordering::Greater);
        self.insert(position, value)?;
        Ok(position)
    }

    /// Removes every element matching `predicate` in one pass.
    pub fn remove_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let before = self.size;
        let kept: Vec<T> = self.iter().filter(|value| !predicate(*value)).cloned().collect();
        self.size = kept.len();
        self.rebuild_blocks(kept);
        before - self.size
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.blocks.iter().flat_map(|block| block.iter())
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    #[cfg(test)]
    fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

impl<T: Clone> Default for TieredSequence<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> FromIterator<T> for TieredSequence<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_get() {
        let mut seq = TieredSequence::new();
        for i in 0..1000 {
            seq.push(i);
        }
        assert_eq!(seq.len(), 1000);
        assert_eq!(seq.get(0), Some(&0));
        assert_eq!(seq.get(999), Some(&999));
        assert_eq!(seq.get(1000), None);
        assert!(seq.block_count() > 1);
    }

    #[test]
    fn test_insert_and_remove_in_the_middle() {
        let mut seq: TieredSequence<u64> = (0..200).collect();
        seq.insert(100, 5000).unwrap();
        assert_eq!(seq.get(100), Some(&5000));
        assert_eq!(seq.get(101), Some(&100));
        assert_eq!(seq.remove(100).unwrap(), 5000);
        assert_eq!(seq.to_vec(), (0..200).collect::<Vec<_>>());
        assert!(seq.insert(500, 1).is_err());
        assert!(seq.remove(200).is_err());
    }

    #[test]
    fn test_many_removes_keep_positions_consistent() {
        let mut seq: TieredSequence<u64> = (0..500).collect();
        for _ in 0..250 {
            seq.remove(0).unwrap();
        }
        assert_eq!(seq.len(), 250);
        for (i, value) in seq.iter().enumerate() {
            assert_eq!(*value, i as u64 + 250);
            assert_eq!(seq.get(i), Some(value));
        }
    }

    #[test]
    fn test_insert_sorted_by() {
        let mut seq = TieredSequence::new();
        for value in [50, 10, 40, 10, 30, 20, 60] {
            seq.insert_sorted_by(value, |a: &i32, b: &i32| a.cmp(b)).unwrap();
        }
        assert_eq!(seq.to_vec(), vec![10, 10, 20, 30, 40, 50, 60]);

        let big: TieredSequence<i32> = (0..1000).map(|i| i * 2).collect();
        assert_eq!(big.partition_point(|v| *v < 777), 389);
        assert_eq!(big.partition_point(|v| *v < 5000), 1000);
    }

    #[test]
    fn test_remove_where() {
        let mut seq: TieredSequence<u64> = (0..100).collect();
        assert_eq!(seq.remove_where(|v| v % 2 == 0), 50);
        assert_eq!(seq.len(), 50);
        assert_eq!(seq.get(10), Some(&21));
    }
}
