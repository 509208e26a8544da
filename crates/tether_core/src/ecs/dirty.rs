//! # Dirty Set
//!
//! Entity slots written since the last replication scan, one bit per slot.
//! The steady-state scan walks only these instead of every entity.

/// Slot indices written since the last [`DirtyTracker::drain`].
#[derive(Clone, Debug, Default)]
pub struct DirtyTracker {
    /// 64 slots per word; a set bit means written.
    words: Vec<u64>,
    /// Set bits across `words`.
    marked: usize,
}

impl DirtyTracker {
    /// Creates a set with room for `slots` without growing.
    #[must_use]
    pub fn new(slots: usize) -> Self {
        Self {
            words: vec![0; slots.div_ceil(64)],
            marked: 0,
        }
    }

    /// Marks slot `index`. Grows the set if needed.
    #[inline]
    pub fn mark(&mut self, index: usize) {
        let (word, mask) = locate(index);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        if self.words[word] & mask == 0 {
            self.words[word] |= mask;
            self.marked += 1;
        }
    }

    /// Returns true if slot `index` is marked.
    #[inline]
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        let (word, mask) = locate(index);
        self.words.get(word).is_some_and(|bits| bits & mask != 0)
    }

    /// Number of marked slots.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.marked
    }

    /// Returns true if nothing is marked.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.marked == 0
    }

    /// Marked slots in ascending order.
    pub fn iter(&self) -> DirtyIterator<'_> {
        DirtyIterator {
            words: &self.words,
            next_word: 0,
            pending: 0,
        }
    }

    /// Returns the marked slots, ascending, and unmarks them all.
    pub fn drain(&mut self) -> Vec<usize> {
        if self.marked == 0 {
            return Vec::new();
        }
        let indices = self.iter().collect();
        self.words.fill(0);
        self.marked = 0;
        indices
    }
}

#[inline]
const fn locate(index: usize) -> (usize, u64) {
    (index / 64, 1 << (index % 64))
}

/// Iterator over marked slots.
pub struct DirtyIterator<'a> {
    words: &'a [u64],
    next_word: usize,
    /// Unvisited bits of word `next_word - 1`.
    pending: u64,
}

impl Iterator for DirtyIterator<'_> {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        while self.pending == 0 {
            self.pending = *self.words.get(self.next_word)?;
            self.next_word += 1;
        }
        let bit = self.pending.trailing_zeros() as usize;
        self.pending &= self.pending - 1;
        Some((self.next_word - 1) * 64 + bit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_iterate() {
        let mut dirty = DirtyTracker::new(8);
        dirty.mark(3);
        dirty.mark(130);
        dirty.mark(3);

        assert_eq!(dirty.len(), 2);
        assert!(dirty.contains(130));
        assert!(!dirty.contains(4));
        assert!(!dirty.contains(10_000));
        assert_eq!(dirty.iter().collect::<Vec<_>>(), vec![3, 130]);
    }

    #[test]
    fn test_drain_clears() {
        let mut dirty = DirtyTracker::default();
        dirty.mark(63);
        dirty.mark(64);

        assert_eq!(dirty.drain(), vec![63, 64]);
        assert!(dirty.is_empty());
        assert_eq!(dirty.iter().count(), 0);
        assert!(dirty.drain().is_empty());
    }
}
