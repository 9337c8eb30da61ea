use super::{BitSet, WORD_BITS, WORD_MASK, WORD_SHIFT};

/// Forward `(bit, state)` iterator over every bit of a [`BitSet`].
pub struct Iter<'a> {
    set: &'a BitSet,
    next: usize,
}

impl<'a> Iter<'a> {
    pub(super) fn new(set: &'a BitSet) -> Self {
        Self { set, next: 0 }
    }
}

impl Iterator for Iter<'_> {
    type Item = (usize, bool);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.set.len {
            return None;
        }
        let bit = self.next;
        self.next += 1;
        Some((bit, self.set.words[bit >> WORD_SHIFT] & (1 << (bit & WORD_MASK)) != 0))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.set.len - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}

/// Reverse `(bit, state)` iterator, from the last bit down to bit zero.
pub struct RevIter<'a> {
    set: &'a BitSet,
    remaining: usize,
}

impl<'a> RevIter<'a> {
    pub(super) fn new(set: &'a BitSet) -> Self {
        Self {
            set,
            remaining: set.len,
        }
    }
}

impl Iterator for RevIter<'_> {
    type Item = (usize, bool);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let bit = self.remaining;
        Some((bit, self.set.words[bit >> WORD_SHIFT] & (1 << (bit & WORD_MASK)) != 0))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for RevIter<'_> {}

/// Set-bit iterator. Empty words are skipped without visiting their bits.
pub struct Ones<'a> {
    words: &'a [u64],
    len: usize,
    word_index: usize,
    current: u64,
}

impl<'a> Ones<'a> {
    pub(super) fn new(set: &'a BitSet) -> Self {
        Self {
            words: &set.words,
            len: set.len,
            word_index: 0,
            current: set.words.first().copied().unwrap_or(0),
        }
    }
}

impl Iterator for Ones<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current != 0 {
                let bit = self.word_index * WORD_BITS + self.current.trailing_zeros() as usize;
                // Drop the lowest set bit.
                self.current &= self.current - 1;
                return (bit < self.len).then_some(bit);
            }

            self.word_index += 1;
            if self.word_index >= self.words.len() {
                return None;
            }
            self.current = self.words[self.word_index];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_and_reverse_cover_every_bit() {
        // Given
        let set = BitSet::from_bits(70, [0, 65, 69]);

        // When
        let forward: Vec<_> = set.iter().filter(|(_, state)| *state).map(|(bit, _)| bit).collect();
        let reverse: Vec<_> = set.iter_rev().filter(|(_, state)| *state).map(|(bit, _)| bit).collect();

        // Then
        assert_eq!(set.iter().len(), 70);
        assert_eq!(forward, vec![0, 65, 69]);
        assert_eq!(reverse, vec![69, 65, 0]);
    }

    #[test]
    fn ones_skips_empty_words() {
        // Given
        let set = BitSet::from_bits(1000, [3, 500, 999]);

        // Then
        assert_eq!(set.ones().collect::<Vec<_>>(), vec![3, 500, 999]);
    }

    #[test]
    fn ones_on_empty_set() {
        let set = BitSet::new(0);
        assert_eq!(set.ones().next(), None);
        assert_eq!(set.iter().next(), None);
        assert_eq!(set.iter_rev().next(), None);
    }
}
