//! Word-packed bit vector used for every mask in the ECS.
//!
//! A [`BitSet`] has a fixed declared length (in bits) backed by 64-bit words. It is the primitive
//! behind archetype identity, filter matching, scheduler conflict checks, chunk liveness and the
//! per-chunk "marked for removal" sets, so its contract is strict:
//!
//! - Single bit operations ([`set`](BitSet::set), [`clear`](BitSet::clear),
//!   [`is_set`](BitSet::is_set)) panic on an index outside `0..len`.
//! - Boolean operations ([`or`](BitSet::or), [`and`](BitSet::and), [`xor`](BitSet::xor),
//!   [`and_not`](BitSet::and_not)) panic when both operands do not have the same length, and return
//!   whether the result has any bit set.
//! - Bits beyond `len` in the last word are always zero. Every operation that can write them
//!   ([`resize`](BitSet::resize), [`set_all`](BitSet::set_all)) masks them out.
//!
//! # Identity
//!
//! [`BitSet::hash_code`] is a multiplicative rolling hash over the words (walked from the last word
//! to the first, each word multiplied by a rotating prime). Storage uses it through the [`Hash`]
//! impl as the archetype key, and full word equality breaks any collision.
//!
//! ```text
//!  bit:   0 1 2 3 ... 63 | 64 65 ... 127 | 128 ... len-1 | (masked)
//!  word:  [      0       ] [      1      ] [     2     ...          ]
//! ```
//!
//! # Enumeration
//!
//! - [`iter`](BitSet::iter) yields `(bit, state)` for every bit, forward.
//! - [`iter_rev`](BitSet::iter_rev) yields `(bit, state)` for every bit, from the last to the first.
//! - [`ones`](BitSet::ones) yields only the set bits, skipping empty words entirely.

mod iter;

use std::{fmt, hash};

pub use iter::{Iter, Ones, RevIter};

const WORD_BITS: usize = u64::BITS as usize;
const WORD_SHIFT: usize = 6;
const WORD_MASK: usize = WORD_BITS - 1;

const HASH_SEED: u64 = 2_166_136_261;

const PRIMES: [u64; 30] = [
    3, 7, 17, 29, 53, 97, 193, 389, 769, 1543, 3079, 6151, 12289, 24593, 49157, 98317, 196613,
    393241, 786433, 1572869, 3145739, 6291469, 12582917, 25165843, 50331653, 100663319, 201326611,
    402653189, 805306457, 1610612741,
];

/// A fixed length, word-packed bit vector.
#[derive(Clone, Default)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    /// Create a bit set able to hold `len` bits, all clear. Storage is rounded up to a whole word.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; words_for(len)],
            len,
        }
    }

    /// Create a bit set of `len` bits with the given bits set.
    pub fn from_bits(len: usize, bits: impl IntoIterator<Item = usize>) -> Self {
        let mut set = Self::new(len);
        for bit in bits {
            set.set(bit);
        }
        set
    }

    /// The declared length of this set, in bits.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the declared length is zero.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of backing 64-bit words.
    #[inline]
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Set the given bit.
    ///
    /// # Panics
    ///
    /// Panics if `bit >= len`.
    #[inline]
    pub fn set(&mut self, bit: usize) {
        self.check_bounds(bit);
        self.words[bit >> WORD_SHIFT] |= 1 << (bit & WORD_MASK);
    }

    /// Clear the given bit.
    ///
    /// # Panics
    ///
    /// Panics if `bit >= len`.
    #[inline]
    pub fn clear(&mut self, bit: usize) {
        self.check_bounds(bit);
        self.words[bit >> WORD_SHIFT] &= !(1 << (bit & WORD_MASK));
    }

    /// Set or clear the given bit depending on `state`.
    #[inline]
    pub fn put(&mut self, bit: usize, state: bool) {
        if state {
            self.set(bit);
        } else {
            self.clear(bit);
        }
    }

    /// Returns `true` if the given bit is set.
    ///
    /// # Panics
    ///
    /// Panics if `bit >= len`.
    #[inline]
    pub fn is_set(&self, bit: usize) -> bool {
        self.check_bounds(bit);
        self.words[bit >> WORD_SHIFT] & (1 << (bit & WORD_MASK)) != 0
    }

    /// Set the first `count` bits to `state` and clear every bit after them.
    ///
    /// # Panics
    ///
    /// Panics if `count > len`.
    pub fn set_all(&mut self, state: bool, count: usize) {
        assert!(count <= self.len, "count exceeds bit set length");

        let full_words = count >> WORD_SHIFT;
        let remaining = count & WORD_MASK;
        let fill = if state { u64::MAX } else { 0 };

        for word in &mut self.words[..full_words] {
            *word = fill;
        }

        let mut next = full_words;
        if remaining > 0 {
            self.words[full_words] = if state { (1 << remaining) - 1 } else { 0 };
            next += 1;
        }

        for word in &mut self.words[next..] {
            *word = 0;
        }
    }

    /// Clear every bit.
    #[inline]
    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    /// Copy every bit from `other`, returning whether any bit is set.
    ///
    /// # Panics
    ///
    /// Panics if the sets do not have the same length.
    pub fn copy_from(&mut self, other: &BitSet) -> bool {
        self.combine(other, |_, b| b)
    }

    /// `self |= other`, returning whether any bit of the result is set.
    ///
    /// # Panics
    ///
    /// Panics if the sets do not have the same length.
    pub fn or(&mut self, other: &BitSet) -> bool {
        self.combine(other, |a, b| a | b)
    }

    /// `self &= other`, returning whether any bit of the result is set.
    ///
    /// # Panics
    ///
    /// Panics if the sets do not have the same length.
    pub fn and(&mut self, other: &BitSet) -> bool {
        self.combine(other, |a, b| a & b)
    }

    /// `self ^= other`, returning whether any bit of the result is set.
    ///
    /// # Panics
    ///
    /// Panics if the sets do not have the same length.
    pub fn xor(&mut self, other: &BitSet) -> bool {
        self.combine(other, |a, b| a ^ b)
    }

    /// `self &= !other`, returning whether any bit of the result is set.
    ///
    /// # Panics
    ///
    /// Panics if the sets do not have the same length.
    pub fn and_not(&mut self, other: &BitSet) -> bool {
        self.combine(other, |a, b| a & !b)
    }

    /// Returns `true` if every bit set in `other` is also set in `self`.
    ///
    /// # Panics
    ///
    /// Panics if the sets do not have the same length.
    pub fn is_superset(&self, other: &BitSet) -> bool {
        self.check_same_len(other);
        self.words
            .iter()
            .zip(&other.words)
            .all(|(a, b)| a & b == *b)
    }

    /// Returns `true` if at least one bit is set in both sets.
    ///
    /// # Panics
    ///
    /// Panics if the sets do not have the same length.
    pub fn intersects(&self, other: &BitSet) -> bool {
        self.check_same_len(other);
        self.words
            .iter()
            .zip(&other.words)
            .any(|(a, b)| a & b != 0)
    }

    /// Returns `true` if any bit is set.
    #[inline]
    pub fn any_set(&self) -> bool {
        self.words.iter().any(|word| *word != 0)
    }

    /// Count the set bits.
    #[inline]
    pub fn count_set(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Find the lowest clear bit below `len`, if any.
    pub fn first_clear_bit(&self) -> Option<usize> {
        for (index, word) in self.words.iter().enumerate() {
            let inverted = !word;
            if inverted == 0 {
                continue;
            }

            // Isolate the lowest clear bit of the word; trailing_zeros is branch free.
            let bit = (index << WORD_SHIFT) + inverted.trailing_zeros() as usize;
            return (bit < self.len).then_some(bit);
        }
        None
    }

    /// Resize to `len` bits, keeping every bit below `min(old len, len)` and clearing the rest.
    pub fn resize(&mut self, len: usize) {
        let valid = self.len.min(len);
        self.words.resize(words_for(len), 0);
        self.len = len;

        if valid == 0 {
            self.words.fill(0);
            return;
        }

        let last = (valid - 1) >> WORD_SHIFT;
        let bits_in_last = valid & WORD_MASK;
        if bits_in_last != 0 {
            self.words[last] &= (1 << bits_in_last) - 1;
        }
        for word in &mut self.words[last + 1..] {
            *word = 0;
        }
    }

    /// Multiplicative rolling hash over the backing words.
    pub fn hash_code(&self) -> u64 {
        let mut prime_index = 0;
        let mut hash = HASH_SEED;

        for (index, word) in self.words.iter().enumerate().rev() {
            prime_index = (prime_index + 1) % (PRIMES.len() - 1);
            hash ^= index as u64;
            hash ^= word.wrapping_mul(PRIMES[prime_index]);
        }

        hash
    }

    /// Iterate `(bit, state)` pairs from the first bit to the last.
    #[inline]
    pub fn iter(&self) -> Iter<'_> {
        Iter::new(self)
    }

    /// Iterate `(bit, state)` pairs from the last bit to the first.
    #[inline]
    pub fn iter_rev(&self) -> RevIter<'_> {
        RevIter::new(self)
    }

    /// Iterate only the indexes of set bits, in ascending order.
    #[inline]
    pub fn ones(&self) -> Ones<'_> {
        Ones::new(self)
    }

    #[inline]
    pub(crate) fn words(&self) -> &[u64] {
        &self.words
    }

    #[inline]
    fn check_bounds(&self, bit: usize) {
        assert!(
            bit < self.len,
            "bit index {bit} out of range for bit set of length {}",
            self.len
        );
    }

    #[inline]
    fn check_same_len(&self, other: &BitSet) {
        assert_eq!(self.len, other.len, "bit set sizes should be equal");
    }

    #[inline]
    fn combine(&mut self, other: &BitSet, op: impl Fn(u64, u64) -> u64) -> bool {
        self.check_same_len(other);
        let mut any = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a = op(*a, *b);
            any |= *a != 0;
        }
        any
    }
}

#[inline]
fn words_for(len: usize) -> usize {
    len.div_ceil(WORD_BITS).max(1)
}

impl PartialEq for BitSet {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.words == other.words
    }
}

impl Eq for BitSet {}

impl hash::Hash for BitSet {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_code());
    }
}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitSet")
            .field("len", &self.len)
            .field("ones", &self.ones().collect::<Vec<_>>())
            .finish()
    }
}
