use serde::{Deserialize, Serialize};

const WORD_BITS: usize = 64;

/// Fixed-capacity membership set over `0..capacity`.
///
/// Indices at or beyond the capacity are a caller bug and panic, the same way
/// slice indexing does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitSet {
    capacity: usize,
    words: Vec<u64>,
}

impl BitSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            words: vec![0; capacity.div_ceil(WORD_BITS)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn locate(&self, x: usize) -> (usize, u64) {
        assert!(
            x < self.capacity,
            "bitset index {} out of range (capacity {})",
            x,
            self.capacity
        );
        (x / WORD_BITS, 1u64 << (x % WORD_BITS))
    }

    #[inline]
    pub fn insert(&mut self, x: usize) {
        let (word, mask) = self.locate(x);
        self.words[word] |= mask;
    }

    #[inline]
    pub fn remove(&mut self, x: usize) {
        let (word, mask) = self.locate(x);
        self.words[word] &= !mask;
    }

    #[inline]
    pub fn contains(&self, x: usize) -> bool {
        let (word, mask) = self.locate(x);
        self.words[word] & mask != 0
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(wi * WORD_BITS + bit)
            })
        })
    }

    /// Rewrites `out` with the members in ascending order and returns how many
    /// were written.
    pub fn fill_members<T: TryFrom<usize>>(&self, out: &mut Vec<T>) -> usize {
        out.clear();
        out.extend(self.iter().filter_map(|x| T::try_from(x).ok()));
        out.len()
    }
}
