#![forbid(unsafe_code)]

const WORD_BITS: usize = u64::BITS as usize;

/// Packed per-row membership flags for one dimension's filter.
///
/// Row `i` lives in word `i / 64` at bit `i % 64`, counting from the least significant bit.
/// Bits past `len` in the last word are always clear.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BitVec {
    words: Vec<u64>,
    len: usize,
    ones: usize,
}

fn locate(index: usize) -> (usize, u64) {
    (index / WORD_BITS, 1u64 << (index % WORD_BITS))
}

impl BitVec {
    pub fn new() -> Self {
        Self::default()
    }

    /// `len` bits, every one of them set.
    pub fn all_set(len: usize) -> Self {
        let mut words = vec![u64::MAX; len.div_ceil(WORD_BITS)];
        let tail = len % WORD_BITS;
        if let (Some(last), true) = (words.last_mut(), tail != 0) {
            *last = u64::MAX >> (WORD_BITS - tail);
        }
        Self {
            words,
            len,
            ones: len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, value: bool) {
        let (word, mask) = locate(self.len);
        if word == self.words.len() {
            self.words.push(0);
        }
        self.len += 1;
        if value {
            self.words[word] |= mask;
            self.ones += 1;
        }
    }

    pub fn get(&self, index: usize) -> bool {
        debug_assert!(index < self.len, "bit {index} out of {} bits", self.len);
        let (word, mask) = locate(index);
        self.words[word] & mask != 0
    }

    /// Set bit `index` to `value`, keeping the population count current.
    pub fn set(&mut self, index: usize, value: bool) {
        if self.get(index) == value {
            return;
        }
        let (word, mask) = locate(index);
        self.words[word] ^= mask;
        if value {
            self.ones += 1;
        } else {
            self.ones -= 1;
        }
    }

    pub fn count_ones(&self) -> usize {
        self.ones
    }

    pub fn all_true(&self) -> bool {
        self.ones == self.len
    }

    /// Drop every bit whose position is `false` in `keep`, shifting the survivors down.
    ///
    /// Used when rows are removed from the dataset so bit positions keep matching row positions.
    pub fn retain(&mut self, keep: &[bool]) {
        debug_assert_eq!(self.len, keep.len(), "BitVec length mismatch");
        let mut out = BitVec::new();
        for (idx, &kept) in keep.iter().enumerate() {
            if kept {
                out.push(self.get(idx));
            }
        }
        *self = out;
    }
}
