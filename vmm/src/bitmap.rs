use crate::error::{Result, VmError};

/// Free/used tracker over `0..capacity`. Physical frames and swap slots both
/// use it. Allocation always hands out the lowest free index.
#[derive(Debug, Clone)]
pub struct SlotBitmap {
    words: Vec<u64>,
    capacity: usize,
    used: usize,
}

impl SlotBitmap {
    pub fn new(capacity: usize) -> Self {
        SlotBitmap {
            words: vec![0; (capacity + 63) / 64],
            capacity,
            used: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Claims the first clear index, or `None` when every index is taken.
    pub fn acquire(&mut self) -> Option<usize> {
        for (word_idx, word) in self.words.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }

            let bit = (!*word).trailing_zeros() as usize;
            let idx = word_idx * 64 + bit;

            if idx >= self.capacity {
                return None;
            }

            *word |= 1u64 << bit;
            self.used += 1;

            return Some(idx);
        }

        None
    }

    pub fn release(&mut self, idx: usize) -> Result<()> {
        if !self.is_set(idx) {
            return Err(VmError::invariant(format!(
                "releasing index {} which is not allocated (capacity {})",
                idx, self.capacity
            )));
        }

        self.words[idx / 64] &= !(1u64 << (idx % 64));
        self.used -= 1;

        Ok(())
    }

    /// Out-of-range indices are reported as clear.
    pub fn is_set(&self, idx: usize) -> bool {
        idx < self.capacity && self.words[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    pub fn count_free(&self) -> usize {
        self.capacity - self.used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hands_out_lowest_free_index() {
        let mut bitmap = SlotBitmap::new(4);

        assert_eq!(bitmap.acquire(), Some(0));
        assert_eq!(bitmap.acquire(), Some(1));
        assert_eq!(bitmap.acquire(), Some(2));

        bitmap.release(1).unwrap();

        assert_eq!(bitmap.acquire(), Some(1));
        assert_eq!(bitmap.acquire(), Some(3));
        assert_eq!(bitmap.acquire(), None);
        assert_eq!(bitmap.count_free(), 0);
    }

    #[test]
    fn capacity_not_multiple_of_word() {
        let mut bitmap = SlotBitmap::new(70);

        for i in 0..70 {
            assert_eq!(bitmap.acquire(), Some(i));
        }

        assert_eq!(bitmap.acquire(), None);
        assert!(bitmap.is_set(69));
        assert!(!bitmap.is_set(70));
    }

    #[test]
    fn double_release_is_an_invariant_violation() {
        let mut bitmap = SlotBitmap::new(8);
        let idx = bitmap.acquire().unwrap();

        bitmap.release(idx).unwrap();

        assert!(matches!(
            bitmap.release(idx),
            Err(VmError::InvariantViolation(_))
        ));
        assert_eq!(bitmap.count_free(), 8);
    }

    #[test]
    fn zero_capacity_is_always_exhausted() {
        let mut bitmap = SlotBitmap::new(0);

        assert_eq!(bitmap.acquire(), None);
        assert_eq!(bitmap.count_free(), 0);
    }
}
