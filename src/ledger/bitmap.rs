/// Per-block completion flags.
///
/// Bits are numbered from the high bit of the first byte, the same layout
/// as a peer-wire bitfield.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionBitmap {
    bits: Vec<u8>,
    block_count: usize,
}

impl CompletionBitmap {
    pub fn new(block_count: usize) -> Self {
        Self {
            bits: vec![0; block_count.div_ceil(8)],
            block_count,
        }
    }

    pub fn is_done(&self, block: usize) -> bool {
        if block >= self.block_count {
            return false;
        }
        (self.bits[block / 8] >> (7 - block % 8)) & 1 == 1
    }

    /// Flags `block` as done. Out-of-range blocks are ignored.
    pub fn set(&mut self, block: usize) -> bool {
        if block >= self.block_count {
            return false;
        }
        self.bits[block / 8] |= 1 << (7 - block % 8);
        true
    }

    /// Clears the flag for `block`. Out-of-range blocks are ignored.
    pub fn clear(&mut self, block: usize) -> bool {
        if block >= self.block_count {
            return false;
        }
        self.bits[block / 8] &= !(1 << (7 - block % 8));
        true
    }

    pub fn clear_all(&mut self) {
        self.bits.fill(0);
    }

    /// Number of blocks flagged done.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn len(&self) -> usize {
        self.block_count
    }

    pub fn is_empty(&self) -> bool {
        self.block_count == 0
    }

    pub fn is_complete(&self) -> bool {
        self.count() == self.block_count
    }

    /// Indices of all done blocks, ascending.
    pub fn done_blocks(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.block_count).filter(|&i| self.is_done(i))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear() {
        let mut bitmap = CompletionBitmap::new(10);
        assert!(bitmap.set(0));
        assert!(bitmap.set(9));
        assert!(!bitmap.set(10));

        assert!(bitmap.is_done(0));
        assert!(bitmap.is_done(9));
        assert!(!bitmap.is_done(5));
        assert_eq!(bitmap.count(), 2);
        assert_eq!(bitmap.as_bytes(), &[0x80, 0x40]);

        bitmap.clear(0);
        assert!(!bitmap.is_done(0));
        assert_eq!(bitmap.done_blocks().collect::<Vec<_>>(), vec![9]);
    }

    #[test]
    fn test_complete() {
        let mut bitmap = CompletionBitmap::new(3);
        for i in 0..3 {
            bitmap.set(i);
        }
        assert!(bitmap.is_complete());
        bitmap.clear_all();
        assert_eq!(bitmap.count(), 0);
        assert!(!bitmap.is_complete());
    }
}
