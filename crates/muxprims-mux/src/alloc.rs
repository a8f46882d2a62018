use muxprims_frame::MAX_CHANNELS;

const WORDS: usize = MAX_CHANNELS / 64;

/// Bitmap over the one-byte channel id space. Allocation picks the lowest
/// free id.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    bits: [u64; WORDS],
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lowest free id, or `None` if all ids are in use.
    pub fn allocate(&mut self) -> Option<u8> {
        let (word, bits) = self
            .bits
            .iter()
            .enumerate()
            .find(|(_, bits)| **bits != u64::MAX)?;
        let bit = bits.trailing_ones() as usize;
        let id = (word * 64 + bit) as u8;
        self.bits[word] |= 1 << bit;
        Some(id)
    }

    /// Mark a specific id as used. Returns `false` if it already was.
    pub fn claim(&mut self, id: u8) -> bool {
        let (word, mask) = Self::slot(id);
        if self.bits[word] & mask != 0 {
            return false;
        }
        self.bits[word] |= mask;
        true
    }

    /// Return an id to the free pool. Releasing a free id is a no-op.
    pub fn release(&mut self, id: u8) {
        let (word, mask) = Self::slot(id);
        self.bits[word] &= !mask;
    }

    #[cfg(test)]
    fn is_allocated(&self, id: u8) -> bool {
        let (word, mask) = Self::slot(id);
        self.bits[word] & mask != 0
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.bits.iter().map(|bits| bits.count_ones() as usize).sum()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn is_full(&self) -> bool {
        self.len() == MAX_CHANNELS
    }

    fn slot(id: u8) -> (usize, u64) {
        let id = id as usize;
        (id / 64, 1u64 << (id % 64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_lowest_free_id() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.allocate(), Some(0));
        assert_eq!(ids.allocate(), Some(1));
        assert_eq!(ids.allocate(), Some(2));

        ids.release(1);
        assert_eq!(ids.allocate(), Some(1));
        assert_eq!(ids.allocate(), Some(3));
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn exhausts_after_256() {
        let mut ids = IdAllocator::new();
        for expected in 0..=255u8 {
            assert_eq!(ids.allocate(), Some(expected));
        }
        assert!(ids.is_full());
        assert_eq!(ids.allocate(), None);

        ids.release(200);
        assert!(!ids.is_full());
        assert_eq!(ids.allocate(), Some(200));
    }

    #[test]
    fn claim_rejects_used_ids() {
        let mut ids = IdAllocator::new();
        assert!(ids.claim(70));
        assert!(!ids.claim(70));
        assert!(ids.is_allocated(70));
        assert_eq!(ids.allocate(), Some(0));

        ids.release(70);
        ids.release(70);
        assert!(!ids.is_allocated(70));
        assert_eq!(ids.len(), 1);
        assert!(!ids.is_empty());
    }

    #[test]
    fn crosses_word_boundaries() {
        let mut ids = IdAllocator::new();
        for id in 0..64u8 {
            assert!(ids.claim(id));
        }
        assert_eq!(ids.allocate(), Some(64));
        assert!(ids.claim(255));
        ids.release(3);
        assert_eq!(ids.allocate(), Some(3));
    }
}
