use std::ops::Range;

/// A contiguous byte range `[offset, offset + length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fragment {
    pub offset: u64,
    pub length: u64,
}

/// How a query range `[offset, offset + length)` meets a fragment.
///
/// These are the four interval cases every set operation is built from.
/// `Head` and `Tail` carry the number of fragment bytes inside the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    /// No bytes in common.
    Disjoint,
    /// The range covers the whole fragment.
    Covers,
    /// The range lies strictly inside the fragment, touching neither end.
    Inside,
    /// The range covers the start of the fragment but not its end.
    Head(u64),
    /// The range covers the end of the fragment but not its start.
    Tail(u64),
}

impl Fragment {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// One past the last byte, saturating at `u64::MAX`.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    pub fn byte_range(&self) -> Range<u64> {
        self.offset..self.end()
    }

    pub fn contains_offset(&self, offset: u64) -> bool {
        offset >= self.offset && offset < self.end()
    }

    /// Returns true if `self` ends exactly where `other` starts, or the reverse.
    pub fn touches(&self, other: &Fragment) -> bool {
        self.end() == other.offset || other.end() == self.offset
    }

    /// Classifies the range `[offset, offset + length)` against this fragment.
    /// A range running past `u64::MAX` is clamped there.
    pub fn overlap(&self, offset: u64, length: u64) -> Overlap {
        let end = offset.saturating_add(length);

        if offset <= self.offset && end >= self.end() {
            Overlap::Covers
        } else if offset > self.offset && end < self.end() {
            Overlap::Inside
        } else if end > self.offset && end < self.end() {
            Overlap::Head(end - self.offset)
        } else if offset > self.offset && offset < self.end() {
            Overlap::Tail(self.end() - offset)
        } else {
            Overlap::Disjoint
        }
    }

    /// Number of bytes shared with `[offset, offset + length)`.
    pub fn overlap_len(&self, offset: u64, length: u64) -> u64 {
        match self.overlap(offset, length) {
            Overlap::Disjoint => 0,
            Overlap::Covers => self.length,
            Overlap::Inside => length,
            Overlap::Head(n) | Overlap::Tail(n) => n,
        }
    }
}

impl From<Range<u64>> for Fragment {
    fn from(range: Range<u64>) -> Self {
        Self::new(range.start, range.end.saturating_sub(range.start))
    }
}
