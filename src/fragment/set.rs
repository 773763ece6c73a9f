use rand::Rng;

use super::allocator::{FragmentAllocator, NodeId};
use super::error::FragmentError;
use super::range::{Fragment, Overlap};

/// An ordered set of disjoint byte ranges.
///
/// Fragments are kept sorted by offset in a doubly linked list whose nodes
/// live in the set's own [`FragmentAllocator`]. Well-formed sets never store
/// zero-length, overlapping or touching fragments; see
/// [`add_merge`](Self::add_merge) for the one way a caller can break that.
#[derive(Debug, Clone, Default)]
pub struct FragmentSet {
    alloc: FragmentAllocator,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    count: usize,
    total: u64,
}

impl FragmentSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty set backed by the given allocator.
    pub fn with_allocator(alloc: FragmentAllocator) -> Self {
        Self {
            alloc,
            ..Self::default()
        }
    }

    /// Creates a set holding the single range `[offset, offset + length)`.
    pub fn from_range(offset: u64, length: u64) -> Result<Self, FragmentError> {
        checked_end(offset, length)?;
        let mut set = Self::new();
        set.push_back(offset, length)?;
        Ok(set)
    }

    /// Builds a set by merging every fragment of `fragments` in turn.
    pub fn from_fragments<I>(fragments: I) -> Result<Self, FragmentError>
    where
        I: IntoIterator<Item = Fragment>,
    {
        let mut set = Self::new();
        for fragment in fragments {
            set.add_merge(fragment.offset, fragment.length)?;
        }
        Ok(set)
    }

    /// Number of fragments.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Sum of all fragment lengths.
    pub fn total_length(&self) -> u64 {
        self.total
    }

    pub fn first(&self) -> Option<Fragment> {
        self.head.map(|id| self.fragment(id))
    }

    pub fn last(&self) -> Option<Fragment> {
        self.tail.map(|id| self.fragment(id))
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            set: self,
            cursor: self.head,
        }
    }

    /// Copies the fragments out in order.
    pub fn fragments(&self) -> Vec<Fragment> {
        self.iter().collect()
    }

    /// The allocator backing this set.
    pub fn allocator(&self) -> &FragmentAllocator {
        &self.alloc
    }

    /// Removes every fragment. Nodes go back to the free list.
    pub fn clear(&mut self) {
        let mut cursor = self.head;
        while let Some(id) = cursor {
            cursor = self.alloc.node(id).next;
            self.alloc.release(id);
        }
        self.head = None;
        self.tail = None;
        self.count = 0;
        self.total = 0;
    }

    /// Removes `[offset, offset + length)` from the set.
    ///
    /// Fragments inside the range are deleted, fragments straddling one end
    /// are truncated, and a fragment containing the whole range is split in
    /// two. Returns the number of bytes removed. A range running past
    /// `u64::MAX` is clamped there.
    ///
    /// # Errors
    ///
    /// Splitting needs one extra node. If it cannot be allocated the set is
    /// left as it was and [`FragmentError::OutOfMemory`] is returned.
    pub fn subtract(&mut self, offset: u64, length: u64) -> Result<u64, FragmentError> {
        if self.head.is_none() || length == 0 {
            return Ok(0);
        }

        let end = offset.saturating_add(length);
        let mut removed = 0u64;
        let mut cursor = self.head;

        while let Some(id) = cursor {
            let fragment = self.fragment(id);
            cursor = self.alloc.node(id).next;

            if fragment.offset >= end {
                break;
            }

            match fragment.overlap(offset, length) {
                Overlap::Disjoint => {}
                Overlap::Covers => {
                    self.unlink(id);
                    removed += fragment.length;
                }
                Overlap::Inside => {
                    if let Err(e) = self.insert_after(Some(id), end, fragment.end() - end) {
                        self.total -= removed;
                        return Err(e);
                    }
                    self.alloc.node_mut(id).length = offset - fragment.offset;
                    removed += length;
                    break;
                }
                Overlap::Head(n) => {
                    let node = self.alloc.node_mut(id);
                    node.offset += n;
                    node.length -= n;
                    removed += n;
                }
                Overlap::Tail(n) => {
                    self.alloc.node_mut(id).length -= n;
                    removed += n;
                }
            }
        }

        self.total -= removed;
        Ok(removed)
    }

    /// Removes every fragment of `other` from this set.
    pub fn subtract_set(&mut self, other: &FragmentSet) -> Result<u64, FragmentError> {
        let mut removed = 0;
        for fragment in other.iter() {
            if self.is_empty() {
                break;
            }
            removed += self.subtract(fragment.offset, fragment.length)?;
        }
        Ok(removed)
    }

    /// Adds `[offset, offset + length)`, merging it with its neighbours.
    ///
    /// The new range is first merged into the first fragment found that ends
    /// where it starts or starts where it ends. The grown fragment is then
    /// merged with the first other fragment it touches. On a well-formed set
    /// that absorbs both neighbours; a range that overlaps existing
    /// fragments is stored alongside them and the set stops being
    /// well-formed.
    ///
    /// # Errors
    ///
    /// [`FragmentError::Overflow`] if the range ends past `u64::MAX`.
    pub fn add_merge(&mut self, offset: u64, length: u64) -> Result<(), FragmentError> {
        if length == 0 {
            return Ok(());
        }

        let end = checked_end(offset, length)?;
        let mut grown = None;
        let mut cursor = self.head;

        while let Some(id) = cursor {
            let node = self.alloc.node_mut(id);
            if node.offset.saturating_add(node.length) == offset {
                node.length += length;
                grown = Some(id);
                break;
            }
            if node.offset == end {
                node.offset = offset;
                node.length += length;
                grown = Some(id);
                break;
            }
            cursor = node.next;
        }

        let Some(grown) = grown else {
            let prev = self.last_before(offset);
            self.insert_after(prev, offset, length)?;
            self.total += length;
            return Ok(());
        };
        self.total += length;

        let target = self.fragment(grown);
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let other = self.fragment(id);
            cursor = self.alloc.node(id).next;

            if id == grown {
                continue;
            }
            if target.end() == other.offset {
                self.alloc.node_mut(grown).length += other.length;
            } else if other.end() == target.offset {
                let node = self.alloc.node_mut(grown);
                node.offset = other.offset;
                node.length += other.length;
            } else {
                continue;
            }

            self.unlink(id);
            break;
        }

        Ok(())
    }

    /// Returns the complement of this set within `[0, total_size)`.
    pub fn create_inverse(&self, total_size: u64) -> Result<FragmentSet, FragmentError> {
        let mut inverse = FragmentSet::new();
        let mut last = 0u64;

        for fragment in self.iter() {
            if fragment.offset > last {
                inverse.push_back(last, fragment.offset.min(total_size) - last)?;
            }
            last = last.max(fragment.end());
            if last >= total_size {
                break;
            }
        }

        if total_size > last {
            inverse.push_back(last, total_size - last)?;
        }
        Ok(inverse)
    }

    /// Returns the bytes present in both sets.
    pub fn intersect(&self, other: &FragmentSet) -> Result<FragmentSet, FragmentError> {
        let mut result = FragmentSet::new();

        for fragment in self.iter() {
            for candidate in other.iter() {
                let (offset, length) = match fragment.overlap(candidate.offset, candidate.length) {
                    Overlap::Disjoint => continue,
                    Overlap::Covers => (fragment.offset, fragment.length),
                    Overlap::Inside => (candidate.offset, candidate.length),
                    Overlap::Head(n) => (fragment.offset, n),
                    Overlap::Tail(n) => (candidate.offset, n),
                };
                result.push_back(offset, length)?;
            }
        }
        Ok(result)
    }

    /// Returns true if `offset` lies inside any fragment.
    pub fn contains(&self, offset: u64) -> bool {
        self.iter()
            .take_while(|f| f.offset <= offset)
            .any(|f| f.contains_offset(offset))
    }

    /// Returns true if any byte of `[offset, offset + length)` is in the set.
    pub fn overlaps(&self, offset: u64, length: u64) -> bool {
        if length == 0 {
            return false;
        }
        self.iter()
            .any(|f| f.overlap(offset, length) != Overlap::Disjoint)
    }

    /// Number of bytes of `[offset, offset + length)` that are in the set.
    pub fn overlap_len(&self, offset: u64, length: u64) -> u64 {
        if length == 0 {
            return 0;
        }
        self.iter().map(|f| f.overlap_len(offset, length)).sum()
    }

    /// Picks a random fragment.
    ///
    /// With `prefer_zero`, a fragment starting at offset 0 is returned
    /// whenever one exists.
    pub fn get_random(&self, prefer_zero: bool) -> Option<Fragment> {
        self.get_random_with(&mut rand::rng(), prefer_zero)
    }

    /// Like [`get_random`](Self::get_random) with a caller-supplied generator.
    pub fn get_random_with<R: Rng>(
        &self,
        rng: &mut R,
        prefer_zero: bool,
    ) -> Option<Fragment> {
        if self.is_empty() {
            return None;
        }
        if prefer_zero {
            if let Some(zero) = self.iter().find(|f| f.offset == 0) {
                return Some(zero);
            }
        }
        let index = rng.random_range(0..self.count);
        self.iter().nth(index)
    }

    /// Returns the longest fragment not listed in `excluding`.
    ///
    /// Ties go to the fragment with the lower offset. With
    /// `zero_is_largest`, a first fragment starting at offset 0 wins
    /// regardless of its length.
    pub fn get_largest(&self, excluding: &[Fragment], zero_is_largest: bool) -> Option<Fragment> {
        let first = self.first()?;

        if zero_is_largest && first.offset == 0 && !excluding.contains(&first) {
            return Some(first);
        }

        let mut largest: Option<Fragment> = None;
        for fragment in self.iter() {
            if excluding.contains(&fragment) {
                continue;
            }
            if largest.map_or(true, |l| fragment.length > l.length) {
                largest = Some(fragment);
            }
        }
        largest
    }

    /// Checks the ordering invariant: sorted, no zero-length fragments, and
    /// no two fragments overlapping or touching.
    pub fn is_well_formed(&self) -> bool {
        let mut previous: Option<Fragment> = None;
        for fragment in self.iter() {
            if fragment.length == 0 {
                return false;
            }
            if let Some(prev) = previous {
                if prev.end() >= fragment.offset {
                    return false;
                }
            }
            previous = Some(fragment);
        }
        true
    }

    fn fragment(&self, id: NodeId) -> Fragment {
        let node = self.alloc.node(id);
        Fragment::new(node.offset, node.length)
    }

    /// Last node whose offset is below `offset`.
    fn last_before(&self, offset: u64) -> Option<NodeId> {
        let mut found = None;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let node = self.alloc.node(id);
            if node.offset >= offset {
                break;
            }
            found = Some(id);
            cursor = node.next;
        }
        found
    }

    /// Appends a fragment at the tail without checking order.
    fn push_back(&mut self, offset: u64, length: u64) -> Result<(), FragmentError> {
        if length == 0 {
            return Ok(());
        }
        self.insert_after(self.tail, offset, length)?;
        self.total += length;
        Ok(())
    }

    /// Links a new node after `prev`, or at the head when `prev` is `None`.
    /// Does not touch `total`.
    fn insert_after(
        &mut self,
        prev: Option<NodeId>,
        offset: u64,
        length: u64,
    ) -> Result<NodeId, FragmentError> {
        let next = match prev {
            Some(p) => self.alloc.node(p).next,
            None => self.head,
        };
        let id = self.alloc.alloc(offset, length, prev, next)?;

        match prev {
            Some(p) => self.alloc.node_mut(p).next = Some(id),
            None => self.head = Some(id),
        }
        match next {
            Some(n) => self.alloc.node_mut(n).prev = Some(id),
            None => self.tail = Some(id),
        }
        self.count += 1;
        Ok(id)
    }

    /// Unlinks and releases a node. Does not touch `total`.
    fn unlink(&mut self, id: NodeId) {
        let node = *self.alloc.node(id);
        match node.prev {
            Some(p) => self.alloc.node_mut(p).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(n) => self.alloc.node_mut(n).prev = node.prev,
            None => self.tail = node.prev,
        }
        self.alloc.release(id);
        self.count -= 1;
    }
}

impl PartialEq for FragmentSet {
    fn eq(&self, other: &Self) -> bool {
        self.count == other.count && self.iter().eq(other.iter())
    }
}

impl Eq for FragmentSet {}

impl<'a> IntoIterator for &'a FragmentSet {
    type Item = Fragment;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the fragments of a [`FragmentSet`] in offset order.
pub struct Iter<'a> {
    set: &'a FragmentSet,
    cursor: Option<NodeId>,
}

impl Iterator for Iter<'_> {
    type Item = Fragment;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        self.cursor = self.set.alloc.node(id).next;
        Some(self.set.fragment(id))
    }
}

fn checked_end(offset: u64, length: u64) -> Result<u64, FragmentError> {
    offset
        .checked_add(length)
        .ok_or(FragmentError::Overflow { offset, length })
}
