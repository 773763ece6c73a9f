use super::error::FragmentError;
use crate::constants::FRAGMENT_POOL_CHUNK;

/// Index of a node inside a [`FragmentAllocator`].
pub type NodeId = u32;

/// Smallest growth step, so tiny temporary sets stay cheap.
const MIN_GROWTH: usize = 16;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Node {
    pub(crate) offset: u64,
    pub(crate) length: u64,
    pub(crate) prev: Option<NodeId>,
    pub(crate) next: Option<NodeId>,
}

/// Pooled storage for fragment nodes.
///
/// Nodes are handed out from a free list threaded through the arena. When the
/// list runs dry the arena grows by a chunk that doubles from a small start up
/// to [`FRAGMENT_POOL_CHUNK`] nodes. Released nodes go back on the free list
/// and are reused before the arena grows again.
#[derive(Debug, Clone)]
pub struct FragmentAllocator {
    nodes: Vec<Node>,
    free_head: Option<NodeId>,
    free: usize,
    chunk: usize,
    limit: Option<usize>,
}

impl FragmentAllocator {
    pub fn new() -> Self {
        Self::with_chunk(FRAGMENT_POOL_CHUNK)
    }

    /// Creates an allocator whose growth steps never exceed `chunk` nodes.
    pub fn with_chunk(chunk: usize) -> Self {
        Self {
            nodes: Vec::new(),
            free_head: None,
            free: 0,
            chunk: chunk.max(1),
            limit: None,
        }
    }

    /// Caps the arena at `limit` nodes. Allocations past the cap fail with
    /// [`FragmentError::OutOfMemory`].
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn alloc(
        &mut self,
        offset: u64,
        length: u64,
        prev: Option<NodeId>,
        next: Option<NodeId>,
    ) -> Result<NodeId, FragmentError> {
        if self.free == 0 {
            self.grow()?;
        }

        let id = self.free_head.ok_or(FragmentError::OutOfMemory)?;
        let node = &mut self.nodes[id as usize];
        self.free_head = node.next;
        self.free -= 1;

        *node = Node {
            offset,
            length,
            prev,
            next,
        };
        Ok(id)
    }

    pub(crate) fn release(&mut self, id: NodeId) {
        let node = &mut self.nodes[id as usize];
        node.prev = None;
        node.next = self.free_head;
        self.free_head = Some(id);
        self.free += 1;
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id as usize]
    }

    fn grow(&mut self) -> Result<(), FragmentError> {
        let current = self.nodes.len();
        let mut step = current.clamp(MIN_GROWTH.min(self.chunk), self.chunk);
        if let Some(limit) = self.limit {
            step = step.min(limit.saturating_sub(current));
        }
        if step == 0 || current + step > NodeId::MAX as usize {
            return Err(FragmentError::OutOfMemory);
        }

        self.nodes
            .try_reserve_exact(step)
            .map_err(|_| FragmentError::OutOfMemory)?;

        for index in current..current + step {
            self.nodes.push(Node {
                next: self.free_head,
                ..Node::default()
            });
            self.free_head = Some(index as NodeId);
        }
        self.free += step;

        tracing::trace!(capacity = self.nodes.len(), "fragment pool grown");
        Ok(())
    }

    /// Nodes currently linked into a set.
    pub fn in_use(&self) -> usize {
        self.nodes.len() - self.free
    }

    /// Nodes waiting on the free list.
    pub fn free_count(&self) -> usize {
        self.free
    }

    /// Total nodes ever reserved by this allocator.
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Drops every node, in use or free, and returns the memory.
    pub fn clear(&mut self) {
        self.nodes = Vec::new();
        self.free_head = None;
        self.free = 0;
    }
}

impl Default for FragmentAllocator {
    fn default() -> Self {
        Self::new()
    }
}
