use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;
use std::sync::Arc;

use crate::constants::{BUFFER_POOL_BLOCK_SIZE, BUFFER_POOL_CAPACITY, DEFAULT_BLOCK_SIZE};

/// Recycles the byte buffers that back cache entries.
///
/// Buffers are handed out cleared and come back through [`put`](Self::put).
/// Buffers that grew past one block are dropped instead of being retained,
/// so a burst of large entries does not pin memory.
pub struct BufferPool {
    buffers: ArrayQueue<BytesMut>,
    buffer_size: usize,
    max_retained: usize,
}

impl BufferPool {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(BUFFER_POOL_CAPACITY, BUFFER_POOL_BLOCK_SIZE)
    }

    /// Creates a pool holding at most `capacity` idle buffers, each
    /// allocated with room for `buffer_size` bytes.
    pub fn with_capacity(capacity: usize, buffer_size: usize) -> Arc<Self> {
        Arc::new(Self {
            buffers: ArrayQueue::new(capacity.max(1)),
            buffer_size,
            max_retained: (DEFAULT_BLOCK_SIZE as usize).max(buffer_size),
        })
    }

    /// Takes a buffer able to hold at least `size` bytes.
    pub fn get(&self, size: usize) -> BytesMut {
        if let Some(mut buf) = self.buffers.pop() {
            // pooled buffers are empty, so this guarantees `size` bytes of room
            buf.reserve(size);
            return buf;
        }
        BytesMut::with_capacity(size.max(self.buffer_size))
    }

    /// Returns a buffer to the pool.
    pub fn put(&self, mut buf: BytesMut) {
        if buf.capacity() > self.max_retained {
            return;
        }
        buf.clear();
        let _ = self.buffers.push(buf);
    }

    pub fn available(&self) -> usize {
        self.buffers.len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self {
            buffers: ArrayQueue::new(BUFFER_POOL_CAPACITY),
            buffer_size: BUFFER_POOL_BLOCK_SIZE,
            max_retained: DEFAULT_BLOCK_SIZE as usize,
        }
    }
}
