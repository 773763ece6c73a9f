use std::io;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;

use super::buffer_pool::BufferPool;
use super::config::CacheConfig;
use super::error::CacheError;

/// Receiver of flushed cache data.
///
/// The cache borrows its sink only for the duration of a call, so a sink can
/// never re-enter the cache from inside a flush.
pub trait CacheSink {
    /// Persists `data` at logical `offset`.
    fn write_cache_data(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Told once when the cache disables itself.
    fn cache_disabled(&mut self, disabled: bool);
}

/// One cached byte range.
#[derive(Debug)]
pub struct CacheEntry {
    offset: u64,
    data: BytesMut,
    created_at: Instant,
    seq: u64,
    committed: bool,
    block_number: u32,
}

impl CacheEntry {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.data.len() as u64)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn block_number(&self) -> u32 {
        self.block_number
    }

    /// True once the bytes are known to be on disk.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    fn overlaps(&self, offset: u64, length: u64) -> bool {
        offset < self.end() && self.offset < offset.saturating_add(length)
    }
}

/// Counters reported by [`WriteBackCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub trims: u64,
    pub flushes: u64,
    pub size: usize,
    pub entries: usize,
    pub dirty_bytes: usize,
}

/// Bounded write-back cache for one payload.
///
/// Entries are kept in offset order and never overlap. Dirty entries are
/// written out through a [`CacheSink`] when they are evicted, invalidated,
/// swept by [`tick`](Self::tick), or dumped by
/// [`write_cache`](Self::write_cache). Any failed flush, or a flush needed
/// without a sink, disables the cache for good: it then rejects new entries
/// but its existing entries can still be read and purged.
pub struct WriteBackCache {
    config: CacheConfig,
    entries: Vec<CacheEntry>,
    size: usize,
    next_seq: u64,
    disabled: bool,
    last_sweep: Instant,
    pool: Arc<BufferPool>,
    hits: u64,
    misses: u64,
    trims: u64,
    flushes: u64,
}

impl WriteBackCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_pool(config, BufferPool::new())
    }

    /// Creates a cache that draws entry buffers from a shared pool.
    pub fn with_pool(config: CacheConfig, pool: Arc<BufferPool>) -> Self {
        let disabled = !config.enabled;
        Self {
            config,
            entries: Vec::new(),
            size: 0,
            next_seq: 0,
            disabled,
            last_sweep: Instant::now(),
            pool,
            hits: 0,
            misses: 0,
            trims: 0,
            flushes: 0,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Bytes currently cached.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            trims: self.trims,
            flushes: self.flushes,
            size: self.size,
            entries: self.entries.len(),
            dirty_bytes: self
                .entries
                .iter()
                .filter(|e| !e.committed)
                .map(|e| e.len())
                .sum(),
        }
    }

    /// Caches `data` at `offset`.
    ///
    /// `precommitted` marks data that is already on disk, such as bytes just
    /// read back from a segment. A range cached with the same bytes is left
    /// alone; a range cached with different bytes takes the new bytes.
    /// Older entries overlapping the range are flushed if dirty and then
    /// dropped. When the insert would fill the cache, the oldest entries are
    /// trimmed first until the new entry fits below the low watermark.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::EntryTooLarge`] for an entry that could never
    /// fit; the cache stays usable. Flush failures disable the cache.
    pub fn add_cache_entry(
        &mut self,
        data: &[u8],
        offset: u64,
        block_number: u32,
        precommitted: bool,
        mut sink: Option<&mut dyn CacheSink>,
    ) -> Result<(), CacheError> {
        if self.disabled {
            return Err(CacheError::Disabled);
        }
        if data.is_empty() {
            return Err(CacheError::InvalidArgument("empty cache entry"));
        }
        if data.len() > self.config.max_size {
            return Err(CacheError::EntryTooLarge {
                len: data.len(),
                max: self.config.max_size,
            });
        }

        let length = data.len() as u64;

        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.offset == offset && e.len() == data.len())
        {
            if existing.data[..] != *data {
                existing.data.clear();
                existing.data.extend_from_slice(data);
                existing.committed = precommitted;
                existing.block_number = block_number;
            }
            return Ok(());
        }

        self.evict_overlapping(offset, length, reborrow(&mut sink))?;

        if self.size + data.len() >= self.config.max_size {
            let target = self.config.low_watermark().saturating_sub(data.len());
            self.trim_to(target, reborrow(&mut sink))?;
        }

        let mut buf = self.pool.get(data.len());
        buf.extend_from_slice(data);

        let entry = CacheEntry {
            offset,
            data: buf,
            created_at: Instant::now(),
            seq: self.next_seq,
            committed: precommitted,
            block_number,
        };
        self.next_seq += 1;
        self.size += entry.len();

        let index = self.entries.partition_point(|e| e.offset < offset);
        self.entries.insert(index, entry);
        Ok(())
    }

    /// Copies cached bytes starting at `offset` into `buf`.
    ///
    /// Succeeds only when contiguous entries cover all of `buf`; on a miss
    /// `buf` is left untouched. Every call counts as a hit or a miss.
    pub fn get_cache_data(&mut self, buf: &mut [u8], offset: u64) -> bool {
        let Some(first) = self.covering_run(offset, buf.len() as u64) else {
            self.misses += 1;
            return false;
        };

        let mut cursor = offset;
        let mut written = 0usize;
        for entry in &self.entries[first..] {
            if written == buf.len() {
                break;
            }
            let start = (cursor - entry.offset) as usize;
            let take = (entry.len() - start).min(buf.len() - written);
            buf[written..written + take].copy_from_slice(&entry.data[start..start + take]);
            written += take;
            cursor += take as u64;
        }

        self.hits += 1;
        true
    }

    /// Index of the first entry of a gap-free run covering the range.
    fn covering_run(&self, offset: u64, length: u64) -> Option<usize> {
        if length == 0 {
            return None;
        }
        let first = self.entries.partition_point(|e| e.end() <= offset);
        let entry = self.entries.get(first)?;
        if entry.offset > offset {
            return None;
        }

        let end = offset.saturating_add(length);
        let mut covered = entry.end();
        for next in &self.entries[first + 1..] {
            if covered >= end || next.offset != covered {
                break;
            }
            covered = next.end();
        }
        (covered >= end).then_some(first)
    }

    /// Flushes every dirty entry of `block_number` and marks it committed.
    /// Returns the number of entries flushed.
    pub fn invalidate_block(
        &mut self,
        block_number: u32,
        sink: Option<&mut dyn CacheSink>,
    ) -> Result<usize, CacheError> {
        self.commit_matching(|e| e.block_number == block_number, sink)
    }

    /// Flushes every dirty entry overlapping the range and marks it committed.
    pub fn invalidate_range(
        &mut self,
        offset: u64,
        length: u64,
        sink: Option<&mut dyn CacheSink>,
    ) -> Result<usize, CacheError> {
        if length == 0 {
            return Ok(0);
        }
        self.commit_matching(|e| e.overlaps(offset, length), sink)
    }

    /// Flushes and drops every entry overlapping the range.
    ///
    /// Used before a write that goes around the cache, so that older cached
    /// bytes neither shadow it on read nor overwrite it on a later flush.
    pub fn evict_range(
        &mut self,
        offset: u64,
        length: u64,
        sink: Option<&mut dyn CacheSink>,
    ) -> Result<(), CacheError> {
        if length == 0 {
            return Ok(());
        }
        self.evict_overlapping(offset, length, sink)
    }

    fn commit_matching<F>(
        &mut self,
        matches: F,
        sink: Option<&mut dyn CacheSink>,
    ) -> Result<usize, CacheError>
    where
        F: Fn(&CacheEntry) -> bool,
    {
        let dirty: Vec<usize> = (0..self.entries.len())
            .filter(|&i| !self.entries[i].committed && matches(&self.entries[i]))
            .collect();
        if dirty.is_empty() {
            return Ok(0);
        }

        let Some(sink) = sink else {
            self.disable(None);
            return Err(CacheError::NoSink);
        };
        for &index in &dirty {
            self.flush_entry(index, sink)?;
        }
        Ok(dirty.len())
    }

    /// Flushes and evicts the oldest entries until the cache is at or below
    /// its low watermark. Returns the number of bytes freed.
    pub fn trim_cache(&mut self, sink: Option<&mut dyn CacheSink>) -> Result<usize, CacheError> {
        self.trim_to(self.config.low_watermark(), sink)
    }

    fn trim_to(
        &mut self,
        target: usize,
        mut sink: Option<&mut dyn CacheSink>,
    ) -> Result<usize, CacheError> {
        if self.size <= target {
            return Ok(0);
        }
        self.trims += 1;

        let before = self.size;
        while self.size > target {
            let Some(index) = self.oldest() else {
                break;
            };

            if !self.entries[index].committed {
                match sink.as_mut() {
                    Some(s) => self.flush_entry(index, &mut **s)?,
                    None => {
                        self.disable(None);
                        return Err(CacheError::NoSink);
                    }
                }
            }
            self.remove(index);
        }

        let freed = before - self.size;
        tracing::debug!(freed, size = self.size, target, "cache trimmed");
        Ok(freed)
    }

    fn oldest(&self) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| (e.created_at, e.seq))
            .map(|(i, _)| i)
    }

    /// Flushes and drops every entry overlapping the range.
    fn evict_overlapping(
        &mut self,
        offset: u64,
        length: u64,
        mut sink: Option<&mut dyn CacheSink>,
    ) -> Result<(), CacheError> {
        let mut index = self.entries.partition_point(|e| e.end() <= offset);
        while index < self.entries.len() && self.entries[index].overlaps(offset, length) {
            if !self.entries[index].committed {
                match sink.as_mut() {
                    Some(s) => self.flush_entry(index, &mut **s)?,
                    None => {
                        self.disable(None);
                        return Err(CacheError::NoSink);
                    }
                }
            }
            self.remove(index);
        }
        Ok(())
    }

    /// Flushes every dirty entry, continuing past failures, then drops all
    /// entries regardless of the outcome.
    pub fn write_cache(&mut self, mut sink: Option<&mut dyn CacheSink>) -> Result<(), CacheError> {
        let mut failed = 0usize;

        for index in 0..self.entries.len() {
            if self.entries[index].committed {
                continue;
            }
            let result = match sink.as_mut() {
                Some(s) => self.flush_entry(index, &mut **s),
                None => Err(CacheError::NoSink),
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "dropping unflushed cache entry");
                failed += 1;
            }
        }

        self.clear();

        if failed > 0 {
            self.disable(sink);
            return Err(CacheError::FlushIncomplete { failed });
        }
        Ok(())
    }

    /// Writes back and drops entries in offset order, stopping at the first
    /// failure. Whatever could not be written stays cached. Returns the
    /// number of entries dropped.
    pub fn drain(&mut self, mut sink: Option<&mut dyn CacheSink>) -> Result<usize, CacheError> {
        let mut dropped = 0;
        while !self.entries.is_empty() {
            if !self.entries[0].committed {
                match sink.as_mut() {
                    Some(s) => self.flush_entry(0, &mut **s)?,
                    None => {
                        self.disable(None);
                        return Err(CacheError::NoSink);
                    }
                }
            }
            self.remove(0);
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(dropped, "cache drained");
        }
        Ok(dropped)
    }

    /// Drops every entry without flushing.
    pub fn clear(&mut self) {
        for entry in self.entries.drain(..) {
            self.pool.put(entry.data);
        }
        self.size = 0;
    }

    /// Periodic maintenance.
    ///
    /// Trims a full cache, and once per sweep interval flushes every dirty
    /// entry without evicting it, which bounds how long written data can sit
    /// in memory.
    pub fn tick(
        &mut self,
        now: Instant,
        mut sink: Option<&mut dyn CacheSink>,
    ) -> Result<(), CacheError> {
        if self.disabled {
            return Ok(());
        }

        if self.size >= self.config.max_size {
            self.trim_cache(reborrow(&mut sink))?;
        }

        if now.saturating_duration_since(self.last_sweep) >= self.config.sweep_interval {
            self.last_sweep = now;
            let flushed = self.commit_matching(|_| true, sink)?;
            if flushed > 0 {
                tracing::debug!(flushed, "cache sweep flushed dirty entries");
            }
        }
        Ok(())
    }

    fn flush_entry(&mut self, index: usize, sink: &mut dyn CacheSink) -> Result<(), CacheError> {
        let entry = &mut self.entries[index];
        if entry.committed {
            return Ok(());
        }

        match sink.write_cache_data(entry.offset, &entry.data) {
            Ok(()) => {
                entry.committed = true;
                self.flushes += 1;
                tracing::trace!(
                    offset = entry.offset,
                    len = entry.data.len(),
                    "cache entry flushed"
                );
                Ok(())
            }
            Err(source) => {
                let offset = entry.offset;
                self.disable(Some(sink));
                Err(CacheError::Flush { offset, source })
            }
        }
    }

    fn remove(&mut self, index: usize) {
        let entry = self.entries.remove(index);
        self.size -= entry.len();
        self.pool.put(entry.data);
    }

    fn disable(&mut self, sink: Option<&mut dyn CacheSink>) {
        if self.disabled {
            return;
        }
        self.disabled = true;
        tracing::warn!(entries = self.entries.len(), "write-back cache disabled");
        if let Some(sink) = sink {
            sink.cache_disabled(true);
        }
    }
}

impl Drop for WriteBackCache {
    fn drop(&mut self) {
        let dirty = self.entries.iter().filter(|e| !e.committed).count();
        if dirty > 0 {
            tracing::warn!(dirty, "write-back cache dropped with unflushed entries");
        }
    }
}

/// Reborrows an optional sink for one nested call.
fn reborrow<'s>(sink: &'s mut Option<&mut dyn CacheSink>) -> Option<&'s mut dyn CacheSink> {
    match sink {
        Some(s) => Some(&mut **s),
        None => None,
    }
}
