use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};

use super::error::StorageError;
use super::file::{DiskOpener, FileOpener, SegmentInfo};
use super::maintenance::MaintenanceHandle;
use super::virtual_file::VirtualFile;
use crate::cache::{BufferPool, CacheConfig, WriteBackCache};
use crate::constants::DEFAULT_BLOCK_SIZE;
use crate::ledger::SharedLedger;

/// Parameters for [`PayloadRegistry::open`].
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub identity: String,
    pub directory: PathBuf,
    pub segments: Vec<SegmentInfo>,
    pub ledger: Option<SharedLedger>,
    pub write: bool,
    pub create: bool,
    pub block_size: u64,
    pub use_cache: bool,
}

impl OpenRequest {
    pub fn new(identity: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            identity: identity.into(),
            directory: directory.into(),
            segments: Vec::new(),
            ledger: None,
            write: false,
            create: false,
            block_size: DEFAULT_BLOCK_SIZE,
            use_cache: true,
        }
    }

    pub fn with_segments(mut self, segments: Vec<SegmentInfo>) -> Self {
        self.segments = segments;
        self
    }

    pub fn with_ledger(mut self, ledger: SharedLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    /// Creating implies write access.
    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self.write |= create;
        self
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }
}

/// One reference to a registered payload.
///
/// Handles are not `Clone`; take another reference with
/// [`PayloadRegistry::add_ref`] and give each back with
/// [`PayloadRegistry::release`].
#[derive(Debug)]
pub struct PayloadHandle {
    identity: String,
    file: Arc<Mutex<VirtualFile>>,
}

impl PayloadHandle {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn file(&self) -> &Arc<Mutex<VirtualFile>> {
        &self.file
    }

    pub fn lock(&self) -> MutexGuard<'_, VirtualFile> {
        self.file.lock()
    }
}

struct RegistryEntry {
    file: Arc<Mutex<VirtualFile>>,
    refs: usize,
}

/// Process-wide table of open payloads, keyed by identity.
///
/// Everyone opening the same identity shares one [`VirtualFile`] and its
/// cache. The entry lives until the last reference is released.
pub struct PayloadRegistry {
    entries: DashMap<String, RegistryEntry>,
    opener: Arc<dyn FileOpener>,
    cache_config: CacheConfig,
    pool: Arc<BufferPool>,
}

impl PayloadRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            opener: Arc::new(DiskOpener),
            cache_config: CacheConfig::default(),
            pool: BufferPool::new(),
        }
    }

    /// Uses `opener` for every file opened from now on.
    pub fn with_opener(mut self, opener: Arc<dyn FileOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// Cache settings for payloads opened from now on. The block size is
    /// taken from each [`OpenRequest`].
    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn ref_count(&self, identity: &str) -> Option<usize> {
        self.entries.get(identity).map(|e| e.refs)
    }

    /// Opens a payload, or takes another reference to it if it is already
    /// open. An existing read-only entry is upgraded when the request asks
    /// for write access.
    pub fn open(&self, request: OpenRequest) -> Result<PayloadHandle, StorageError> {
        match self.entries.entry(request.identity.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                {
                    let mut file = entry.file.lock();
                    if request.write {
                        file.ensure_write()?;
                    }
                    file.set_cache_disabled(!request.use_cache);
                }
                entry.refs += 1;
                tracing::trace!(identity = %request.identity, refs = entry.refs, "payload reused");
                Ok(PayloadHandle {
                    identity: request.identity,
                    file: Arc::clone(&entry.file),
                })
            }
            Entry::Vacant(vacant) => {
                let config = self
                    .cache_config
                    .clone()
                    .with_block_size(request.block_size);
                let cache = WriteBackCache::with_pool(config, Arc::clone(&self.pool));
                let mut file = VirtualFile::new(
                    request.identity.clone(),
                    request.directory,
                    request.segments,
                    request.ledger,
                    cache,
                    Arc::clone(&self.opener),
                )?;
                file.open(request.write, request.create)?;
                file.set_cache_disabled(!request.use_cache);

                let file = Arc::new(Mutex::new(file));
                vacant.insert(RegistryEntry {
                    file: Arc::clone(&file),
                    refs: 1,
                });
                tracing::debug!(identity = %request.identity, "payload registered");
                Ok(PayloadHandle {
                    identity: request.identity,
                    file,
                })
            }
        }
    }

    /// Takes another reference to an open payload.
    pub fn add_ref(&self, handle: &PayloadHandle) -> Result<PayloadHandle, StorageError> {
        let mut entry = self
            .entries
            .get_mut(&handle.identity)
            .ok_or_else(|| StorageError::PayloadNotFound(handle.identity.clone()))?;
        entry.refs += 1;
        Ok(PayloadHandle {
            identity: handle.identity.clone(),
            file: Arc::clone(&entry.file),
        })
    }

    /// Gives back a reference.
    ///
    /// The last release writes back the cache, closes the files and forgets
    /// the payload. A writer releasing while others still hold references
    /// writes back the cache and drops the payload to read-only access.
    pub fn release(&self, handle: PayloadHandle, write: bool) -> Result<(), StorageError> {
        let last = {
            let mut entry = self
                .entries
                .get_mut(&handle.identity)
                .ok_or_else(|| StorageError::PayloadNotFound(handle.identity.clone()))?;
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs > 0 {
                let mut file = entry.file.lock();
                if write && file.is_writable() {
                    file.close_write()?;
                }
                false
            } else {
                true
            }
        };

        if !last {
            return Ok(());
        }
        match self.entries.remove_if(&handle.identity, |_, e| e.refs == 0) {
            Some((_, entry)) => {
                tracing::debug!(identity = %handle.identity, "payload released");
                let mut file = entry.file.lock();
                file.close_all()
            }
            None => Ok(()),
        }
    }

    /// Writes back every cache and closes every payload, regardless of
    /// outstanding references. Returns the first failure.
    pub fn close_all(&self) -> Result<(), StorageError> {
        let identities: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut first_error = None;

        for identity in identities {
            let Some((_, entry)) = self.entries.remove(&identity) else {
                continue;
            };
            let closed = entry.file.lock().close_all();
            if let Err(e) = closed {
                tracing::warn!(%identity, error = %e, "closing payload failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Runs cache and ledger upkeep on every open payload.
    pub fn tick(&self, now: Instant) {
        let files: Vec<(String, Arc<Mutex<VirtualFile>>)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(&e.file)))
            .collect();

        for (identity, file) in files {
            if let Err(e) = file.lock().maintain(now) {
                tracing::warn!(%identity, error = %e, "payload maintenance failed");
            }
        }
    }

    /// Spawns a task calling [`tick`](Self::tick) every `period`.
    pub fn start_maintenance(self: &Arc<Self>, period: Duration) -> MaintenanceHandle {
        MaintenanceHandle::spawn(Arc::clone(self), period)
    }
}

impl Default for PayloadRegistry {
    fn default() -> Self {
        Self::new()
    }
}
