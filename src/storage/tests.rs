use super::*;
use crate::cache::{CacheConfig, WriteBackCache};
use crate::fragment::{Fragment, FragmentSet};
use crate::ledger::CompletionLedger;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tempfile::TempDir;

const BLOCK: u64 = 16 * 1024;

/// Opens files normally but can fail every write to one file name.
struct FaultyOpener {
    name: &'static str,
    fail: Arc<AtomicBool>,
}

struct FaultyFile {
    inner: Box<dyn BackingFile>,
    fail: Arc<AtomicBool>,
}

impl FileOpener for FaultyOpener {
    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn BackingFile>> {
        let inner = DiskOpener.open(path, mode)?;
        if path.file_name() == Some(OsStr::new(self.name)) {
            Ok(Box::new(FaultyFile {
                inner,
                fail: Arc::clone(&self.fail),
            }))
        } else {
            Ok(inner)
        }
    }
}

impl BackingFile for FaultyFile {
    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.inner.seek(pos)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read(buf)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::other("injected write failure"));
        }
        self.inner.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    fn len(&self) -> io::Result<u64> {
        self.inner.len()
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.inner.set_len(len)
    }

    fn last_modified(&self) -> io::Result<SystemTime> {
        self.inner.last_modified()
    }
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

fn uncached_registry() -> Arc<PayloadRegistry> {
    Arc::new(PayloadRegistry::new().with_cache_config(CacheConfig::default().with_enabled(false)))
}

fn two_segments() -> Vec<SegmentInfo> {
    vec![
        SegmentInfo::new("a.bin", 50, 0),
        SegmentInfo::new("b.bin", 70, 50),
    ]
}

#[test]
fn test_write_two_ranges_completes_payload() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(PayloadRegistry::new());
    let mut payload = PayloadAddressSpace::new(Arc::clone(&registry), temp.path());
    payload
        .create_all("p", 100, vec![SegmentInfo::new("data.bin", 100, 0)], None, BLOCK)
        .unwrap();

    let data = pattern(100, 1);
    assert_eq!(payload.write_range(0, &data[..40], 0).unwrap(), 40);
    assert_eq!(
        payload.copy_free_fragments().fragments(),
        vec![Fragment::new(40, 60)]
    );
    assert_eq!(payload.write_range(40, &data[40..], 0).unwrap(), 60);
    assert!(payload.missing().is_empty());

    let mut buf = vec![0u8; 100];
    payload.read_range(0, &mut buf).unwrap();
    assert_eq!(buf, data);

    assert!(matches!(
        payload.write_range(0, &data, 0),
        Err(StorageError::InvalidArgument(_))
    ));

    payload.close().unwrap();
    assert!(registry.is_empty());
    assert_eq!(fs::read(temp.path().join("data.bin")).unwrap(), data);
}

#[test]
fn test_write_skips_present_bytes() {
    let temp = TempDir::new().unwrap();
    let mut payload = PayloadAddressSpace::new(Arc::new(PayloadRegistry::new()), temp.path());
    payload
        .create_all("p", 100, vec![SegmentInfo::new("data.bin", 100, 0)], None, BLOCK)
        .unwrap();

    let first = pattern(40, 1);
    payload.write_range(0, &first, 0).unwrap();

    let second = pattern(40, 9);
    assert_eq!(payload.write_range(20, &second, 0).unwrap(), 20);
    assert_eq!(payload.remaining(), 40);

    let mut buf = vec![0u8; 20];
    payload.read_range(20, &mut buf).unwrap();
    assert_eq!(buf, first[20..40]);
    payload.read_range(40, &mut buf).unwrap();
    assert_eq!(buf, second[20..40]);
}

#[test]
fn test_write_spans_segments_and_updates_ledger() {
    let temp = TempDir::new().unwrap();
    let mut ledger = CompletionLedger::new();
    ledger.init(1, temp.path(), "p").unwrap();
    let ledger = ledger.shared();

    let mut payload = PayloadAddressSpace::new(uncached_registry(), temp.path());
    payload
        .create_all("p", 120, two_segments(), Some(Arc::clone(&ledger)), BLOCK)
        .unwrap();

    let data = pattern(20, 3);
    assert_eq!(payload.write_range(40, &data, 0).unwrap(), 20);

    let a = temp.path().join("p").join("a.bin");
    let b = temp.path().join("p").join("b.bin");
    assert_eq!(fs::read(&a).unwrap()[40..50], data[..10]);
    assert_eq!(fs::read(&b).unwrap(), data[10..]);

    let ledger = ledger.lock();
    assert_eq!(ledger.files().len(), 2);
    assert!(ledger.file_fingerprint(&a).is_some());
    assert_eq!(ledger.file_fingerprint(&b).unwrap().length, 70);
}

#[test]
fn test_cached_write_lands_on_close() {
    let temp = TempDir::new().unwrap();
    let mut payload = PayloadAddressSpace::new(Arc::new(PayloadRegistry::new()), temp.path());
    payload
        .create_all("p", 32, vec![SegmentInfo::new("data.bin", 32, 0)], None, BLOCK)
        .unwrap();

    let data = pattern(32, 5);
    payload.write_range(0, &data, 0).unwrap();

    let path = temp.path().join("data.bin");
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    {
        let handle = payload.handle().unwrap();
        assert_eq!(handle.lock().cache().stats().dirty_bytes, 32);
    }

    payload.close().unwrap();
    assert_eq!(fs::read(&path).unwrap(), data);
}

#[test]
fn test_partial_segment_failure_reports_progress() {
    let temp = TempDir::new().unwrap();
    let fail = Arc::new(AtomicBool::new(false));
    let opener = FaultyOpener {
        name: "b.bin",
        fail: Arc::clone(&fail),
    };
    let registry = Arc::new(
        PayloadRegistry::new()
            .with_opener(Arc::new(opener))
            .with_cache_config(CacheConfig::default().with_enabled(false)),
    );
    let mut payload = PayloadAddressSpace::new(registry, temp.path());
    payload.create_all("p", 120, two_segments(), None, BLOCK).unwrap();

    fail.store(true, Ordering::SeqCst);
    let err = payload.write_range(40, &pattern(20, 0), 0).unwrap_err();
    assert!(matches!(
        err,
        StorageError::Segment {
            offset: 50,
            completed: 10,
            ..
        }
    ));
    assert_eq!(err.completed(), Some(10));
    assert_eq!(payload.remaining(), 120);

    fail.store(false, Ordering::SeqCst);
    assert_eq!(payload.write_range(40, &pattern(20, 0), 0).unwrap(), 20);
    assert_eq!(payload.remaining(), 100);
}

#[test]
fn test_read_range_refuses_missing_bytes() {
    let temp = TempDir::new().unwrap();
    let mut payload = PayloadAddressSpace::new(Arc::new(PayloadRegistry::new()), temp.path());
    payload
        .create_all("p", 100, vec![SegmentInfo::new("data.bin", 100, 0)], None, BLOCK)
        .unwrap();
    payload.write_range(0, &pattern(50, 2), 0).unwrap();

    let mut buf = vec![0u8; 20];
    assert!(matches!(
        payload.read_range(40, &mut buf),
        Err(StorageError::RangeMissing {
            offset: 40,
            length: 20
        })
    ));
    payload.read_range(30, &mut buf).unwrap();
    assert_eq!(buf, pattern(50, 2)[30..50]);
}

#[test]
fn test_invalidate_range() {
    let temp = TempDir::new().unwrap();
    let mut payload = PayloadAddressSpace::new(Arc::new(PayloadRegistry::new()), temp.path());
    payload
        .create_all("p", 100, vec![SegmentInfo::new("data.bin", 100, 0)], None, BLOCK)
        .unwrap();
    payload.write_range(0, &pattern(100, 4), 0).unwrap();

    assert_eq!(payload.invalidate_range(30, 20).unwrap(), 20);
    assert_eq!(payload.remaining(), 20);
    assert!(payload.is_position_remaining(35));
    assert!(!payload.is_position_remaining(29));
    assert!(!payload.is_position_remaining(100));
    assert!(!payload.does_range_overlap(0, 30));
    assert_eq!(payload.get_range_overlap(0, 100), 20);
    assert_eq!(
        payload.copy_filled_fragments().unwrap().fragments(),
        vec![Fragment::new(0, 30), Fragment::new(50, 50)]
    );

    // only the part that was present counts
    assert_eq!(payload.invalidate_range(25, 10).unwrap(), 5);
    assert_eq!(
        payload.copy_free_fragments().fragments(),
        vec![Fragment::new(25, 25)]
    );
}

#[test]
fn test_make_complete_extends_files() {
    let temp = TempDir::new().unwrap();
    let mut payload = PayloadAddressSpace::new(Arc::new(PayloadRegistry::new()), temp.path());
    payload.create_all("p", 120, two_segments(), None, BLOCK).unwrap();

    assert!(payload.make_complete().unwrap());
    assert_eq!(payload.remaining(), 0);
    assert!(!payload.make_complete().unwrap());

    assert_eq!(fs::metadata(temp.path().join("p/a.bin")).unwrap().len(), 50);
    assert_eq!(fs::metadata(temp.path().join("p/b.bin")).unwrap().len(), 70);
}

#[test]
fn test_open_rejections() {
    let temp = TempDir::new().unwrap();
    let mut payload = PayloadAddressSpace::new(Arc::new(PayloadRegistry::new()), temp.path());
    let segments = vec![SegmentInfo::new("data.bin", 10, 0)];

    assert!(matches!(
        payload.create_all("p", 0, segments.clone(), None, BLOCK),
        Err(StorageError::InvalidArgument(_))
    ));
    assert!(matches!(
        payload.open("p", 10, segments.clone(), None, false, BLOCK),
        Err(StorageError::FileNotFound(_))
    ));
    assert!(!payload.is_open());

    payload.create_all("p", 10, segments.clone(), None, BLOCK).unwrap();
    assert!(matches!(
        payload.create_all("p", 10, segments.clone(), None, BLOCK),
        Err(StorageError::AlreadyOpen)
    ));
    assert!(matches!(
        payload.open("p", 10, segments, None, true, BLOCK),
        Err(StorageError::AlreadyOpen)
    ));

    let mut closed = PayloadAddressSpace::new(Arc::new(PayloadRegistry::new()), temp.path());
    assert!(matches!(
        closed.write_range(0, b"x", 0),
        Err(StorageError::NotOpen)
    ));
}

#[test]
fn test_resume_with_restored_missing_set() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(PayloadRegistry::new());
    let data = pattern(64, 6);
    {
        let mut payload = PayloadAddressSpace::new(Arc::clone(&registry), temp.path());
        payload
            .create_all("p", 64, vec![SegmentInfo::new("data.bin", 64, 0)], None, BLOCK)
            .unwrap();
        payload.write_range(0, &data[..32], 0).unwrap();
        payload.close().unwrap();
    }

    let mut payload = PayloadAddressSpace::new(registry, temp.path());
    payload
        .open("p", 64, vec![SegmentInfo::new("data.bin", 64, 0)], None, true, BLOCK)
        .unwrap();
    payload.set_empty_fragments(FragmentSet::from_range(32, 32).unwrap());

    let mut buf = vec![0u8; 32];
    payload.read_range(0, &mut buf).unwrap();
    assert_eq!(buf, data[..32]);
    assert_eq!(payload.write_range(32, &data[32..], 0).unwrap(), 32);
    assert!(payload.missing().is_empty());
}

#[test]
fn test_verify_block() {
    let temp = TempDir::new().unwrap();
    let mut ledger = CompletionLedger::new();
    ledger.init(2, temp.path(), "p").unwrap();
    let ledger = ledger.shared();

    let mut payload = PayloadAddressSpace::new(Arc::new(PayloadRegistry::new()), temp.path());
    payload
        .create_all(
            "p",
            100,
            vec![SegmentInfo::new("data.bin", 100, 0)],
            Some(Arc::clone(&ledger)),
            64,
        )
        .unwrap();

    let data = pattern(100, 8);
    payload.write_range(0, &data[..64], 0).unwrap();
    payload.write_range(64, &data[64..], 1).unwrap();

    let sha1 = Sha1::digest(&data[..64]);
    assert!(payload.verify_block(0, &sha1, Some(&ledger)).unwrap());
    assert!(ledger.lock().is_block_done(0));

    let sha256 = Sha256::digest(&data[64..]);
    assert!(payload.verify_block(1, &sha256, Some(&ledger)).unwrap());
    assert!(ledger.lock().is_block_done(1));

    assert!(!payload.verify_block(1, &[0u8; 32], Some(&ledger)).unwrap());
    assert!(!ledger.lock().is_block_done(1));
    assert_eq!(payload.remaining(), 36);
    assert!(payload.is_position_remaining(64));

    assert!(matches!(
        payload.verify_block(0, &[0u8; 16], None),
        Err(StorageError::InvalidArgument(_))
    ));
    assert!(matches!(
        payload.verify_block(1, &sha256, None),
        Err(StorageError::RangeMissing { .. })
    ));
}

#[test]
fn test_flush_only_when_unflushed() {
    let temp = TempDir::new().unwrap();
    let mut payload = PayloadAddressSpace::new(uncached_registry(), temp.path());
    payload
        .create_all("p", 10, vec![SegmentInfo::new("data.bin", 10, 0)], None, BLOCK)
        .unwrap();

    assert!(!payload.flush().unwrap());
    payload.write_range(0, &pattern(4, 0), 0).unwrap();
    assert!(payload.flush().unwrap());
    assert!(!payload.flush().unwrap());
}

#[test]
fn test_clear() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(PayloadRegistry::new());
    let mut payload = PayloadAddressSpace::new(Arc::clone(&registry), temp.path());
    payload
        .create_all("p", 10, vec![SegmentInfo::new("data.bin", 10, 0)], None, BLOCK)
        .unwrap();

    payload.clear().unwrap();
    assert!(!payload.is_open());
    assert_eq!(payload.total(), 0);
    assert_eq!(payload.remaining(), 0);
    assert!(registry.is_empty());
}

#[test]
fn test_add_file() {
    let temp = TempDir::new().unwrap();
    let mut payload = PayloadAddressSpace::new(Arc::new(PayloadRegistry::new()), temp.path());
    payload
        .create_all("p", 20, vec![SegmentInfo::new("data.bin", 10, 0)], None, BLOCK)
        .unwrap();

    payload.add_file("extra.bin", 10, 10).unwrap();
    let handle = payload.handle().unwrap();
    assert_eq!(handle.lock().segments().count(), 2);
    assert_eq!(handle.lock().total_length(), 20);
}

#[test]
fn test_registry_shares_payloads() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(PayloadRegistry::new());
    let segments = vec![SegmentInfo::new("data.bin", 16, 0)];

    let mut writer = PayloadAddressSpace::new(Arc::clone(&registry), temp.path());
    writer.create_all("p", 16, segments.clone(), None, BLOCK).unwrap();
    let mut reader = PayloadAddressSpace::new(Arc::clone(&registry), temp.path());
    reader.open("p", 16, segments, None, false, BLOCK).unwrap();
    assert_eq!(registry.ref_count("p"), Some(2));

    let data = pattern(16, 7);
    writer.write_range(0, &data, 0).unwrap();

    // the reader sees the writer's cached bytes
    let mut buf = vec![0u8; 16];
    reader.read_range(0, &mut buf).unwrap();
    assert_eq!(buf, data);

    writer.close().unwrap();
    assert_eq!(registry.ref_count("p"), Some(1));
    assert!(!reader.handle().unwrap().lock().is_writable());
    assert_eq!(fs::read(temp.path().join("data.bin")).unwrap(), data);

    reader.read_range(0, &mut buf).unwrap();
    assert_eq!(buf, data);

    reader.close().unwrap();
    assert!(!registry.contains("p"));
}

#[test]
fn test_registry_refcounting() {
    let temp = TempDir::new().unwrap();
    let registry = PayloadRegistry::new();
    let request = OpenRequest::new("x", temp.path())
        .with_segments(vec![SegmentInfo::new("x.bin", 8, 0)])
        .with_create(true);

    let first = registry.open(request.clone()).unwrap();
    let second = registry.add_ref(&first).unwrap();
    assert_eq!(registry.ref_count("x"), Some(2));

    registry.release(second, false).unwrap();
    assert_eq!(registry.ref_count("x"), Some(1));
    registry.release(first, true).unwrap();
    assert!(registry.is_empty());

    let third = registry.open(request).unwrap();
    registry.close_all().unwrap();
    assert!(registry.is_empty());
    assert!(!third.lock().is_open());
    assert!(matches!(
        registry.release(third, false),
        Err(StorageError::PayloadNotFound(_))
    ));
}

#[test]
fn test_registry_upgrades_to_write() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("r.bin"), b"0123456789").unwrap();
    let registry = PayloadRegistry::new();
    let request = OpenRequest::new("r", temp.path())
        .with_segments(vec![SegmentInfo::new("r.bin", 10, 0)]);

    let reader = registry.open(request.clone()).unwrap();
    assert!(!reader.lock().is_writable());
    assert!(matches!(
        reader.lock().write(0, b"x", 0, true),
        Err(StorageError::ReadOnly)
    ));

    let writer = registry.open(request.with_write(true)).unwrap();
    assert!(reader.lock().is_writable());
    assert_eq!(writer.lock().write(0, b"ab", 0, false).unwrap(), 2);

    let mut buf = [0u8; 4];
    reader.lock().read(0, &mut buf, false).unwrap();
    assert_eq!(&buf, b"ab23");

    registry.release(writer, true).unwrap();
    registry.release(reader, false).unwrap();
}

#[test]
fn test_path_traversal_rejected() {
    let temp = TempDir::new().unwrap();
    let registry = PayloadRegistry::new();
    let request = OpenRequest::new("evil", temp.path())
        .with_segments(vec![SegmentInfo::new("../escape.bin", 8, 0)])
        .with_create(true);

    assert!(matches!(
        registry.open(request),
        Err(StorageError::PathTraversal(_))
    ));
    assert!(registry.is_empty());
}

#[test]
fn test_find_segment_skips_empty_segments() {
    let temp = TempDir::new().unwrap();
    let file = VirtualFile::new(
        "v",
        temp.path(),
        vec![
            SegmentInfo::new("b.bin", 10, 10),
            SegmentInfo::new("empty.bin", 0, 0),
            SegmentInfo::new("a.bin", 10, 0),
            SegmentInfo::new("a.bin", 10, 0),
        ],
        None,
        WriteBackCache::new(CacheConfig::default()),
        Arc::new(DiskOpener),
    )
    .unwrap();

    assert_eq!(file.segments().count(), 3);
    assert_eq!(file.find_segment(0).unwrap().path, Path::new("a.bin"));
    assert_eq!(file.find_segment(15).unwrap().path, Path::new("b.bin"));
    assert!(file.find_segment(20).is_none());
    assert_eq!(file.total_length(), 20);
}

#[test]
fn test_write_through_evicts_stale_cache_entries() {
    let temp = TempDir::new().unwrap();
    let registry = PayloadRegistry::new();
    let handle = registry
        .open(
            OpenRequest::new("w", temp.path())
                .with_segments(vec![SegmentInfo::new("w.bin", 8, 0)])
                .with_create(true),
        )
        .unwrap();

    {
        let mut file = handle.lock();
        file.write(0, b"AAAAAAAA", 0, true).unwrap();
        file.write(0, b"BBBB", 0, false).unwrap();
        assert!(file.cache().is_empty());

        let mut buf = [0u8; 8];
        file.read(0, &mut buf, false).unwrap();
        assert_eq!(&buf, b"BBBBAAAA");
    }

    registry.release(handle, true).unwrap();
    assert_eq!(fs::read(temp.path().join("w.bin")).unwrap(), b"BBBBAAAA");
}

#[test]
fn test_failed_flush_keeps_dirty_bytes_readable() {
    let temp = TempDir::new().unwrap();
    let fail = Arc::new(AtomicBool::new(false));
    let opener = FaultyOpener {
        name: "data.bin",
        fail: Arc::clone(&fail),
    };
    let registry = Arc::new(
        PayloadRegistry::new()
            .with_opener(Arc::new(opener))
            .with_cache_config(CacheConfig::default().with_sweep_interval(Duration::ZERO)),
    );
    let mut payload = PayloadAddressSpace::new(registry, temp.path());
    payload
        .create_all("p", 100, vec![SegmentInfo::new("data.bin", 100, 0)], None, BLOCK)
        .unwrap();

    let data = pattern(100, 4);
    payload.write_range(50, &data[50..], 0).unwrap();
    payload.handle().unwrap().lock().maintain(Instant::now()).unwrap();

    payload.write_range(0, &data[..50], 0).unwrap();
    fail.store(true, Ordering::SeqCst);
    let swept = payload.handle().unwrap().lock().maintain(Instant::now());
    assert!(matches!(swept, Err(StorageError::Cache(_))));
    assert!(payload.handle().unwrap().lock().is_cache_disabled());

    // bytes only the cache holds cannot be read around it
    let mut buf = vec![0u8; 8];
    let bypassed = payload.handle().unwrap().lock().read(0, &mut buf, true);
    assert!(bypassed.is_err());

    fail.store(false, Ordering::SeqCst);
    payload.read_range(0, &mut buf).unwrap();
    assert_eq!(buf, data[..8]);

    let mut all = vec![0u8; 100];
    payload.read_range(0, &mut all).unwrap();
    assert_eq!(all, data);

    payload.handle().unwrap().lock().maintain(Instant::now()).unwrap();
    assert!(payload.handle().unwrap().lock().cache().is_empty());
    assert_eq!(fs::read(temp.path().join("data.bin")).unwrap(), data);
}

#[test]
fn test_uncached_opener_still_sees_dirty_entries() {
    let temp = TempDir::new().unwrap();
    let registry = PayloadRegistry::new();
    let request = OpenRequest::new("u", temp.path())
        .with_segments(vec![SegmentInfo::new("u.bin", 8, 0)])
        .with_create(true);

    let writer = registry.open(request.clone()).unwrap();
    writer.lock().write(0, b"ABCDEFGH", 0, true).unwrap();

    let reader = registry.open(request.with_cache(false)).unwrap();
    {
        let mut file = reader.lock();
        assert!(file.is_cache_disabled());
        let mut buf = [0u8; 8];
        file.read(0, &mut buf, false).unwrap();
        assert_eq!(&buf, b"ABCDEFGH");

        file.maintain(Instant::now()).unwrap();
        assert!(file.cache().is_empty());
    }
    assert_eq!(fs::read(temp.path().join("u.bin")).unwrap(), b"ABCDEFGH");

    registry.release(reader, false).unwrap();
    registry.release(writer, true).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_flushes_dirty_entries() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(PayloadRegistry::new().with_cache_config(
        CacheConfig::default().with_sweep_interval(Duration::ZERO),
    ));
    let mut payload = PayloadAddressSpace::new(Arc::clone(&registry), temp.path());
    payload
        .create_all("p", 10, vec![SegmentInfo::new("data.bin", 10, 0)], None, BLOCK)
        .unwrap();

    let data = pattern(10, 9);
    payload.write_range(0, &data, 0).unwrap();
    let path = temp.path().join("data.bin");
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);

    let maintenance = registry.start_maintenance(Duration::from_secs(5));
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(
        payload.handle().unwrap().lock().cache().stats().dirty_bytes,
        0
    );
    assert_eq!(fs::read(&path).unwrap(), data);

    maintenance.shutdown().await;
}
