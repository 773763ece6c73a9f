use super::*;
use std::time::Duration;
use tempfile::TempDir;

fn ledger_in(temp: &TempDir, blocks: u32) -> CompletionLedger {
    let mut ledger = CompletionLedger::new();
    ledger.init(blocks, temp.path(), "payload").unwrap();
    ledger
}

fn touch(temp: &TempDir, name: &str, len: usize) -> (PathBuf, u32) {
    let path = temp.path().join(name);
    fs::write(&path, vec![0u8; len]).unwrap();
    let modified = unix_secs(fs::metadata(&path).unwrap().modified().unwrap());
    (path, modified)
}

#[test]
fn test_init_without_file() {
    let temp = TempDir::new().unwrap();
    let ledger = ledger_in(&temp, 8);

    assert_eq!(ledger.block_count(), 8);
    assert_eq!(ledger.done_count(), 0);
    assert!(ledger.files().is_empty());
    assert_eq!(ledger.path(), Some(temp.path().join("payload.dat").as_path()));
}

#[test]
fn test_round_trip() {
    let temp = TempDir::new().unwrap();
    let (file, modified) = touch(&temp, "data.bin", 10);

    let mut ledger = ledger_in(&temp, 16);
    ledger.update_file_data(&file, modified, 10);
    for block in [1, 5, 15] {
        ledger.set_block_as_done(block);
    }
    assert!(ledger.write_meta_file(true).unwrap());
    assert!(!ledger.is_changed());

    let restored = ledger_in(&temp, 16);
    assert_eq!(restored.blocks(), ledger.blocks());
    assert_eq!(restored.done_count(), 3);
    assert!(restored.is_block_done(5));

    assert_eq!(restored.files(), ledger.files());
    let fingerprint = restored.file_fingerprint(&file).unwrap();
    assert_eq!(fingerprint.last_modified, modified);
    assert_eq!(fingerprint.length, 10);
}

#[test]
fn test_no_temp_file_left_behind() {
    let temp = TempDir::new().unwrap();
    let mut ledger = ledger_in(&temp, 4);
    ledger.set_block_as_done(0);
    ledger.write_meta_file(true).unwrap();

    let names: Vec<_> = fs::read_dir(temp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, vec!["payload.dat".to_string()]);
}

#[test]
fn test_write_is_rate_limited() {
    let temp = TempDir::new().unwrap();
    let mut ledger = ledger_in(&temp, 4);

    // nothing changed
    assert!(!ledger.write_meta_file(false).unwrap());

    // changed, but init counts as a recent write
    ledger.set_block_as_done(1);
    assert!(!ledger.write_meta_file(false).unwrap());
    assert!(ledger.write_meta_file(true).unwrap());

    let mut eager = CompletionLedger::new().with_write_interval(Duration::ZERO);
    eager.init(4, temp.path(), "eager").unwrap();
    eager.set_block_as_done(2);
    assert!(eager.write_meta_file(false).unwrap());
    assert!(!eager.write_meta_file(false).unwrap());
}

#[test]
fn test_blocks_larger_than_count_are_dropped_on_load() {
    let temp = TempDir::new().unwrap();
    let mut ledger = ledger_in(&temp, 16);
    ledger.set_block_as_done(12);
    ledger.set_block_as_done(2);
    ledger.write_meta_file(true).unwrap();

    let smaller = ledger_in(&temp, 8);
    assert_eq!(smaller.done_count(), 1);
    assert!(smaller.is_block_done(2));
}

#[test]
fn test_corrupt_file_falls_back_to_empty() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("payload.dat"), b"RBLG\x00\x01\x00\x00\x00\x02\xff").unwrap();

    let mut ledger = ledger_in(&temp, 4);
    assert_eq!(ledger.done_count(), 0);

    ledger.set_block_as_done(3);
    assert!(matches!(
        ledger.read_meta_file(),
        Err(LedgerError::Corruption(_))
    ));
    // a failed load leaves the state alone
    assert!(ledger.is_block_done(3));
}

#[test]
fn test_uninitialized() {
    let mut ledger = CompletionLedger::new();
    assert!(matches!(
        ledger.write_meta_file(true),
        Err(LedgerError::Uninitialized)
    ));
    assert!(matches!(
        ledger.read_meta_file(),
        Err(LedgerError::Uninitialized)
    ));
}

#[test]
fn test_block_flags() {
    let temp = TempDir::new().unwrap();
    let mut ledger = ledger_in(&temp, 4);

    ledger.set_block_as_done(0);
    ledger.set_block_as_done(3);
    ledger.set_block_as_done(4);
    assert_eq!(ledger.done_count(), 2);
    assert!(!ledger.is_block_done(4));

    ledger.set_block_as_dirty(0);
    assert!(!ledger.is_block_done(0));
    assert!(ledger.is_changed());

    ledger.clear_blocks();
    assert_eq!(ledger.done_count(), 0);
}

#[test]
fn test_file_change_detection() {
    let temp = TempDir::new().unwrap();
    let (file, modified) = touch(&temp, "data.bin", 32);
    let mut ledger = ledger_in(&temp, 4);

    assert_eq!(ledger.has_file_changed(&file).unwrap(), FileStatus::Untracked);

    ledger.update_file_data(&file, modified, 32);
    ledger.set_block_as_done(1);
    assert_eq!(ledger.has_file_changed(&file).unwrap(), FileStatus::Unchanged);
    assert_eq!(ledger.done_count(), 1);

    ledger.update_file_data(&file, modified.wrapping_sub(100), 32);
    assert_eq!(ledger.has_file_changed(&file).unwrap(), FileStatus::Changed);
    assert_eq!(ledger.done_count(), 0);
}

#[test]
fn test_missing_tracked_file_clears_everything() {
    let temp = TempDir::new().unwrap();
    let (file, modified) = touch(&temp, "a.bin", 8);
    let (other, other_modified) = touch(&temp, "b.bin", 8);

    let mut ledger = ledger_in(&temp, 4);
    ledger.update_file_data(&file, modified, 8);
    ledger.update_file_data(&other, other_modified, 8);
    ledger.set_block_as_done(0);
    ledger.set_block_as_done(2);

    fs::remove_file(&file).unwrap();
    assert_eq!(ledger.has_file_changed(&file).unwrap(), FileStatus::Missing);
    assert_eq!(ledger.done_count(), 0);
}

#[test]
fn test_new_file_clears_blocks() {
    let temp = TempDir::new().unwrap();
    let (file, modified) = touch(&temp, "a.bin", 8);
    let mut ledger = ledger_in(&temp, 4);

    ledger.update_file_data(&file, modified, 8);
    ledger.set_block_as_done(0);

    // known file: only the fingerprint moves
    ledger.update_file_data(&file, modified + 1, 8);
    assert_eq!(ledger.done_count(), 1);

    ledger.update_file_data(&temp.path().join("b.bin"), modified, 8);
    assert_eq!(ledger.done_count(), 0);
    assert_eq!(ledger.files().len(), 2);
}

#[test]
fn test_delete_meta_file() {
    let temp = TempDir::new().unwrap();
    let mut ledger = ledger_in(&temp, 4);
    ledger.write_meta_file(true).unwrap();

    let path = ledger.path().unwrap().to_path_buf();
    assert!(path.exists());

    ledger.delete_meta_file().unwrap();
    assert!(!path.exists());
    ledger.delete_meta_file().unwrap();
}

#[test]
fn test_shared_ledger() {
    let temp = TempDir::new().unwrap();
    let shared = ledger_in(&temp, 4).shared();

    shared.lock().set_block_as_done(2);
    let clone = Arc::clone(&shared);
    assert!(clone.lock().is_block_done(2));
}
