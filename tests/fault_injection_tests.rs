// Fault Injection Tests for caskdb
// These tests damage segment files on disk and check how the engine reacts

use caskdb::record::RECORD_HEADER_SIZE;
use caskdb::wal::{segment_path, ENVELOPE_HEADER_SIZE};
use caskdb::{Error, Options, DB};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn options() -> Options {
    Options::default().merge_interval(Duration::ZERO)
}

/// Encoded size of one entry (envelope + record) for the given key and value
fn entry_size(key: &[u8], value: &[u8]) -> usize {
    ENVELOPE_HEADER_SIZE + RECORD_HEADER_SIZE + key.len() + value.len()
}

fn flip_byte(path: &Path, offset: usize) {
    let mut bytes = fs::read(path).unwrap();
    bytes[offset] ^= 0xFF;
    fs::write(path, &bytes).unwrap();
}

/// Corrupting the value of the second record makes replay fail on that record
#[test]
fn test_corrupted_record_fails_open() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();

    {
        let db = DB::open(dir.path(), options()).unwrap();
        db.put(b"key1", b"value1").unwrap();
        db.put(b"key2", b"value2").unwrap();
        db.put(b"key3", b"value3").unwrap();
        db.close().unwrap();
    }

    // Last byte of key2's value
    let offset = entry_size(b"key1", b"value1") + entry_size(b"key2", b"value2") - 1;
    flip_byte(&segment_path(dir.path(), 0), offset);

    match DB::open(dir.path(), options()) {
        Err(Error::ChecksumMismatch { .. }) => {}
        Err(e) => panic!("Expected checksum mismatch, got {}", e),
        Ok(_) => panic!("Expected open to fail on a corrupted record"),
    }
}

/// A damaged envelope checksum fails replay
#[test]
fn test_corrupted_envelope_checksum_fails_open() {
    let dir = TempDir::new().unwrap();

    {
        let db = DB::open(dir.path(), options()).unwrap();
        db.put(b"key1", b"value1").unwrap();
        db.put(b"key2", b"value2").unwrap();
        db.close().unwrap();
    }

    // First byte of the first envelope's checksum
    flip_byte(&segment_path(dir.path(), 0), 0);

    assert!(matches!(DB::open(dir.path(), options()), Err(Error::ChecksumMismatch { .. })));
}

/// Damage in a record nobody reads is only reported on the read path
#[test]
fn test_corruption_detected_on_get() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), options()).unwrap();

    db.put(b"key1", b"value1").unwrap();
    db.put(b"key2", b"value2").unwrap();
    db.sync().unwrap();

    // Corrupt key1's value while the database is open
    flip_byte(&segment_path(dir.path(), 0), entry_size(b"key1", b"value1") - 1);

    assert!(matches!(db.get(b"key1"), Err(Error::ChecksumMismatch { .. })));
    // Unrelated keys are still readable
    assert_eq!(db.get(b"key2").unwrap(), b"value2".to_vec());
}

/// A damaged length field hides the entries behind it but never removes them
/// from disk; new writes go to a fresh segment
#[test]
fn test_damaged_length_keeps_segment_bytes() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let segment = segment_path(dir.path(), 0);

    {
        let db = DB::open(dir.path(), options()).unwrap();
        for i in 0..3 {
            db.put(format!("k{}", i).as_bytes(), b"value").unwrap();
        }
        db.close().unwrap();
    }

    // High byte of the first envelope's big-endian length
    let mut damaged = fs::read(&segment).unwrap();
    damaged[4] ^= 0x01;
    fs::write(&segment, &damaged).unwrap();

    {
        let db = DB::open(dir.path(), options()).unwrap();
        assert!(db.is_empty());
        assert_eq!(fs::read(&segment).unwrap(), damaged);
        assert_eq!(db.segment_count().unwrap(), 2);

        db.put(b"after", b"reopen").unwrap();
        db.close().unwrap();
    }

    assert_eq!(fs::read(&segment).unwrap(), damaged);
    let db = DB::open(dir.path(), options()).unwrap();
    assert_eq!(db.get(b"after").unwrap(), b"reopen".to_vec());
    assert_eq!(db.len(), 1);
    assert_eq!(fs::read(&segment).unwrap(), damaged);
}

/// Corruption in an old segment aborts open even if the key was overwritten later
#[test]
fn test_corruption_in_sealed_segment() {
    let dir = TempDir::new().unwrap();
    let opts = options().max_segment_size(64);

    {
        let db = DB::open(dir.path(), opts.clone()).unwrap();
        db.put(b"key", b"first-value").unwrap();
        db.put(b"key", b"second-value").unwrap();
        db.close().unwrap();
    }

    flip_byte(&segment_path(dir.path(), 0), ENVELOPE_HEADER_SIZE + RECORD_HEADER_SIZE);

    assert!(matches!(DB::open(dir.path(), opts), Err(Error::ChecksumMismatch { .. })));
}

/// A failed merge must not delete anything
#[test]
fn test_failed_merge_keeps_segments() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), options().max_segment_size(64)).unwrap();

    for i in 0..6 {
        db.put(format!("key{}", i).as_bytes(), b"value").unwrap();
    }
    let before = db.segment_count().unwrap();

    // Damage the oldest segment underneath the open database
    flip_byte(&segment_path(dir.path(), 0), ENVELOPE_HEADER_SIZE + 2);

    assert!(matches!(db.merge(), Err(Error::ChecksumMismatch { .. })));
    assert!(segment_path(dir.path(), 0).exists());
    // Only the rotation happened
    assert_eq!(db.segment_count().unwrap(), before + 1);

    // Undamaged keys are still served
    assert_eq!(db.get(b"key5").unwrap(), b"value".to_vec());
}

/// Files that are not segments are left alone
#[test]
fn test_foreign_files_are_ignored() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("README"), b"not a segment").unwrap();
    fs::write(dir.path().join("000000001.log"), b"wrong extension").unwrap();

    {
        let db = DB::open(dir.path(), options()).unwrap();
        db.put(b"key", b"value").unwrap();
    }

    let db = DB::open(dir.path(), options()).unwrap();
    assert_eq!(db.get(b"key").unwrap(), b"value".to_vec());
    assert_eq!(db.segment_count().unwrap(), 1);
    assert!(dir.path().join("README").exists());
}

/// A missing directory with create_if_missing disabled
#[test]
fn test_open_missing_directory() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope");

    let result = DB::open(&missing, options().create_if_missing(false));
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}
