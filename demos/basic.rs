//! Basic usage example for caskdb
//!
//! This example demonstrates the fundamental operations:
//! - Opening a database
//! - Writing and reading back many key-value pairs
//! - Deleting keys
//! - Merging to reclaim space
//!
//! Usage: `cargo run --example basic [DIR] [COUNT]`

use caskdb::{Error, Options, DB};
use std::time::{Duration, Instant};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let dir = args.next().unwrap_or_else(|| "./caskdb_data".to_string());
    let count: usize = match args.next() {
        Some(n) => n.parse()?,
        None => 100_000,
    };

    // Configure database options
    let options = Options::default()
        .max_segment_size(1024 * 1024) // 1MB
        .sync_writes(false)
        .merge_interval(Duration::from_secs(60 * 60));

    // Open database (will be created if it doesn't exist)
    let db = DB::open(&dir, options)?;
    println!("Database opened at {} ({} live keys)", dir, db.len());

    let start = Instant::now();
    for i in 0..count {
        let key = format!("test{}", i);
        let value = format!("testvalue{}", i);
        db.put(key.as_bytes(), value.as_bytes())?;
    }
    println!("Put {} items in {:?}", count, start.elapsed());

    let start = Instant::now();
    for i in 0..count {
        let key = format!("test{}", i);
        let expected = format!("testvalue{}", i);
        let value = db.get(key.as_bytes())?;
        if value != expected.as_bytes() {
            return Err(format!("value mismatch for {}", key).into());
        }
    }
    println!("Read back {} items in {:?}", count, start.elapsed());

    // Delete every other key
    for i in (0..count).step_by(2) {
        db.delete(format!("test{}", i).as_bytes())?;
    }
    match db.get(b"test0") {
        Err(Error::KeyNotFound) => println!("Deleted {} items", count.div_ceil(2)),
        other => return Err(format!("test0 should be gone, got {:?}", other).into()),
    }

    let segments = db.segment_count()?;
    let stats = db.merge()?;
    println!(
        "Merge: {} -> {} segment(s), {} record(s) rewritten, {} discarded",
        segments,
        db.segment_count()?,
        stats.records_rewritten,
        stats.records_discarded
    );

    // Close database
    db.close()?;
    println!("Database closed");

    Ok(())
}
