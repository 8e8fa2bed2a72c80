use std::sync::Arc;

use log::{error, info};

use tessera::buffer::BufferPoolManager;
use tessera::common::init_log;
use tessera::index::BPlusTree;
use tessera::storage::disk::DiskManager;
use tessera::{PageId, RecordId, Result, SlotId};

fn rid_for(key: i64) -> RecordId {
    RecordId::new(PageId::new((key / 100) as i32), SlotId::new((key % 100) as u16))
}

fn run(db_path: &str) -> Result<()> {
    // Build a small tree so that a handful of keys already splits pages
    {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        println!("Created database file: {}", db_path);

        let bpm = Arc::new(BufferPoolManager::new(16, 2, disk_manager));
        let tree = BPlusTree::<i64>::with_max_sizes("orders_pk", Arc::clone(&bpm), 4, 4)?;

        for key in (1..=40).rev() {
            tree.insert(key, rid_for(key))?;
        }
        for key in (5..=40).step_by(5) {
            tree.remove(&key)?;
        }
        println!("Inserted 40 keys and removed every fifth:\n{}", tree.to_pretty_string()?);

        print!("Range scan from 17:");
        for item in tree.begin_at(&17)?.take(8) {
            let (key, rid) = item?;
            print!(" {}->{}", key, rid);
        }
        println!();

        bpm.flush_all_pages()?;
        println!("Flushed {} pages", bpm.disk_manager().get_num_pages());
    }

    // Reopen the file and find the tree again through the header page
    let disk_manager = Arc::new(DiskManager::new(db_path)?);
    let bpm = Arc::new(BufferPoolManager::new(16, 2, disk_manager));
    let tree = BPlusTree::<i64>::with_max_sizes("orders_pk", bpm, 4, 4)?;
    println!("\nReopened index with root {}", tree.get_root_page_id());

    for key in [17, 20, 33] {
        match tree.get_value(&key)?.first() {
            Some(rid) => println!("  lookup {} -> {}", key, rid),
            None => println!("  lookup {} -> not found", key),
        }
    }
    Ok(())
}

fn main() {
    init_log();

    println!("Tessera - buffer pool and B+ tree index");
    println!("=======================================\n");

    let db_path = "demo.db";
    let result = run(db_path);
    std::fs::remove_file(db_path).ok();

    match result {
        Ok(()) => info!("demo completed"),
        Err(e) => {
            error!("demo failed: {}", e);
            std::process::exit(1);
        }
    }
}
