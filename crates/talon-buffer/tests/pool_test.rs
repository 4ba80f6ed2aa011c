//! Buffer pool integration tests.
//!
//! End-to-end scenarios driving the buffer pool against a real on-disk
//! DiskManager:
//! - Pool fill, exhaustion, and recovery through unpinning
//! - Dirty-page write-back on eviction with byte-level verification
//! - LRU-K victim selection observed through page residency
//! - Delete and flush semantics
//! - A randomized workload that checks pool accounting after every step

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::tempdir;

use talon_buffer::{AccessType, BufferPoolConfig, BufferPoolManager};
use talon_common::page::{PageId, PAGE_SIZE};
use talon_common::TalonError;
use talon_storage::{DiskManager, DiskManagerConfig};

fn create_pool(num_frames: usize, replacer_k: usize) -> (BufferPoolManager, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let config = DiskManagerConfig {
        data_dir: dir.path().to_path_buf(),
        fsync_enabled: false,
    };
    let disk = Arc::new(DiskManager::new(config).unwrap());
    let pool = BufferPoolManager::new(
        BufferPoolConfig {
            num_frames,
            replacer_k,
        },
        disk,
    );
    (pool, dir)
}

fn unpin(pool: &BufferPoolManager, page_id: PageId, dirty: bool) {
    assert!(pool.unpin_page(page_id, dirty, AccessType::Unknown));
}

#[test]
fn fill_and_exhaust() {
    let (pool, _dir) = create_pool(3, 2);

    let p1 = pool.new_page().unwrap().unwrap().page_id();
    let p2 = pool.new_page().unwrap().unwrap().page_id();
    let p3 = pool.new_page().unwrap().unwrap().page_id();

    let ids = [p1, p2, p3];
    assert!(ids.iter().all(|id| id.is_valid()));
    assert_eq!(pool.page_count(), 3);
    assert_eq!(pool.free_frame_count(), 0);

    // Everything pinned: no fourth page.
    assert!(pool.new_page().unwrap().is_none());

    // Releasing one pin frees exactly one slot.
    unpin(&pool, p1, false);
    let p4 = pool.new_page().unwrap().unwrap().page_id();
    assert!(p4.is_valid());

    // p1 was clean, so it was dropped without a disk write and is no
    // longer resident.
    assert!(!pool.contains(p1));
    assert_eq!(pool.stats().pages_written, 0);

    // After another unpin, p1 can come back in via a disk read.
    unpin(&pool, p4, false);
    let frame = pool.fetch_page(p1, AccessType::Unknown).unwrap().unwrap();
    assert_eq!(frame.page_id(), p1);
    assert_eq!(pool.stats().pages_read, 1);

    assert!(pool.fetch_page(p2, AccessType::Unknown).unwrap().is_some());
    assert!(pool.fetch_page(p3, AccessType::Unknown).unwrap().is_some());
}

#[test]
fn dirty_page_written_back_on_eviction() {
    let (pool, _dir) = create_pool(3, 2);

    let p1 = {
        let frame = pool.new_page().unwrap().unwrap();
        frame.write_data().fill(0xAA);
        frame.page_id()
    };
    unpin(&pool, p1, true);

    // Three more pages force p1 out.
    for _ in 0..3 {
        let page_id = pool.new_page().unwrap().unwrap().page_id();
        unpin(&pool, page_id, false);
    }

    assert!(!pool.contains(p1));
    // Exactly one write-back: the dirty victim.
    assert_eq!(pool.stats().pages_written, 1);

    // The bytes survived the round trip.
    let frame = pool.fetch_page(p1, AccessType::Unknown).unwrap().unwrap();
    assert!(frame.read_data().iter().all(|&b| b == 0xAA));
}

#[test]
fn lru_k_victim_selection() {
    let (pool, _dir) = create_pool(3, 2);

    // Creation gives each page its first access.
    let p1 = pool.new_page().unwrap().unwrap().page_id();
    let p2 = pool.new_page().unwrap().unwrap().page_id();
    let p3 = pool.new_page().unwrap().unwrap().page_id();
    for id in [p1, p2, p3] {
        unpin(&pool, id, false);
    }

    // Second accesses promote p1 and p2; p3 stays cold.
    for id in [p1, p2] {
        pool.fetch_page(id, AccessType::Unknown).unwrap().unwrap();
        unpin(&pool, id, false);
    }

    // The cold frame loses first, despite p3 being newest.
    let p4 = pool.new_page().unwrap().unwrap().page_id();
    assert!(!pool.contains(p3));
    assert!(pool.contains(p1) && pool.contains(p2));

    // Promote p4 so the next victim comes out of the warm ordering:
    // p1 has the oldest second-most-recent access.
    unpin(&pool, p4, false);
    pool.fetch_page(p4, AccessType::Unknown).unwrap().unwrap();
    unpin(&pool, p4, false);

    pool.new_page().unwrap().unwrap();
    assert!(!pool.contains(p1));
    assert!(pool.contains(p2) && pool.contains(p4));
}

#[test]
fn delete_page_semantics() {
    let (pool, _dir) = create_pool(3, 2);

    let p1 = {
        let frame = pool.new_page().unwrap().unwrap();
        frame.write_data()[0] = 0x66;
        frame.page_id()
    };

    // Pinned: refused.
    assert!(!pool.delete_page(p1).unwrap());
    assert!(pool.contains(p1));

    unpin(&pool, p1, true);
    pool.flush_page(p1).unwrap();
    assert!(pool.delete_page(p1).unwrap());
    assert!(!pool.contains(p1));
    assert_eq!(pool.free_frame_count(), 3);

    // Re-fetch goes to disk and sees the flushed bytes.
    let reads_before = pool.stats().pages_read;
    let frame = pool.fetch_page(p1, AccessType::Unknown).unwrap().unwrap();
    assert_eq!(pool.stats().pages_read, reads_before + 1);
    assert_eq!(frame.read_data()[0], 0x66);
}

#[test]
fn flush_all_pages_clears_dirty_and_keeps_residency() {
    let (pool, _dir) = create_pool(4, 2);

    let mut pages = Vec::new();
    for i in 0..2u8 {
        let frame = pool.new_page().unwrap().unwrap();
        frame.write_data()[0] = i;
        pages.push(frame.page_id());
        unpin(&pool, frame.page_id(), true);
    }

    // One extra page stays pinned through the flush.
    let pinned = pool.new_page().unwrap().unwrap();
    let pinned_id = pinned.page_id();

    pool.flush_all_pages().unwrap();

    assert_eq!(pool.stats().pages_written, 3);
    assert_eq!(pool.page_count(), 3);
    assert_eq!(pinned.pin_count(), 1);

    // All dirty flags dropped; pages still resident and fetchable without
    // further reads.
    let reads_before = pool.stats().pages_read;
    for (i, page_id) in pages.iter().enumerate() {
        let frame = pool
            .fetch_page(*page_id, AccessType::Unknown)
            .unwrap()
            .unwrap();
        assert!(!frame.is_dirty());
        assert_eq!(frame.read_data()[0], i as u8);
        unpin(&pool, *page_id, false);
    }
    assert_eq!(pool.stats().pages_read, reads_before);
    assert!(pool.contains(pinned_id));
}

#[test]
fn flush_page_rejects_invalid_id() {
    let (pool, _dir) = create_pool(2, 2);

    assert!(matches!(
        pool.flush_page(PageId::INVALID),
        Err(TalonError::InvalidArgument(_))
    ));
}

#[test]
fn page_bytes_survive_eviction_cycles() {
    let (pool, _dir) = create_pool(2, 2);

    // Write a distinct pattern into many more pages than the pool holds.
    let mut pages = Vec::new();
    for i in 0..10u8 {
        let frame = pool.new_page().unwrap().unwrap();
        {
            let mut data = frame.write_data();
            data[0] = i;
            data[PAGE_SIZE - 1] = i ^ 0xFF;
        }
        pages.push(frame.page_id());
        unpin(&pool, frame.page_id(), true);
    }

    // Each page comes back byte-identical, through whatever mix of cache
    // hits and disk reads the pool chose.
    for (i, page_id) in pages.iter().enumerate() {
        let frame = pool
            .fetch_page(*page_id, AccessType::Unknown)
            .unwrap()
            .unwrap();
        {
            let data = frame.read_data();
            assert_eq!(data[0], i as u8);
            assert_eq!(data[PAGE_SIZE - 1], i as u8 ^ 0xFF);
        }
        unpin(&pool, *page_id, false);
    }
}

#[test]
fn randomized_workload_maintains_invariants() {
    const POOL_SIZE: usize = 8;
    const OPS: usize = 2_000;

    let (pool, _dir) = create_pool(POOL_SIZE, 2);
    let mut rng = rand::thread_rng();

    // Shadow model: pin counts we hold, and the last byte written to each
    // live page. Every unpin is dirty, so written bytes must survive any
    // eviction the pool performs.
    let mut pins: HashMap<PageId, u32> = HashMap::new();
    let mut content: HashMap<PageId, u8> = HashMap::new();
    let mut live: Vec<PageId> = Vec::new();

    for _ in 0..OPS {
        match rng.gen_range(0..10) {
            // New page, kept pinned with a byte written.
            0..=2 => {
                if let Some(frame) = pool.new_page().unwrap() {
                    let page_id = frame.page_id();
                    let byte = rng.gen::<u8>();
                    frame.write_data()[0] = byte;
                    pins.insert(page_id, 1);
                    content.insert(page_id, byte);
                    live.push(page_id);
                }
            }
            // Fetch a known page, verify its byte, sometimes rewrite it.
            3..=5 => {
                if let Some(&page_id) = live.choose(&mut rng) {
                    if let Some(frame) = pool.fetch_page(page_id, AccessType::Unknown).unwrap() {
                        assert_eq!(
                            frame.read_data()[0],
                            content[&page_id],
                            "{page_id} lost its bytes"
                        );
                        if rng.gen_bool(0.5) {
                            let byte = rng.gen::<u8>();
                            frame.write_data()[0] = byte;
                            content.insert(page_id, byte);
                        }
                        *pins.entry(page_id).or_insert(0) += 1;
                    }
                }
            }
            // Release one pin, always dirty.
            6..=8 => {
                let pinned: Vec<PageId> = pins
                    .iter()
                    .filter(|(_, &count)| count > 0)
                    .map(|(&page_id, _)| page_id)
                    .collect();
                if let Some(&page_id) = pinned.choose(&mut rng) {
                    assert!(pool.unpin_page(page_id, true, AccessType::Unknown));
                    *pins.get_mut(&page_id).unwrap() -= 1;
                }
            }
            // Delete or flush.
            _ => {
                if let Some(&page_id) = live.choose(&mut rng) {
                    if rng.gen_bool(0.5) {
                        let pinned = pins.get(&page_id).copied().unwrap_or(0) > 0;
                        let deleted = pool.delete_page(page_id).unwrap();
                        assert_eq!(deleted, !pinned);
                        if deleted {
                            live.retain(|&p| p != page_id);
                            pins.remove(&page_id);
                            content.remove(&page_id);
                        }
                    } else {
                        // Flushing is fine whether or not the page is
                        // resident.
                        pool.flush_page(page_id).unwrap();
                    }
                }
            }
        }

        // Every frame is either free or resident.
        assert_eq!(pool.free_frame_count() + pool.page_count(), POOL_SIZE);

        // Pinned pages are resident and not offered for eviction.
        let pinned = pins.values().filter(|&&count| count > 0).count();
        assert!(pinned <= pool.page_count());
        assert_eq!(pool.evictable_count(), pool.page_count() - pinned);
        for (&page_id, &count) in &pins {
            if count > 0 {
                assert!(pool.contains(page_id));
            }
        }
    }
}

#[test]
fn concurrent_fetches_share_the_pool() {
    use std::thread;

    let (pool, _dir) = create_pool(16, 2);
    let pool = Arc::new(pool);

    let mut pages = Vec::new();
    for i in 0..8u8 {
        let frame = pool.new_page().unwrap().unwrap();
        frame.write_data()[0] = i;
        pages.push(frame.page_id());
        unpin(&pool, frame.page_id(), true);
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let pool = Arc::clone(&pool);
        let pages = pages.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..50 {
                for (i, &page_id) in pages.iter().enumerate() {
                    let frame = pool.fetch_page(page_id, AccessType::Unknown).unwrap().unwrap();
                    assert_eq!(frame.read_data()[0], i as u8);
                    pool.unpin_page(page_id, false, AccessType::Unknown);
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(pool.free_frame_count() + pool.page_count(), 16);
    assert_eq!(pool.evictable_count(), pool.page_count());
}
