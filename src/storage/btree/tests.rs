use super::{BTree, BTreeOptions, NodeRef};
use crate::primitives::pager::{MemPageStore, PageStore};
use crate::types::{BTreeError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn key(n: u64) -> [u8; 8] {
    n.to_be_bytes()
}

fn mem_tree_with(page_size: usize, options: BTreeOptions) -> Result<(Arc<MemPageStore>, BTree)> {
    let mem = MemPageStore::shared(page_size)?;
    let store: Arc<dyn PageStore> = mem.clone();
    let tree = BTree::open_or_create(&store, options)?;
    Ok((mem, tree))
}

fn mem_tree(page_size: usize) -> Result<(Arc<MemPageStore>, BTree)> {
    mem_tree_with(page_size, BTreeOptions::default())
}

fn collect(tree: &BTree) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    tree.cursor()?.collect()
}

#[test]
fn new_tree_is_a_sentinel_leaf() -> Result<()> {
    let (mem, tree) = mem_tree(4096)?;
    assert_eq!(tree.depth()?, 1);
    assert_eq!(mem.live_pages(), 1);
    let root = mem.read_page(tree.root_page()?)?;
    let node = NodeRef::parse(&root)?;
    assert!(node.is_leaf());
    assert_eq!(node.num_keys(), 1);
    assert_eq!(node.record(0)?, (&b""[..], &b""[..]));
    assert!(collect(&tree)?.is_empty());
    assert_eq!(tree.verify()?.keys, 0);
    Ok(())
}

#[test]
fn reinsert_updates_value_without_duplicating() -> Result<()> {
    let (mem, tree) = mem_tree(4096)?;
    tree.insert(b"K", b"a")?;
    tree.insert(b"K", b"b")?;
    assert_eq!(tree.lookup(b"K")?, Some(b"b".to_vec()));

    let root = mem.read_page(tree.root_page()?)?;
    assert_eq!(NodeRef::parse(&root)?.num_keys(), 2, "sentinel plus one record");
    assert_eq!(tree.verify()?.keys, 1);

    let stats = tree.stats_snapshot();
    assert_eq!(stats.leaf_inserts, 1);
    assert_eq!(stats.leaf_updates, 1);
    Ok(())
}

#[test]
fn ascending_inserts_reach_depth_three() -> Result<()> {
    let (_mem, tree) = mem_tree(128)?;
    let value = [0xABu8; 16];
    for m in 1..=30u64 {
        tree.insert(&key(10 * m), &value)?;
    }
    assert_eq!(tree.depth()?, 3);
    for m in 1..=30u64 {
        assert_eq!(tree.lookup(&key(10 * m))?.as_deref(), Some(&value[..]));
    }
    assert_eq!(tree.lookup(&key(5))?, None);
    assert!(matches!(
        tree.lookup_required(&key(5)),
        Err(BTreeError::KeyNotFound)
    ));
    assert!(!tree.contains_key(&key(305))?);

    let report = tree.verify()?;
    assert_eq!(report.depth, 3);
    assert_eq!(report.keys, 30);
    assert!(report.internal_pages >= 3);

    let stats = tree.stats_snapshot();
    assert_eq!(stats.root_splits, 2);
    assert!(stats.internal_splits >= 1);
    // Every split adds one page; every root split adds one more.
    assert_eq!(stats.leaf_splits as usize, report.leaf_pages - 1);
    assert_eq!(
        (stats.internal_splits + stats.root_splits) as usize,
        report.internal_pages
    );
    Ok(())
}

#[test]
fn depth_grows_one_level_per_root_split() -> Result<()> {
    let (_mem, tree) = mem_tree(128)?;
    let mut depth = tree.depth()?;
    for m in 1..=200u64 {
        tree.insert(&key(m), &[1u8; 16])?;
        let next = tree.depth()?;
        assert!(next == depth || next == depth + 1, "depth jumped at {m}");
        depth = next;
    }
    assert_eq!(tree.stats_snapshot().root_splits as usize, depth - 1);
    Ok(())
}

#[test]
fn shuffled_inserts_keep_order_and_size_invariants() -> Result<()> {
    let (_mem, tree) = mem_tree(256)?;
    let mut keys: Vec<u64> = (0..400).collect();
    keys.shuffle(&mut ChaCha8Rng::seed_from_u64(7));
    let mut reference = BTreeMap::new();
    for n in keys {
        let value = format!("v{n}").into_bytes();
        tree.insert(&key(n), &value)?;
        reference.insert(key(n).to_vec(), value);
    }
    let report = tree.verify()?;
    assert_eq!(report.keys, reference.len());

    let scanned = collect(&tree)?;
    let expected: Vec<(Vec<u8>, Vec<u8>)> = reference.into_iter().collect();
    assert_eq!(scanned, expected);
    Ok(())
}

#[test]
fn range_from_starts_at_first_key_not_below_start() -> Result<()> {
    let (_mem, tree) = mem_tree(128)?;
    for m in 1..=40u64 {
        tree.insert(&key(10 * m), b"x")?;
    }
    let keys: Vec<Vec<u8>> = tree
        .range_from(&key(55))?
        .map(|entry| entry.map(|(k, _)| k))
        .collect::<Result<_>>()?;
    let expected: Vec<Vec<u8>> = (6..=40u64).map(|m| key(10 * m).to_vec()).collect();
    assert_eq!(keys, expected);

    assert_eq!(tree.range_from(&key(401))?.count(), 0);

    let mut visited = 0usize;
    tree.for_each(|_, value| {
        assert_eq!(value, b"x");
        visited += 1;
        Ok(())
    })?;
    assert_eq!(visited, 40);
    Ok(())
}

#[test]
fn oversized_records_and_empty_keys_are_rejected() -> Result<()> {
    let (mem, tree) = mem_tree(128)?;
    // (128 - 4) / 2 = 62 bytes per entry, 14 of them overhead.
    tree.insert(&key(1), &[0u8; 40])?;
    let before = mem.live_pages();
    assert!(matches!(
        tree.insert(&key(2), &[0u8; 41]),
        Err(BTreeError::OversizedRecord { len: 63, max: 62 })
    ));
    assert!(matches!(tree.insert(b"", b"v"), Err(BTreeError::Invalid(_))));
    assert!(matches!(tree.lookup(b""), Err(BTreeError::Invalid(_))));
    assert_eq!(mem.live_pages(), before);
    assert_eq!(tree.verify()?.keys, 1);
    Ok(())
}

#[test]
fn largest_records_still_split() -> Result<()> {
    let (_mem, tree) = mem_tree(128)?;
    for m in 1..=20u64 {
        tree.insert(&key(m), &[m as u8; 40])?;
    }
    let report = tree.verify()?;
    assert_eq!(report.keys, 20);
    for m in 1..=20u64 {
        assert_eq!(tree.lookup_required(&key(m))?, vec![m as u8; 40]);
    }
    Ok(())
}

#[test]
fn failed_allocation_leaves_previous_tree_intact() -> Result<()> {
    let mem = Arc::new(MemPageStore::with_page_limit(128, 6)?);
    let store: Arc<dyn PageStore> = mem.clone();
    let tree = BTree::open_or_create(&store, BTreeOptions::default())?;

    let mut failed = None;
    for m in 1..=500u64 {
        let root = tree.root_page()?;
        let live = mem.live_pages();
        match tree.insert(&key(m), &[2u8; 16]) {
            Ok(()) => {}
            Err(err) => {
                assert!(matches!(err, BTreeError::AllocationFailure(_)));
                assert_eq!(tree.root_page()?, root);
                assert_eq!(mem.live_pages(), live);
                failed = Some(m);
                break;
            }
        }
    }
    let failed = failed.expect("page limit should stop the inserts");
    assert_eq!(tree.lookup(&key(failed))?, None);
    for m in 1..failed {
        assert!(tree.contains_key(&key(m))?);
    }
    assert_eq!(tree.verify()?.keys as u64, failed - 1);
    Ok(())
}

#[test]
fn replaced_pages_are_reclaimed() -> Result<()> {
    let (mem, tree) = mem_tree(128)?;
    for m in 1..=60u64 {
        tree.insert(&key(m), &[3u8; 8])?;
    }
    let report = tree.verify()?;
    assert_eq!(mem.live_pages(), report.leaf_pages + report.internal_pages);
    let stats = tree.stats_snapshot();
    assert_eq!(
        stats.pages_allocated - stats.pages_reclaimed,
        mem.live_pages() as u64 - 1
    );
    Ok(())
}

#[test]
fn old_roots_stay_readable_without_reclaim() -> Result<()> {
    let options = BTreeOptions {
        reclaim_replaced_pages: false,
        ..BTreeOptions::default()
    };
    let (mem, tree) = mem_tree_with(128, options)?;
    tree.insert(&key(1), b"first")?;
    let old_root = tree.root_page()?;
    for m in 2..=40u64 {
        tree.insert(&key(m), b"later")?;
    }
    let page = mem.read_page(old_root)?;
    let node = NodeRef::parse(&page)?;
    assert!(node.is_leaf());
    assert_eq!(node.num_keys(), 2);
    assert_eq!(node.record(1)?, (&key(1)[..], &b"first"[..]));
    assert_eq!(tree.stats_snapshot().pages_reclaimed, 0);
    Ok(())
}

#[test]
fn corrupt_pages_abort_without_writing() -> Result<()> {
    let (mem, tree) = mem_tree(128)?;
    for m in 1..=10u64 {
        tree.insert(&key(m), b"ok")?;
    }
    let root = tree.root_page()?;
    mem.write_page(root, &[0xFF; 128])?;
    let live = mem.live_pages();

    assert!(matches!(
        tree.lookup(&key(3)),
        Err(BTreeError::CorruptNode(_))
    ));
    assert!(matches!(
        tree.insert(&key(11), b"no"),
        Err(BTreeError::CorruptNode(_))
    ));
    assert!(matches!(tree.verify(), Err(BTreeError::CorruptNode(_))));
    assert_eq!(mem.live_pages(), live);
    assert_eq!(tree.root_page()?, root);
    Ok(())
}

#[test]
fn reopening_a_store_keeps_the_tree() -> Result<()> {
    let mem = MemPageStore::shared(256)?;
    let store: Arc<dyn PageStore> = mem.clone();
    {
        let tree = BTree::open_or_create(&store, BTreeOptions::default())?;
        for m in 1..=50u64 {
            tree.insert(&key(m), b"kept")?;
        }
    }
    let options = BTreeOptions {
        verify_on_open: true,
        ..BTreeOptions::default()
    };
    let tree = BTree::open_or_create(&store, options)?;
    assert_eq!(tree.verify()?.keys, 50);
    assert_eq!(tree.lookup_required(&key(25))?, b"kept".to_vec());
    Ok(())
}

#[test]
fn readers_see_committed_keys_while_writer_reclaims() -> Result<()> {
    let (mem, tree) = mem_tree(128)?;
    for m in 0..200u64 {
        tree.insert(&key(m), b"seed")?;
    }
    let writer_done = AtomicBool::new(false);
    std::thread::scope(|scope| -> Result<()> {
        let writer = scope.spawn(|| -> Result<()> {
            let written = (200..3000u64).try_for_each(|m| tree.insert(&key(m), b"new"));
            writer_done.store(true, Ordering::Release);
            written
        });
        let readers: Vec<_> = (0..3)
            .map(|_| {
                scope.spawn(|| -> Result<()> {
                    loop {
                        let finished = writer_done.load(Ordering::Acquire);
                        for m in 0..200u64 {
                            assert_eq!(tree.lookup(&key(m))?.as_deref(), Some(&b"seed"[..]));
                        }
                        if finished {
                            return Ok(());
                        }
                    }
                })
            })
            .collect();
        for reader in readers {
            reader.join().expect("reader thread")?;
        }
        writer.join().expect("writer thread")?;
        Ok(())
    })?;

    let report = tree.verify()?;
    assert_eq!(report.keys, 3000);
    assert_eq!(tree.pages_awaiting_reclaim(), 0);
    assert_eq!(mem.live_pages(), report.leaf_pages + report.internal_pages);
    assert!(tree.stats_snapshot().pages_reclaimed > 0);
    Ok(())
}

#[test]
fn open_cursor_pins_its_snapshot() -> Result<()> {
    let (mem, tree) = mem_tree(128)?;
    for m in 1..=40u64 {
        tree.insert(&key(m), b"old")?;
    }
    let mut cursor = tree.cursor()?;
    let first = cursor.next().transpose()?;
    assert_eq!(first, Some((key(1).to_vec(), b"old".to_vec())));

    let reclaimed = tree.stats_snapshot().pages_reclaimed;
    for m in 1..=80u64 {
        tree.insert(&key(m), b"new")?;
    }
    assert!(tree.pages_awaiting_reclaim() > 0);
    assert_eq!(tree.stats_snapshot().pages_reclaimed, reclaimed);

    let rest: Vec<(Vec<u8>, Vec<u8>)> = cursor.by_ref().collect::<Result<_>>()?;
    assert_eq!(rest.len(), 39);
    assert!(rest.iter().all(|(_, value)| value == b"old"));
    drop(cursor);

    assert_eq!(tree.pages_awaiting_reclaim(), 0);
    let report = tree.verify()?;
    assert_eq!(report.keys, 80);
    assert_eq!(mem.live_pages(), report.leaf_pages + report.internal_pages);
    Ok(())
}
