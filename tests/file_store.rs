//! File-backed store: persistence across reopen and meta validation.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use bnode::primitives::pager::{FilePageStore, PageStore};
use bnode::storage::btree::{BTree, BTreeOptions};
use bnode::{BTreeError, Config, Result};
use tempfile::tempdir;

fn open_tree(store: FilePageStore, options: BTreeOptions) -> Result<(Arc<FilePageStore>, BTree)> {
    let file = Arc::new(store);
    let store: Arc<dyn PageStore> = file.clone();
    let tree = BTree::open_or_create(&store, options)?;
    Ok((file, tree))
}

#[test]
fn tree_survives_reopen() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("tree.bnode");
    {
        let (file, tree) = open_tree(FilePageStore::create(&path, 256)?, BTreeOptions::default())?;
        for n in 0..500u64 {
            tree.insert(&n.to_be_bytes(), format!("value-{n}").as_bytes())?;
        }
        file.sync()?;
    }

    let options = BTreeOptions {
        verify_on_open: true,
        ..BTreeOptions::default()
    };
    let (_file, tree) = open_tree(FilePageStore::open(&path)?, options)?;
    assert_eq!(tree.verify()?.keys, 500);
    assert_eq!(
        tree.lookup_required(&321u64.to_be_bytes())?,
        b"value-321".to_vec()
    );

    tree.insert(&1000u64.to_be_bytes(), b"after reopen")?;
    assert!(tree.contains_key(&1000u64.to_be_bytes())?);
    Ok(())
}

#[test]
fn open_or_create_uses_configured_page_size() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("tree.bnode");
    let config = Config::from_toml_str("page_size = 1024\nreclaim_replaced_pages = false")?;

    let (file, tree) = open_tree(
        FilePageStore::open_or_create(&path, config.page_size)?,
        config.btree_options(),
    )?;
    tree.insert(b"alpha", b"1")?;
    file.sync()?;
    assert_eq!(file.meta().page_size, 1024);
    drop(tree);
    drop(file);

    let reopened = FilePageStore::open_or_create(&path, 1024)?;
    assert_eq!(reopened.page_size(), 1024);
    assert!(matches!(
        FilePageStore::open_or_create(&path, 4096),
        Err(BTreeError::Invalid(_))
    ));
    Ok(())
}

#[test]
fn damaged_meta_page_is_rejected() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("tree.bnode");
    {
        let (file, tree) = open_tree(FilePageStore::create(&path, 256)?, BTreeOptions::default())?;
        tree.insert(b"key", b"value")?;
        file.sync()?;
    }

    let mut raw = OpenOptions::new().write(true).open(&path)?;
    raw.seek(SeekFrom::Start(14))?;
    raw.write_all(&[0xEE, 0xEE])?;
    raw.sync_all()?;
    drop(raw);

    assert!(matches!(
        FilePageStore::open(&path),
        Err(BTreeError::Corruption(_))
    ));
    Ok(())
}

#[test]
fn reclaimed_pages_are_reused_after_reopen() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("tree.bnode");
    let free_before = {
        let (file, tree) = open_tree(FilePageStore::create(&path, 256)?, BTreeOptions::default())?;
        for n in 0..200u64 {
            tree.insert(&n.to_be_bytes(), b"reclaim")?;
        }
        file.sync()?;
        file.free_pages()
    };
    assert!(free_before > 0);

    let (file, tree) = open_tree(FilePageStore::open(&path)?, BTreeOptions::default())?;
    assert_eq!(file.free_pages(), free_before);
    let report = tree.verify()?;
    let next_page = file.meta().next_page;
    assert_eq!(
        next_page.0 as usize - 1 - free_before,
        report.leaf_pages + report.internal_pages
    );

    let reused = file.allocate_page()?;
    assert!(reused < next_page);
    assert_eq!(file.meta().next_page, next_page);
    Ok(())
}
