use crate::*;
use async_trait::async_trait;
use cid::Cid;
use rand::RngCore;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn new_file_store(root: &Path) -> (RemoteStore, Arc<MemDatastore>) {
    let ds = Arc::new(MemDatastore::new());
    let source = Arc::new(FileSource::new(root));
    let manager = Arc::new(RemoteManager::new(ds.clone(), source));
    let bs = Arc::new(DsBlockstore::new(ds.clone()));
    (RemoteStore::new(bs, manager), ds)
}

async fn make_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    tokio::fs::write(&path, data).await.unwrap();
    path
}

fn remote_leaf(path: &Path, data: &[u8], offset: u64) -> RemoteLeaf {
    RemoteLeaf::new(
        Block::new_raw(data.to_vec()),
        path.to_str().unwrap().to_string(),
        offset,
    )
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

async fn collect_keys(store: &RemoteStore) -> Vec<Cid> {
    let mut rx = store
        .all_keys_chan(CancellationToken::new())
        .await
        .unwrap();
    let mut out = Vec::new();
    while let Some(cid) = rx.recv().await {
        out.push(cid);
    }
    out
}

#[tokio::test]
async fn test_basic_filestore() {
    let dir = TempDir::new().unwrap();
    let (store, _) = new_file_store(dir.path());

    let buf = random_bytes(1000);
    let path = make_file(dir.path(), "backing", &buf).await;

    let mut cids = Vec::new();
    for i in 0..100 {
        let leaf = remote_leaf(&path, &buf[i * 10..(i + 1) * 10], (i * 10) as u64);
        let cid = leaf.cid;
        store.put(StoreBlock::Remote(leaf)).await.unwrap();
        cids.push(cid);
    }

    for (i, cid) in cids.iter().enumerate() {
        let block = store.get(cid).await.unwrap();
        assert_eq!(block.data, buf[i * 10..(i + 1) * 10].to_vec());
    }

    let keys: HashSet<Cid> = collect_keys(&store).await.into_iter().collect();
    assert_eq!(keys.len(), 100);
    for cid in &cids {
        assert!(keys.contains(cid), "missing cid: {}", cid);
    }
}

#[tokio::test]
async fn test_deletes() {
    let dir = TempDir::new().unwrap();
    let (store, _) = new_file_store(dir.path());

    let buf = random_bytes(1000);
    let path = make_file(dir.path(), "backing", &buf).await;

    let mut cids = Vec::new();
    for i in 0..100 {
        let leaf = remote_leaf(&path, &buf[i * 10..(i + 1) * 10], (i * 10) as u64);
        let cid = leaf.cid;
        store.put(StoreBlock::Remote(leaf)).await.unwrap();
        cids.push(cid);
    }

    for cid in &cids[..4] {
        store.delete_block(cid).await.unwrap();
    }
    for cid in &cids[..4] {
        assert!(store.get(cid).await.err().unwrap().is_not_found());
    }

    let keys: HashSet<Cid> = collect_keys(&store).await.into_iter().collect();
    assert_eq!(keys.len(), 96);
    for cid in &cids[..4] {
        assert!(!keys.contains(cid), "deleted cid still listed: {}", cid);
    }
    for cid in &cids[4..] {
        assert!(keys.contains(cid), "missing cid: {}", cid);
    }
}

#[tokio::test]
async fn test_corrupt_reference_detection() {
    let dir = TempDir::new().unwrap();
    let (store, _) = new_file_store(dir.path());
    let manager = store.remote_manager();

    let mut data = random_bytes(10);
    let path = make_file(dir.path(), "victim", &data).await;

    let leaf = remote_leaf(&path, &data, 0);
    let cid = leaf.cid;
    manager.put(&leaf).await.unwrap();
    assert_eq!(manager.get(&cid).await.unwrap().data, data);

    // flip one byte in place: same length, different content
    data[5] ^= 0xff;
    tokio::fs::write(&path, &data).await.unwrap();
    let err = manager.get(&cid).await.err().unwrap();
    assert_eq!(err.reference_status(), Some(ReferenceStatus::FileChanged));

    // truncate below the recorded size: short read
    tokio::fs::write(&path, &data[..3]).await.unwrap();
    let err = manager.get(&cid).await.err().unwrap();
    assert_eq!(err.reference_status(), Some(ReferenceStatus::FileChanged));

    // remove the backing file entirely
    tokio::fs::remove_file(&path).await.unwrap();
    let err = manager.get(&cid).await.err().unwrap();
    assert_eq!(err.reference_status(), Some(ReferenceStatus::FileNotFound));

    // the index itself never noticed
    assert!(manager.has(&cid).await.unwrap());
    assert_eq!(manager.get_size(&cid).await.unwrap(), 10);
}

#[tokio::test]
async fn test_index_promotes_into_inline_cache() {
    let dir = TempDir::new().unwrap();
    let (store, _) = new_file_store(dir.path());

    let payload = vec![b'A'; 1024];
    let path = make_file(dir.path(), "object", &payload).await;

    let root = store
        .index(path.to_str().unwrap(), IndexOptions::default())
        .await
        .unwrap();

    // single chunk: the root is the raw leaf itself
    assert_eq!(root, Block::new_raw(payload.clone()).cid);

    // cache not hit yet
    assert!(!store.main_blockstore().has(&root).await.unwrap());

    let block = store.get(&root).await.unwrap();
    assert_eq!(block.data, payload);

    // cache hit now
    assert!(store.main_blockstore().has(&root).await.unwrap());
}

#[tokio::test]
async fn test_duplicate_leaf_keeps_first_record() {
    let dir = TempDir::new().unwrap();
    let (store, ds) = new_file_store(dir.path());

    let first = make_file(dir.path(), "first", b"AAAABBBB").await;
    let second = make_file(dir.path(), "second", b"AAAA").await;

    let opts = IndexOptions {
        chunker: "size-4".to_string(),
        ..Default::default()
    };
    let root1 = store
        .index(first.to_str().unwrap(), opts.clone())
        .await
        .unwrap();
    let root2 = store
        .index(second.to_str().unwrap(), opts)
        .await
        .unwrap();
    assert_ne!(root1, root2);

    // the shared "AAAA" leaf was first written while indexing `first`; the
    // second index call was gated out by the existence check
    let shared = Block::new_raw(b"AAAA".to_vec()).cid;
    let raw = ds.get(&record_key(shared.hash())).await.unwrap();
    let record = ReferenceRecord::decode_bytes(&raw).unwrap();
    assert_eq!(record.path().unwrap(), first.to_str().unwrap());

    // and both roots still resolve
    assert_eq!(store.get(&root2).await.unwrap().data, b"AAAA".to_vec());
}

/// Serves keys relative to a directory, the way an object-store bucket
/// serves keys relative to its bucket root.
struct DirSource {
    dir: PathBuf,
}

#[async_trait]
impl RemoteSource for DirSource {
    async fn get(&self, key: &str) -> StoreResult<(SourceReader, u64)> {
        let path = self.dir.join(key.trim_start_matches('/'));
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    StoreError::NotFound(format!("no object: {}", key))
                }
                _ => StoreError::Transport(e.to_string()),
            })?;
        let size = file.metadata().await.map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok((Box::pin(file), size.len()))
    }

    async fn get_part(&self, key: &str, offset: u64, size: u64) -> StoreResult<SourceReader> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};
        let path = self.dir.join(key.trim_start_matches('/'));
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    StoreError::NotFound(format!("no object: {}", key))
                }
                _ => StoreError::Transport(e.to_string()),
            })?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Box::pin(file.take(size)))
    }
}

#[tokio::test]
async fn test_mounted_sources_index_and_resolve() {
    let dir = TempDir::new().unwrap();
    let d1 = dir.path().join("bucket1");
    let d2 = dir.path().join("bucket2");
    tokio::fs::create_dir_all(&d1).await.unwrap();
    tokio::fs::create_dir_all(&d2).await.unwrap();

    make_file(&d1, "x", b"AAAACCCC").await;
    make_file(&d2, "x", b"AAAABBBB").await;

    let source = Arc::new(MountSource::new(vec![
        Mount {
            prefix: "/foo".to_string(),
            source: Arc::new(DirSource { dir: d1 }),
        },
        Mount {
            prefix: "/bar".to_string(),
            source: Arc::new(DirSource { dir: d2 }),
        },
    ]));

    let ds = Arc::new(MemDatastore::new());
    let manager = Arc::new(RemoteManager::new(ds.clone(), source));
    let bs = Arc::new(DsBlockstore::new(ds.clone()));
    let store = RemoteStore::new(bs, manager);

    let opts = IndexOptions {
        chunker: "size-4".to_string(),
        ..Default::default()
    };
    let root1 = store.index("/foo/x", opts.clone()).await.unwrap();
    let root2 = store.index("/bar/x", opts).await.unwrap();
    assert_ne!(root1, root2);

    // the record keeps the full mount-level key, so reads route back
    // through the right mount
    let shared = Block::new_raw(b"AAAA".to_vec()).cid;
    let raw = ds.get(&record_key(shared.hash())).await.unwrap();
    let record = ReferenceRecord::decode_bytes(&raw).unwrap();
    assert_eq!(record.path().unwrap(), "/foo/x");

    let unique = Block::new_raw(b"CCCC".to_vec()).cid;
    assert_eq!(store.get(&unique).await.unwrap().data, b"CCCC".to_vec());
    let unique = Block::new_raw(b"BBBB".to_vec()).cid;
    assert_eq!(store.get(&unique).await.unwrap().data, b"BBBB".to_vec());
}

#[tokio::test]
async fn test_raw_inline_blocks_are_dropped() {
    let dir = TempDir::new().unwrap();
    let (store, _) = new_file_store(dir.path());

    let raw = Block::new_raw(b"stray raw leaf".to_vec());
    let cid = raw.cid;
    store.put(StoreBlock::Inline(raw)).await.unwrap();
    assert!(!store.has(&cid).await.unwrap());

    let node = Block::new_dag_json(b"{\"links\":[]}".to_vec());
    let cid = node.cid;
    store.put(StoreBlock::Inline(node)).await.unwrap();
    assert!(store.has(&cid).await.unwrap());
}

#[tokio::test]
async fn test_delete_coherence_across_tiers() {
    let dir = TempDir::new().unwrap();
    let (store, _) = new_file_store(dir.path());

    let buf = random_bytes(20);
    let path = make_file(dir.path(), "backing", &buf).await;

    // remote-only
    let leaf = remote_leaf(&path, &buf[..10], 0);
    let remote_cid = leaf.cid;
    store.put(StoreBlock::Remote(leaf)).await.unwrap();

    // inline-only
    let node = Block::new_dag_json(b"{\"links\":[],\"total_size\":0}".to_vec());
    let inline_cid = node.cid;
    store.put(StoreBlock::Inline(node)).await.unwrap();

    store.delete_block(&remote_cid).await.unwrap();
    store.delete_block(&inline_cid).await.unwrap();

    // neither tier holds anything anymore
    assert!(store
        .delete_block(&remote_cid)
        .await
        .err()
        .unwrap()
        .is_not_found());
    assert!(store
        .delete_block(&inline_cid)
        .await
        .err()
        .unwrap()
        .is_not_found());

    // present in both tiers: one delete clears both
    let leaf = remote_leaf(&path, &buf[10..], 10);
    let both_cid = leaf.cid;
    store.put(StoreBlock::Remote(leaf)).await.unwrap();
    let _ = store.get(&both_cid).await.unwrap(); // promotes inline
    assert!(store.main_blockstore().has(&both_cid).await.unwrap());

    store.delete_block(&both_cid).await.unwrap();
    assert!(!store.has(&both_cid).await.unwrap());
}

#[tokio::test]
async fn test_all_keys_lists_inline_tier_first() {
    let dir = TempDir::new().unwrap();
    let (store, _) = new_file_store(dir.path());

    let buf = random_bytes(30);
    let path = make_file(dir.path(), "backing", &buf).await;

    let mut remote_cids = HashSet::new();
    for i in 0..3 {
        let leaf = remote_leaf(&path, &buf[i * 10..(i + 1) * 10], (i * 10) as u64);
        remote_cids.insert(leaf.cid);
        store.put(StoreBlock::Remote(leaf)).await.unwrap();
    }

    let mut inline_cids = HashSet::new();
    for i in 0..3 {
        let node = Block::new_dag_json(format!("{{\"n\":{}}}", i).into_bytes());
        inline_cids.insert(node.cid);
        store.put(StoreBlock::Inline(node)).await.unwrap();
    }

    let keys = collect_keys(&store).await;
    assert_eq!(keys.len(), 6);

    // inline tier is scanned to exhaustion before the reference index, and
    // every key comes back as the exact CID it was stored under, dag-json
    // codec included
    for cid in &keys[..3] {
        assert!(inline_cids.contains(cid));
    }
    for cid in &keys[3..] {
        assert!(remote_cids.contains(cid));
    }
}

#[tokio::test]
async fn test_all_keys_cancellation() {
    let dir = TempDir::new().unwrap();
    let (store, _) = new_file_store(dir.path());

    let buf = random_bytes(3000);
    let path = make_file(dir.path(), "backing", &buf).await;
    for i in 0..300 {
        let leaf = remote_leaf(&path, &buf[i * 10..(i + 1) * 10], (i * 10) as u64);
        store.put(StoreBlock::Remote(leaf)).await.unwrap();
    }

    // a token cancelled up front refuses to open the scan
    let cancelled = CancellationToken::new();
    cancelled.cancel();
    assert!(matches!(
        store.all_keys_chan(cancelled).await,
        Err(StoreError::Cancelled(_))
    ));

    // cancelling mid-stream closes the channel instead of hanging
    let token = CancellationToken::new();
    let mut rx = store.all_keys_chan(token.clone()).await.unwrap();
    let mut count = 0;
    while let Some(_cid) = rx.recv().await {
        count += 1;
        if count == 10 {
            token.cancel();
        }
    }
    assert!(count < 300);
}

#[tokio::test]
async fn test_get_verifies_with_requested_prefix() {
    let dir = TempDir::new().unwrap();
    let (store, _) = new_file_store(dir.path());
    let manager = store.remote_manager();

    let data = b"prefix carried through".to_vec();
    let path = make_file(dir.path(), "backing", &data).await;
    let leaf = remote_leaf(&path, &data, 0);
    let raw_cid = leaf.cid;
    manager.put(&leaf).await.unwrap();

    // same multihash under a different codec resolves to the same record,
    // and verification rebuilds the CID with the requested codec
    let json_cid = Cid::new_v1(DAG_JSON_CODEC, *raw_cid.hash());
    let block = manager.get(&json_cid).await.unwrap();
    assert_eq!(block.cid, json_cid);
    assert_eq!(block.data, data);

    assert_eq!(manager.get(&raw_cid).await.unwrap().cid, raw_cid);
}

#[tokio::test]
async fn test_malformed_record_reports_corrupt_reference() {
    let dir = TempDir::new().unwrap();
    let (store, ds) = new_file_store(dir.path());
    let manager = store.remote_manager();

    // a record missing its size field, written behind the manager's back
    let cid = Block::new_raw(b"orphan".to_vec()).cid;
    let record = ReferenceRecord {
        file_path: Some("somewhere".to_string()),
        offset_field: Some(0),
        size_field: None,
    };
    ds.put(&record_key(cid.hash()), record.encode_bytes())
        .await
        .unwrap();

    let err = manager.get_size(&cid).await.err().unwrap();
    assert_eq!(err.reference_status(), Some(ReferenceStatus::OtherError));

    let err = manager.get(&cid).await.err().unwrap();
    assert_eq!(err.reference_status(), Some(ReferenceStatus::OtherError));
}

#[tokio::test]
async fn test_put_many_partitions_tiers() {
    let dir = TempDir::new().unwrap();
    let (store, _) = new_file_store(dir.path());

    let buf = random_bytes(20);
    let path = make_file(dir.path(), "backing", &buf).await;

    let leaf_a = remote_leaf(&path, &buf[..10], 0);
    let leaf_b = remote_leaf(&path, &buf[10..], 10);
    let node = Block::new_dag_json(b"{\"links\":[],\"total_size\":20}".to_vec());

    let cids = vec![leaf_a.cid, leaf_b.cid, node.cid];
    store
        .put_many(vec![
            StoreBlock::Remote(leaf_a),
            StoreBlock::Remote(leaf_b),
            StoreBlock::Inline(node),
        ])
        .await
        .unwrap();

    for cid in &cids {
        assert!(store.has(cid).await.unwrap());
    }
    assert_eq!(store.get(&cids[0]).await.unwrap().data, buf[..10].to_vec());
    assert_eq!(store.get_size(&cids[1]).await.unwrap(), 10);
}

#[tokio::test]
async fn test_index_empty_object() {
    let dir = TempDir::new().unwrap();
    let (store, _) = new_file_store(dir.path());

    let path = make_file(dir.path(), "empty", b"").await;
    let root = store
        .index(path.to_str().unwrap(), IndexOptions::default())
        .await
        .unwrap();

    assert_eq!(root, Block::new_raw(Vec::new()).cid);
    assert_eq!(store.get(&root).await.unwrap().data, Vec::<u8>::new());
    assert_eq!(store.get_size(&root).await.unwrap(), 0);
}

#[tokio::test]
async fn test_index_unknown_layout() {
    let dir = TempDir::new().unwrap();
    let (store, _) = new_file_store(dir.path());
    let path = make_file(dir.path(), "object", b"data").await;

    let err = store
        .index(
            path.to_str().unwrap(),
            IndexOptions {
                layout: "spiral".to_string(),
                ..Default::default()
            },
        )
        .await
        .err()
        .unwrap();
    assert!(matches!(err, StoreError::InvalidParam(_)));
}

#[tokio::test]
async fn test_index_multi_chunk_round_trip() {
    let dir = TempDir::new().unwrap();
    let (store, _) = new_file_store(dir.path());

    let payload = random_bytes(1000);
    let path = make_file(dir.path(), "object", &payload).await;

    for layout in ["balanced", "trickle"] {
        let root = store
            .index(
                path.to_str().unwrap(),
                IndexOptions {
                    chunker: "size-100".to_string(),
                    max_links: 3,
                    layout: layout.to_string(),
                },
            )
            .await
            .unwrap();

        // walk the DAG back out of the store and reassemble the payload
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(cid) = stack.pop() {
            let block = store.get(&cid).await.unwrap();
            if cid.codec() == DAG_JSON_CODEC {
                let node: DagNode = serde_json::from_slice(&block.data).unwrap();
                for link in node.links.iter().rev() {
                    stack.push(link.cid.parse().unwrap());
                }
            } else {
                out.extend_from_slice(&block.data);
            }
        }
        assert_eq!(out, payload, "layout {}", layout);
    }
}

#[tokio::test]
async fn test_manager_over_sqlite_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("index.db");

    let data = random_bytes(10);
    let path = make_file(dir.path(), "backing", &data).await;
    let leaf = remote_leaf(&path, &data, 0);
    let cid = leaf.cid;

    {
        let ds = Arc::new(SqliteDatastore::new(db_path.to_str().unwrap()).unwrap());
        let manager = RemoteManager::new(ds, Arc::new(FileSource::new(dir.path())));
        manager.put(&leaf).await.unwrap();
    }

    let ds = Arc::new(SqliteDatastore::new(db_path.to_str().unwrap()).unwrap());
    let manager = RemoteManager::new(ds, Arc::new(FileSource::new(dir.path())));
    assert!(manager.has(&cid).await.unwrap());
    assert_eq!(manager.get(&cid).await.unwrap().data, data);
}
