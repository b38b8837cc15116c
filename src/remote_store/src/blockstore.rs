use crate::{
    b32_to_cid, cid_to_b32, cid_with_prefix_of, Block, Datastore, StoreError, StoreResult,
};
use async_trait::async_trait;
use cid::Cid;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Namespace prefix for inline block keys, disjoint from the reference
/// index by construction.
pub const BLOCKS_PREFIX: &str = "/blocks";

/// Capacity of the channel behind every keys-only scan.
pub const KEYS_CHAN_BUF_SIZE: usize = 128;

/// Conventional CID-to-bytes block store.
#[async_trait]
pub trait Blockstore: Send + Sync {
    async fn get(&self, cid: &Cid) -> StoreResult<Block>;
    async fn get_size(&self, cid: &Cid) -> StoreResult<u64>;
    async fn has(&self, cid: &Cid) -> StoreResult<bool>;
    async fn put(&self, block: Block) -> StoreResult<()>;
    async fn put_many(&self, blocks: Vec<Block>) -> StoreResult<()>;
    async fn delete_block(&self, cid: &Cid) -> StoreResult<()>;

    /// Keys-only scan on a bounded channel. The producer closes the channel
    /// when the scan is exhausted or `cancel` fires.
    async fn all_keys_chan(&self, cancel: CancellationToken)
        -> StoreResult<mpsc::Receiver<Cid>>;

    /// When enabled, `get` re-hashes the stored bytes against the requested
    /// CID before returning them.
    fn hash_on_read(&self, enabled: bool);
}

/// Inline block store persisting under `/blocks/<base32 cid>` in a
/// datastore. Keys carry the full binary CID, codec included, so a scan can
/// replay the exact CID each block was stored under.
pub struct DsBlockstore {
    ds: Arc<dyn Datastore>,
    verify_on_read: AtomicBool,
}

impl DsBlockstore {
    pub fn new(ds: Arc<dyn Datastore>) -> Self {
        Self {
            ds,
            verify_on_read: AtomicBool::new(false),
        }
    }

    fn block_key(cid: &Cid) -> String {
        format!("{}/{}", BLOCKS_PREFIX, cid_to_b32(cid))
    }
}

#[async_trait]
impl Blockstore for DsBlockstore {
    async fn get(&self, cid: &Cid) -> StoreResult<Block> {
        let data = self.ds.get(&Self::block_key(cid)).await.map_err(|e| {
            if e.is_not_found() {
                StoreError::NotFound(format!("block not found: {}", cid))
            } else {
                e
            }
        })?;

        if self.verify_on_read.load(Ordering::Relaxed)
            && cid_with_prefix_of(cid, &data)? != *cid
        {
            return Err(StoreError::Internal(format!(
                "block hash mismatch on read: {}",
                cid
            )));
        }

        Ok(Block::new(*cid, data))
    }

    async fn get_size(&self, cid: &Cid) -> StoreResult<u64> {
        self.ds
            .get_size(&Self::block_key(cid))
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    StoreError::NotFound(format!("block not found: {}", cid))
                } else {
                    e
                }
            })
    }

    async fn has(&self, cid: &Cid) -> StoreResult<bool> {
        self.ds.has(&Self::block_key(cid)).await
    }

    async fn put(&self, block: Block) -> StoreResult<()> {
        self.ds.put(&Self::block_key(&block.cid), block.data).await
    }

    async fn put_many(&self, blocks: Vec<Block>) -> StoreResult<()> {
        let entries = blocks
            .into_iter()
            .map(|b| (Self::block_key(&b.cid), b.data))
            .collect();
        self.ds.put_many(entries).await
    }

    async fn delete_block(&self, cid: &Cid) -> StoreResult<()> {
        self.ds.delete(&Self::block_key(cid)).await.map_err(|e| {
            if e.is_not_found() {
                StoreError::NotFound(format!("block not found: {}", cid))
            } else {
                e
            }
        })
    }

    async fn all_keys_chan(
        &self,
        cancel: CancellationToken,
    ) -> StoreResult<mpsc::Receiver<Cid>> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled("keys scan".to_string()));
        }

        let keys = self.ds.query_keys(BLOCKS_PREFIX).await?;
        let (tx, rx) = mpsc::channel(KEYS_CHAN_BUF_SIZE);

        tokio::spawn(async move {
            for key in keys {
                let b32 = match key.strip_prefix(BLOCKS_PREFIX).and_then(|r| r.strip_prefix('/')) {
                    Some(b32) => b32,
                    None => continue,
                };
                let cid = match b32_to_cid(b32) {
                    Ok(cid) => cid,
                    Err(e) => {
                        warn!("decoding cid from blockstore key {}: {}", key, e);
                        continue;
                    }
                };

                tokio::select! {
                    sent = tx.send(cid) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                    _ = cancel.cancelled() => {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    fn hash_on_read(&self, enabled: bool) {
        self.verify_on_read.store(enabled, Ordering::Relaxed);
    }
}
