use crate::{
    Block, Blockstore, RemoteManager, StoreBlock, StoreError, StoreResult, KEYS_CHAN_BUF_SIZE,
    RAW_CODEC,
};
use cid::Cid;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Composite block store: a conventional inline store for regular blocks in
/// front of a [`RemoteManager`] for leaves whose bytes live in an external
/// source.
///
/// Reads prefer the inline tier and fall back to the manager; a manager hit
/// is promoted into the inline tier best-effort. Writes dispatch on the
/// block's tag: remote leaves go to the reference index, everything else
/// inline, except raw-codec blocks without positional info, which are
/// dropped so plain raw leaves cannot bypass the reference mechanism.
pub struct RemoteStore {
    bs: Arc<dyn Blockstore>,
    manager: Arc<RemoteManager>,
}

impl RemoteStore {
    pub fn new(bs: Arc<dyn Blockstore>, manager: Arc<RemoteManager>) -> Self {
        Self { bs, manager }
    }

    pub fn remote_manager(&self) -> Arc<RemoteManager> {
        self.manager.clone()
    }

    pub fn main_blockstore(&self) -> Arc<dyn Blockstore> {
        self.bs.clone()
    }

    pub async fn get(&self, cid: &Cid) -> StoreResult<Block> {
        match self.bs.get(cid).await {
            Err(e) if e.is_not_found() => {
                let block = self.manager.get(cid).await?;
                // cache the remote payload inline; the read already succeeded
                if let Err(e) = self.bs.put(block.clone()).await {
                    debug!("caching remote block {} inline failed: {}", cid, e);
                }
                Ok(block)
            }
            other => other,
        }
    }

    pub async fn get_size(&self, cid: &Cid) -> StoreResult<u64> {
        match self.bs.get_size(cid).await {
            Err(e) if e.is_not_found() => self.manager.get_size(cid).await,
            other => other,
        }
    }

    pub async fn has(&self, cid: &Cid) -> StoreResult<bool> {
        if self.bs.has(cid).await? {
            return Ok(true);
        }
        self.manager.has(cid).await
    }

    /// First writer wins: a block whose CID either tier already holds is
    /// left untouched.
    pub async fn put(&self, block: StoreBlock) -> StoreResult<()> {
        if self.has(block.cid()).await? {
            return Ok(());
        }

        match block {
            StoreBlock::Remote(leaf) => self.manager.put(&leaf).await,
            StoreBlock::Inline(block) => {
                if block.cid.codec() == RAW_CODEC {
                    debug!(
                        "dropping raw-codec inline block {}: raw leaves must arrive as references",
                        block.cid
                    );
                    return Ok(());
                }
                self.bs.put(block).await
            }
        }
    }

    /// Partitions into remote leaves and inline blocks after the per-block
    /// existence filter, then hands each group to its tier in one batch.
    pub async fn put_many(&self, blocks: Vec<StoreBlock>) -> StoreResult<()> {
        let mut inline = Vec::new();
        let mut remote = Vec::new();

        for block in blocks {
            if self.has(block.cid()).await? {
                continue;
            }
            match block {
                StoreBlock::Remote(leaf) => remote.push(leaf),
                StoreBlock::Inline(block) => inline.push(block),
            }
        }

        if !inline.is_empty() {
            self.bs.put_many(inline).await?;
        }
        if !remote.is_empty() {
            self.manager.put_many(&remote).await?;
        }
        Ok(())
    }

    /// Attempts both tiers. Not-found only when neither tier held the key;
    /// a real error from the inline tier is terminal.
    pub async fn delete_block(&self, cid: &Cid) -> StoreResult<()> {
        let inline_not_found = match self.bs.delete_block(cid).await {
            Ok(()) => None,
            Err(e) if e.is_not_found() => Some(e),
            Err(e) => return Err(e),
        };

        match self.manager.delete_block(cid).await {
            Ok(()) => Ok(()),
            Err(e) if !e.is_not_found() => Err(e),
            Err(_) => match inline_not_found {
                Some(e) => Err(e),
                None => Ok(()),
            },
        }
    }

    /// Sequential concatenation of the two tiers' keys on one channel:
    /// inline keys first, then reference-index keys. The second scan is not
    /// opened until the first is exhausted, because some backing stores
    /// cannot serve concurrent queries.
    pub async fn all_keys_chan(
        &self,
        cancel: CancellationToken,
    ) -> StoreResult<mpsc::Receiver<Cid>> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled("store keys scan".to_string()));
        }

        let mut inline_rx = self.bs.all_keys_chan(cancel.clone()).await?;
        let manager = self.manager.clone();
        let (tx, rx) = mpsc::channel(KEYS_CHAN_BUF_SIZE);

        tokio::spawn(async move {
            while let Some(cid) = inline_rx.recv().await {
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

            let mut manager_rx = match manager.all_keys_chan(cancel.clone()).await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!("error querying remote store index: {}", e);
                    return;
                }
            };

            while let Some(cid) = manager_rx.recv().await {
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

    pub fn hash_on_read(&self, enabled: bool) {
        self.bs.hash_on_read(enabled);
    }
}
