use crate::{
    build_balanced, build_trickle, Block, Chunker, DagChild, DagLayout, RemoteLeaf, RemoteStore,
    StoreBlock, StoreResult, DEFAULT_MAX_LINKS,
};
use cid::Cid;

/// Options for [`RemoteStore::index`].
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Chunker descriptor; `"default"` is 256 KiB fixed-size.
    pub chunker: String,
    /// Fan-out of internal nodes; 0 means the library default.
    pub max_links: usize,
    /// `"balanced"` or `"trickle"`.
    pub layout: String,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            chunker: "default".to_string(),
            max_links: 0,
            layout: "balanced".to_string(),
        }
    }
}

impl RemoteStore {
    /// Stream the backing object at `key` through the chunker and lay the
    /// resulting leaves out as a DAG. Leaves are stored as references into
    /// the source (no payload copied); internal nodes go to the inline
    /// store. Returns the root CID.
    pub async fn index(&self, key: &str, opts: IndexOptions) -> StoreResult<Cid> {
        let chunker = Chunker::from_descriptor(&opts.chunker)?;
        let layout = DagLayout::from_descriptor(&opts.layout)?;
        let max_links = if opts.max_links == 0 {
            DEFAULT_MAX_LINKS
        } else {
            opts.max_links
        };

        let source = self.remote_manager().source();
        let (mut reader, total_size) = source.get(key).await?;

        let mut leaves: Vec<DagChild> = Vec::new();
        let mut offset = 0u64;
        while let Some(chunk) = chunker.next_chunk(&mut reader).await? {
            let size = chunk.len() as u64;
            let block = Block::new_raw(chunk);
            let child = DagChild {
                cid: block.cid,
                size,
            };
            self.put(StoreBlock::Remote(RemoteLeaf::new(
                block,
                key.to_string(),
                offset,
            )))
            .await?;
            leaves.push(child);
            offset += size;
        }

        // an empty object still gets one (empty) leaf
        if leaves.is_empty() {
            let block = Block::new_raw(Vec::new());
            let child = DagChild {
                cid: block.cid,
                size: 0,
            };
            self.put(StoreBlock::Remote(RemoteLeaf::new(
                block,
                key.to_string(),
                0,
            )))
            .await?;
            leaves.push(child);
        }

        if offset != total_size {
            debug!(
                "indexing {}: source reported {} bytes but stream yielded {}",
                key, total_size, offset
            );
        }

        let (root, nodes) = match layout {
            DagLayout::Balanced => build_balanced(&leaves, max_links)?,
            DagLayout::Trickle => build_trickle(&leaves, max_links)?,
        };
        if !nodes.is_empty() {
            self.put_many(nodes.into_iter().map(StoreBlock::Inline).collect())
                .await?;
        }

        info!(
            "indexed {}: {} leaves, root {}",
            key,
            leaves.len(),
            root
        );
        Ok(root)
    }
}
