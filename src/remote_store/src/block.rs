use crate::{cid_with_prefix_of, StoreResult, DAG_JSON_CODEC, RAW_CODEC};
use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};

/// A content-addressed block: the bytes plus the CID they hash to.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub cid: Cid,
    pub data: Vec<u8>,
}

impl Block {
    pub fn new(cid: Cid, data: Vec<u8>) -> Self {
        Self { cid, data }
    }

    /// Raw-codec CIDv1 leaf over `data` (sha2-256).
    pub fn new_raw(data: Vec<u8>) -> Self {
        let cid = Cid::new_v1(RAW_CODEC, Code::Sha2_256.digest(&data));
        Self { cid, data }
    }

    /// dag-json-codec CIDv1 node over `data` (sha2-256).
    pub fn new_dag_json(data: Vec<u8>) -> Self {
        let cid = Cid::new_v1(DAG_JSON_CODEC, Code::Sha2_256.digest(&data));
        Self { cid, data }
    }

    /// Verify that the bytes still hash to the block's own CID, using the
    /// CID's prefix.
    pub fn verify(&self) -> StoreResult<bool> {
        Ok(cid_with_prefix_of(&self.cid, &self.data)? == self.cid)
    }
}

/// A leaf whose bytes live at `(path, offset)` in an external source. The
/// positional tag is what routes it to the reference index instead of the
/// inline store.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteLeaf {
    pub cid: Cid,
    pub data: Vec<u8>,
    pub path: String,
    pub offset: u64,
}

impl RemoteLeaf {
    pub fn new(block: Block, path: String, offset: u64) -> Self {
        Self {
            cid: block.cid,
            data: block.data,
            path,
            offset,
        }
    }
}

/// What the composite store dispatches on: either a conventional inline
/// block or a remote leaf carrying positional metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreBlock {
    Inline(Block),
    Remote(RemoteLeaf),
}

impl StoreBlock {
    pub fn cid(&self) -> &Cid {
        match self {
            StoreBlock::Inline(block) => &block.cid,
            StoreBlock::Remote(leaf) => &leaf.cid,
        }
    }

    pub fn data(&self) -> &[u8] {
        match self {
            StoreBlock::Inline(block) => &block.data,
            StoreBlock::Remote(leaf) => &leaf.data,
        }
    }
}
