use crate::{Block, StoreError, StoreResult};
use cid::Cid;
use serde::{Deserialize, Serialize};

/// Default fan-out for internal DAG nodes.
pub const DEFAULT_MAX_LINKS: usize = 174;

/// Subtrees added per depth step in the trickle layout.
const TRICKLE_LAYER_REPEAT: usize = 4;

/// DAG layout selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DagLayout {
    Balanced,
    Trickle,
}

impl DagLayout {
    pub fn from_descriptor(desc: &str) -> StoreResult<Self> {
        match desc {
            "" | "balanced" => Ok(DagLayout::Balanced),
            "trickle" => Ok(DagLayout::Trickle),
            other => Err(StoreError::InvalidParam(format!(
                "unknown layout: {}",
                other
            ))),
        }
    }
}

/// One child entry while building: its CID and the total payload bytes
/// beneath it.
#[derive(Debug, Clone, Copy)]
pub struct DagChild {
    pub cid: Cid,
    pub size: u64,
}

/// Serialized body of an internal DAG node.
#[derive(Debug, Serialize, Deserialize)]
pub struct DagNode {
    pub links: Vec<DagLink>,
    pub total_size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DagLink {
    pub cid: String,
    pub size: u64,
}

fn new_node(children: &[DagChild]) -> StoreResult<(DagChild, Block)> {
    let total_size = children.iter().map(|c| c.size).sum();
    let body = DagNode {
        links: children
            .iter()
            .map(|c| DagLink {
                cid: c.cid.to_string(),
                size: c.size,
            })
            .collect(),
        total_size,
    };
    let bytes =
        serde_json::to_vec(&body).map_err(|e| StoreError::Internal(e.to_string()))?;
    let block = Block::new_dag_json(bytes);
    Ok((
        DagChild {
            cid: block.cid,
            size: total_size,
        },
        block,
    ))
}

fn check_fanout(max_links: usize) -> StoreResult<()> {
    if max_links < 2 {
        return Err(StoreError::InvalidParam(format!(
            "max links must be at least 2, got {}",
            max_links
        )));
    }
    Ok(())
}

/// Balanced layout: group the leaf list into parents of at most `max_links`
/// children, level by level, until one root remains. A single leaf is its
/// own root and produces no internal nodes.
pub fn build_balanced(leaves: &[DagChild], max_links: usize) -> StoreResult<(Cid, Vec<Block>)> {
    check_fanout(max_links)?;
    if leaves.is_empty() {
        return Err(StoreError::InvalidParam("no leaves to lay out".to_string()));
    }
    if leaves.len() == 1 {
        return Ok((leaves[0].cid, Vec::new()));
    }

    let mut nodes = Vec::new();
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len() / max_links + 1);
        for group in level.chunks(max_links) {
            let (child, block) = new_node(group)?;
            nodes.push(block);
            next.push(child);
        }
        level = next;
    }

    Ok((level[0].cid, nodes))
}

/// Trickle layout: every node carries up to `max_links` direct leaves, then
/// subtrees of increasing depth, `TRICKLE_LAYER_REPEAT` siblings per depth.
pub fn build_trickle(leaves: &[DagChild], max_links: usize) -> StoreResult<(Cid, Vec<Block>)> {
    check_fanout(max_links)?;
    if leaves.is_empty() {
        return Err(StoreError::InvalidParam("no leaves to lay out".to_string()));
    }
    if leaves.len() == 1 {
        return Ok((leaves[0].cid, Vec::new()));
    }

    let mut builder = TrickleBuilder {
        leaves,
        pos: 0,
        max_links,
        nodes: Vec::new(),
    };
    let root = builder.build_root()?;
    Ok((root, builder.nodes))
}

struct TrickleBuilder<'a> {
    leaves: &'a [DagChild],
    pos: usize,
    max_links: usize,
    nodes: Vec<Block>,
}

impl TrickleBuilder<'_> {
    fn take_leaves(&mut self) -> Vec<DagChild> {
        let end = (self.pos + self.max_links).min(self.leaves.len());
        let taken = self.leaves[self.pos..end].to_vec();
        self.pos = end;
        taken
    }

    fn build_subtree(&mut self, depth: usize) -> StoreResult<Option<DagChild>> {
        if self.pos >= self.leaves.len() {
            return Ok(None);
        }

        let mut children = self.take_leaves();
        for d in 1..depth {
            for _ in 0..TRICKLE_LAYER_REPEAT {
                match self.build_subtree(d)? {
                    Some(child) => children.push(child),
                    None => break,
                }
            }
        }

        let (child, block) = new_node(&children)?;
        self.nodes.push(block);
        Ok(Some(child))
    }

    fn build_root(&mut self) -> StoreResult<Cid> {
        let mut children = self.take_leaves();
        let mut depth = 1;
        while self.pos < self.leaves.len() {
            for _ in 0..TRICKLE_LAYER_REPEAT {
                match self.build_subtree(depth)? {
                    Some(child) => children.push(child),
                    None => break,
                }
            }
            depth += 1;
        }

        let (root, block) = new_node(&children)?;
        self.nodes.push(block);
        Ok(root.cid)
    }
}
