//! Chain overlay over multiple commit-graph files (§4.4 "Chain semantics").
//!
//! Git splits a commit-graph into levels under `objects/info/commit-graphs/` when
//! it doesn't want to rewrite the whole file on every write; the chain file lists
//! each level's hash oldest-first. Positions are global across the concatenated
//! levels — a later level's `CDAT` parent fields may point at a commit that only
//! exists in an earlier level — so lookups and parent resolution both need to walk
//! the whole chain, not just the level an OID's own fanout happens to live in.

use crate::commitgraph::{CommitData, GraphFile};
use crate::error::GpResult;
use crate::hash::ObjectId;

/// A single commit-graph file, or one stacked on top of a parent chain.
///
/// `Index::find`/`commit_data_at` walk towards the root (oldest level) only when
/// the requested OID/position isn't covered locally, so a lookup that hits in the
/// newest level costs exactly one fanout probe.
pub enum Index {
    Leaf(GraphFile),
    Overlay {
        parent: Box<Index>,
        local: GraphFile,
        /// this level's positions start here; equal to the parent chain's
        /// [`Index::position_count`] at the point this level was layered on
        min_position: u64,
    },
}

impl Index {
    pub fn leaf(graph: GraphFile) -> Self {
        Index::Leaf(graph)
    }

    /// stacks `local` on top of `self`, becoming the new head of the chain.
    pub fn layer_on(self, local: GraphFile) -> Self {
        let min_position = self.position_count();
        Index::Overlay { parent: Box::new(self), local, min_position }
    }

    /// builds a chain from levels already in oldest-first order, matching how the
    /// `commit-graph-chain` file lists them.
    pub fn from_levels(levels: impl IntoIterator<Item = GraphFile>) -> GpResult<Self> {
        let mut levels = levels.into_iter();
        let first = levels.next().ok_or_else(|| {
            anyhow!(crate::error::GpError::MalformedPack("commit-graph chain has no levels".into()))
        })?;
        Ok(levels.fold(Index::leaf(first), Index::layer_on))
    }

    /// total number of commits visible through this level, i.e. this level's own
    /// `min_position` plus its own count — what the *next* level's `min_position`
    /// would be if one were layered on top (mirrors jgit's `MaximumNumberOfHashes`).
    pub fn position_count(&self) -> u64 {
        match self {
            Index::Leaf(g) => g.count(),
            Index::Overlay { local, min_position, .. } => min_position + local.count(),
        }
    }

    /// `true` only if every level in the chain, including this one, has generation
    /// v2 data — a single v1 level anywhere downgrades the whole chain.
    pub fn has_generation_v2(&self) -> bool {
        match self {
            Index::Leaf(g) => g.has_generation_v2(),
            Index::Overlay { parent, local, .. } => local.has_generation_v2() && parent.has_generation_v2(),
        }
    }

    /// global position of `oid`, searching from the newest level down to the root.
    pub fn find(&self, oid: ObjectId) -> Option<u64> {
        match self {
            Index::Leaf(g) => g.local_position_of(oid),
            Index::Overlay { parent, local, min_position } => {
                local.local_position_of(oid).map(|p| min_position + p).or_else(|| parent.find(oid))
            }
        }
    }

    pub fn contains(&self, oid: ObjectId) -> bool {
        self.find(oid).is_some()
    }

    pub fn oid_at(&self, global_pos: u64) -> GpResult<ObjectId> {
        match self {
            Index::Leaf(g) => g.oid_at(global_pos),
            Index::Overlay { parent, local, min_position } => {
                if global_pos >= *min_position {
                    local.oid_at(global_pos - min_position)
                } else {
                    parent.oid_at(global_pos)
                }
            }
        }
    }

    /// resolves a commit at a global position, translating its parents' raw
    /// positions (themselves global, per §4.4) back through the whole chain.
    pub fn commit_data_at(&self, global_pos: u64) -> GpResult<CommitData> {
        let (tree, parent_positions, generation, commit_time) = self.raw_commit_at(global_pos)?;
        let parents = parent_positions.into_iter().map(|p| self.oid_at(p)).collect::<GpResult<_>>()?;
        Ok(CommitData { tree, parents, generation, commit_time })
    }

    fn raw_commit_at(&self, global_pos: u64) -> GpResult<(ObjectId, Vec<u64>, u64, u64)> {
        match self {
            Index::Leaf(g) => g.raw_commit_at(global_pos),
            Index::Overlay { parent, local, min_position } => {
                if global_pos >= *min_position {
                    local.raw_commit_at(global_pos - min_position)
                } else {
                    parent.raw_commit_at(global_pos)
                }
            }
        }
    }

    pub fn commit_data_for(&self, oid: ObjectId) -> GpResult<Option<CommitData>> {
        match self.find(oid) {
            Some(pos) => self.commit_data_at(pos).map(Some),
            None => Ok(None),
        }
    }

    /// iteratively unwinds the chain so `Drop` never recurses one frame per level;
    /// long chains (hundreds of levels, in pathological repos) would otherwise risk
    /// stack overflow in the generated `Drop` glue for `Box<Index>`.
    pub fn close(self) {
        let mut current = self;
        loop {
            match current {
                Index::Leaf(_) => break,
                Index::Overlay { parent, .. } => current = *parent,
            }
        }
    }
}

/// parses a `commit-graph-chain` file: a newline-separated list of graph-file
/// hashes, oldest first, one per line, with no trailing-empty-line handling beyond
/// the usual "ignore a final blank line" tolerance.
pub fn parse_chain_file(contents: &str) -> Vec<String> {
    contents.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_owned).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitgraph::encode::{encode_graph_file, encode_graph_layer};
    use crate::hash::HashAlgo;
    use crate::serialize::Deserialize;
    use std::collections::HashMap;
    use std::io::Cursor;

    fn oid(byte0: u8) -> ObjectId {
        let mut b = [0u8; 20];
        b[0] = byte0;
        ObjectId::from_sha1_bytes(b)
    }

    fn graph(entries: &[(ObjectId, ObjectId, Vec<ObjectId>, u64, u64)]) -> GraphFile {
        let bytes = encode_graph_file(HashAlgo::Sha1, entries).unwrap();
        GraphFile::deserialize(&mut Cursor::new(bytes)).unwrap()
    }

    /// like [`graph`] but for a level stacked on a parent chain that already
    /// occupies global positions `[0, min_position)`, resolving parents that
    /// live only in that earlier chain via `external_positions`.
    fn layered_graph(
        entries: &[(ObjectId, ObjectId, Vec<ObjectId>, u64, u64)],
        min_position: u64,
        external_positions: &HashMap<ObjectId, u64>,
    ) -> GraphFile {
        let bytes = encode_graph_layer(HashAlgo::Sha1, entries, min_position, external_positions).unwrap();
        GraphFile::deserialize(&mut Cursor::new(bytes)).unwrap()
    }

    #[test]
    fn falls_through_to_parent_level() {
        let c0 = oid(0x10);
        let c1 = oid(0x20);
        let base = graph(&[(c0, oid(1), vec![], 100, 0)]);
        let top = graph(&[(c1, oid(2), vec![], 101, 0)]);

        let chain = Index::leaf(base).layer_on(top);
        assert_eq!(chain.position_count(), 2);

        let pos0 = chain.find(c0).unwrap();
        let pos1 = chain.find(c1).unwrap();
        assert_ne!(pos0, pos1);
        assert_eq!(chain.oid_at(pos0).unwrap(), c0);
        assert_eq!(chain.oid_at(pos1).unwrap(), c1);
        assert!(chain.find(oid(0x99)).is_none());
    }

    #[test]
    fn resolves_parent_across_levels() {
        let c0 = oid(0x10);
        let c1 = oid(0x20);
        let base = graph(&[(c0, oid(1), vec![], 100, 0)]);
        // c1 lives in the top level but its parent c0 only exists in the base level,
        // at global position 0
        let external = HashMap::from([(c0, 0u64)]);
        let top = layered_graph(&[(c1, oid(2), vec![c0], 101, 1)], base.count(), &external);

        let chain = Index::leaf(base).layer_on(top);
        let data = chain.commit_data_for(c1).unwrap().unwrap();
        assert_eq!(data.parents, vec![c0]);
    }

    #[test]
    fn generation_v2_requires_every_level() {
        let c0 = oid(0x10);
        let base = graph(&[(c0, oid(1), vec![], 100, 0)]);
        assert!(!base.has_generation_v2());
        let chain = Index::leaf(base);
        assert!(!chain.has_generation_v2());
    }

    #[test]
    fn parses_chain_file_oldest_first() {
        let hashes = parse_chain_file("aaaa\nbbbb\n\ncccc\n");
        assert_eq!(hashes, vec!["aaaa", "bbbb", "cccc"]);
    }

    #[test]
    fn close_unwinds_without_recursing() {
        let c0 = oid(0x10);
        let mut chain = Index::leaf(graph(&[(c0, oid(1), vec![], 100, 0)]));
        for i in 1..64u8 {
            chain = chain.layer_on(graph(&[(oid(i.wrapping_add(0x40)), oid(2), vec![], 100 + i as u64, 0)]));
        }
        chain.close();
    }
}
