//! `TREE` extension: a cache of this index's would-be tree objects, so
//! `write-tree`-style operations can skip rehashing directories whose entries
//! haven't changed. Grammar (§6): `path NUL entry-count SP subtree-count LF
//! [oid]`, recursively for each subtree, depth-first. `entry-count == -1` marks
//! an invalidated subtree (no oid follows).

use crate::error::GpResult;
use crate::hash::{HashAlgo, ObjectId};
use crate::io::{BufReadExt, ReadExt, WriteExt};
use std::io::{BufRead, Write};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeCacheNode {
    /// empty for the root node
    pub path: String,
    /// -1 if this subtree is invalidated; otherwise the number of index entries
    /// (recursively) covered by it
    pub entry_count: i64,
    pub oid: Option<ObjectId>,
    pub children: Vec<TreeCacheNode>,
}

impl TreeCacheNode {
    pub fn is_invalidated(&self) -> bool {
        self.entry_count < 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeCache {
    pub root: TreeCacheNode,
}

impl TreeCache {
    pub fn parse(data: &[u8], algo: HashAlgo) -> GpResult<Self> {
        let mut cursor = std::io::Cursor::new(data);
        let root = parse_node(&mut cursor, algo)?;
        Ok(Self { root })
    }

    pub fn write(&self, w: &mut (impl Write + ?Sized)) -> GpResult<()> {
        write_node(w, &self.root)
    }
}

fn parse_node(r: &mut impl BufRead, algo: HashAlgo) -> GpResult<TreeCacheNode> {
    let path = r.read_null_terminated_string()?;
    let entry_count = r.read_ascii_num(b' ')?;
    let subtree_count = r.read_ascii_num(b'\n')?;
    let oid = if entry_count >= 0 { Some(r.read_oid(algo)?) } else { None };
    let children =
        (0..subtree_count).map(|_| parse_node(r, algo)).collect::<GpResult<Vec<_>>>()?;
    Ok(TreeCacheNode { path, entry_count, oid, children })
}

fn write_node(w: &mut (impl Write + ?Sized), node: &TreeCacheNode) -> GpResult<()> {
    w.write_null_terminated(node.path.as_bytes())?;
    w.write_ascii_num(node.entry_count, b' ')?;
    w.write_ascii_num(node.children.len() as i64, b'\n')?;
    if let Some(oid) = &node.oid {
        w.write_oid(oid)?;
    }
    for child in &node.children {
        write_node(w, child)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_nested_tree_with_an_invalidated_subtree() {
        let cache = TreeCache {
            root: TreeCacheNode {
                path: String::new(),
                entry_count: 5,
                oid: Some(ObjectId::from_sha1_bytes([0x11; 20])),
                children: vec![
                    TreeCacheNode {
                        path: "src".into(),
                        entry_count: 3,
                        oid: Some(ObjectId::from_sha1_bytes([0x22; 20])),
                        children: vec![],
                    },
                    TreeCacheNode { path: "vendor".into(), entry_count: -1, oid: None, children: vec![] },
                ],
            },
        };
        let mut buf = vec![];
        cache.write(&mut buf).unwrap();
        let decoded = TreeCache::parse(&buf, HashAlgo::Sha1).unwrap();
        assert_eq!(decoded, cache);
        assert!(decoded.root.children[1].is_invalidated());
    }
}
