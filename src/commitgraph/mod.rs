//! Commit-graph v2 reader (§4.4): a chunk-table-based file (`CGPH`) that indexes
//! commits by OID and stores their tree hash, parents, generation number, and
//! commit time without needing to inflate every commit object from the pack.

pub mod chain;
pub mod encode;

use crate::error::{GpError, GpResult};
use crate::hash::{HashAlgo, ObjectId};
use crate::io::{BufReadExtSized, ReadExt};
use crate::serialize::{BufReadSeek, Deserialize};
use std::collections::HashMap;
use std::io::{BufRead, Seek, SeekFrom};

const CGPH_MAGIC: u32 = 0x43475048; // "CGPH"
const CGPH_VERSION: u8 = 1;
/// the hash-version byte in the header (1 = sha1); distinct from [`CGPH_VERSION`]
const HASH_VERSION_SHA1: u8 = 1;
const HASH_VERSION_SHA256: u8 = 2;

const OIDF: [u8; 4] = *b"OIDF";
const OIDL: [u8; 4] = *b"OIDL";
const CDAT: [u8; 4] = *b"CDAT";
const EDGE: [u8; 4] = *b"EDGE";
const GDA2: [u8; 4] = *b"GDA2";
const GDO2: [u8; 4] = *b"GDO2";
const BASE: [u8; 4] = *b"BASE";

const FANOUT_ENTRYC: usize = 256;
const CDAT_ENTRY_SIZE: u64 = 36; // tree(20) + parent1(4) + parent2(4) + generation/time(8)
const EDGE_ENTRY_SIZE: u64 = 4;
const GENERATION_OVERFLOW_FLAG: u32 = 0x8000_0000;
const PARENT_OCTOPUS_USED: u32 = 0x8000_0000;
const PARENT_NONE: u32 = 0x7000_0000;
const PARENT_LAST_EDGE: u32 = 0x8000_0000;

#[derive(Clone, Debug)]
pub struct CommitData {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    /// corrected commit date generation number (topological distance from a root)
    pub generation: u64,
    pub commit_time: u64,
}

/// a single `objects/info/commit-graph` (or one level of a chain) file.
pub struct GraphFile {
    algo: HashAlgo,
    fanout: [u32; FANOUT_ENTRYC],
    oids: Vec<ObjectId>,
    cdat: Vec<u8>,
    edge: Vec<u8>,
    gda2: Option<Vec<u8>>,
    gdo2: Option<Vec<u8>>,
    base_graph_ids: Vec<ObjectId>,
    has_generation_v2: bool,
}

impl GraphFile {
    pub fn count(&self) -> u64 {
        self.oids.len() as u64
    }

    pub fn has_generation_v2(&self) -> bool {
        self.has_generation_v2
    }

    /// hashes of the graph files this one was built on top of, from a `BASE` chunk
    pub fn base_graph_ids(&self) -> &[ObjectId] {
        &self.base_graph_ids
    }

    /// binary search within this file's own OID list only; chain fallthrough is
    /// [`chain::Index::find`]'s job.
    pub fn local_position_of(&self, oid: ObjectId) -> Option<u64> {
        let prefix = oid.as_bytes()[0] as usize;
        let low = if prefix == 0 { 0 } else { self.fanout[prefix - 1] } as usize;
        let high = self.fanout[prefix] as usize;
        self.oids[low..high].binary_search(&oid).ok().map(|i| (low + i) as u64)
    }

    pub fn oid_at(&self, pos: u64) -> GpResult<ObjectId> {
        self.oids
            .get(pos as usize)
            .copied()
            .ok_or_else(|| anyhow!(GpError::OffsetNotFound(pos)))
    }

    pub fn commit_data_at(&self, pos: u64) -> GpResult<CommitData> {
        let (tree, parent_positions, generation, commit_time) = self.raw_commit_at(pos)?;
        let parents = parent_positions.into_iter().map(|p| self.oid_at(p)).collect::<GpResult<_>>()?;
        Ok(CommitData { tree, parents, generation, commit_time })
    }

    /// like [`Self::commit_data_at`] but leaves parents as raw positions instead of
    /// resolving them to OIDs. A standalone file's positions are local; in a chain
    /// overlay they are global across the concatenated levels, so only
    /// [`chain::Index`] knows how to turn them back into OIDs — see §4.4.
    pub(crate) fn raw_commit_at(&self, pos: u64) -> GpResult<(ObjectId, Vec<u64>, u64, u64)> {
        let base = pos * CDAT_ENTRY_SIZE;
        let bytes = self
            .cdat
            .get(base as usize..(base + CDAT_ENTRY_SIZE) as usize)
            .ok_or_else(|| anyhow!(GpError::OffsetNotFound(pos)))?;
        let mut cursor = std::io::Cursor::new(bytes);
        let tree = cursor.read_oid(self.algo)?;
        let parent1 = cursor.read_u32()?;
        let parent2 = cursor.read_u32()?;
        let packed = cursor.read_u64()?;

        let commit_time = packed & 0x3_FFFF_FFFF;
        let generation_raw = packed >> 34;

        let generation = if self.has_generation_v2 {
            let gda2_word = self.read_gda2(pos)?;
            let offset = if gda2_word & GENERATION_OVERFLOW_FLAG != 0 {
                let overflow_index = (gda2_word & !GENERATION_OVERFLOW_FLAG) as u64;
                self.read_gdo2(overflow_index)?
            } else {
                gda2_word as u64
            };
            commit_time + offset
        } else {
            generation_raw
        };

        let mut parent_positions = Vec::with_capacity(2);
        if parent1 != PARENT_NONE {
            parent_positions.push(parent1 as u64);
        }
        if parent2 == PARENT_NONE {
            // no second parent
        } else if parent2 & PARENT_OCTOPUS_USED != 0 {
            let mut edge_index = (parent2 & !PARENT_OCTOPUS_USED) as u64;
            loop {
                let entry = self.edge_at(edge_index)?;
                let is_last = entry & PARENT_LAST_EDGE != 0;
                parent_positions.push((entry & !PARENT_LAST_EDGE) as u64);
                if is_last {
                    break;
                }
                edge_index += 1;
            }
        } else {
            parent_positions.push(parent2 as u64);
        }

        Ok((tree, parent_positions, generation, commit_time))
    }

    fn edge_at(&self, index: u64) -> GpResult<u32> {
        let base = (index * EDGE_ENTRY_SIZE) as usize;
        let bytes = self
            .edge
            .get(base..base + 4)
            .ok_or_else(|| anyhow!(GpError::MalformedPack("EDGE chunk index out of range".into())))?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn read_gda2(&self, pos: u64) -> GpResult<u32> {
        let gda2 = self
            .gda2
            .as_ref()
            .ok_or_else(|| anyhow!(GpError::MalformedPack("has_generation_v2 set without GDA2".into())))?;
        let base = (pos * 4) as usize;
        let bytes = gda2
            .get(base..base + 4)
            .ok_or_else(|| anyhow!(GpError::MalformedPack("GDA2 index out of range".into())))?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn read_gdo2(&self, index: u64) -> GpResult<u64> {
        let gdo2 = self
            .gdo2
            .as_ref()
            .ok_or_else(|| anyhow!(GpError::MalformedPack("GDA2 overflow bit set without GDO2".into())))?;
        let base = (index * 8) as usize;
        let bytes = gdo2
            .get(base..base + 8)
            .ok_or_else(|| anyhow!(GpError::MalformedPack("GDO2 index out of range".into())))?;
        Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
    }
}

impl Deserialize for GraphFile {
    fn deserialize(reader: &mut impl BufRead) -> GpResult<Self> {
        let magic = reader.read_u32()?;
        ensure_eq!(magic, CGPH_MAGIC, GpError::MalformedPack("bad commit-graph magic".into()));
        let version = reader.read_u8()?;
        ensure_eq!(version, CGPH_VERSION, GpError::UnsupportedVersion(version as u32));
        let hash_version = reader.read_u8()?;
        let algo = match hash_version {
            HASH_VERSION_SHA1 => HashAlgo::Sha1,
            HASH_VERSION_SHA256 => HashAlgo::Sha256,
            b => bail!(GpError::UnsupportedHash(b)),
        };
        let chunk_count = reader.read_u8()?;
        let _base_graph_count = reader.read_u8()?;

        let mut chunk_table = vec![];
        let mut end_of_chunks_offset = None;
        loop {
            let mut sig = [0u8; 4];
            reader.read_exact(&mut sig)?;
            let offset = reader.read_u64()?;
            if sig == [0, 0, 0, 0] {
                end_of_chunks_offset = Some(offset);
                break;
            }
            chunk_table.push((sig, offset));
        }
        let end_of_chunks_offset = end_of_chunks_offset
            .ok_or_else(|| anyhow!(GpError::MalformedPack("missing terminating chunk table entry".into())))?;
        ensure!(
            chunk_table.len() >= chunk_count as usize,
            GpError::MalformedPack("chunk table shorter than declared chunk count".into())
        );
        for pair in chunk_table.windows(2) {
            ensure!(
                pair[0].1 < pair[1].1,
                GpError::MalformedPack("chunk offsets do not strictly increase".into())
            );
        }

        // the reader we're given may not support seeking (a plain BufRead), so the
        // whole file is buffered up front and chunks are sliced out of that buffer.
        let mut rest = vec![];
        reader.read_to_end(&mut rest)?;
        // chunk offsets are absolute from the start of the file; `rest` starts right
        // after the fixed 8-byte header and the zero-terminated chunk table, which
        // is exactly how many bytes we've consumed from `reader` already
        let consumed = 8 + 12 * (chunk_table.len() as u64 + 1);

        let chunk_bytes = |sig: [u8; 4]| -> Option<&[u8]> {
            let idx = chunk_table.iter().position(|&(s, _)| s == sig)?;
            let start = chunk_table[idx].1;
            let end = chunk_table.get(idx + 1).map(|&(_, o)| o).unwrap_or(end_of_chunks_offset);
            let s = (start.saturating_sub(consumed)) as usize;
            let e = (end.saturating_sub(consumed)) as usize;
            rest.get(s..e.min(rest.len()))
        };

        let oidf_bytes = chunk_bytes(OIDF)
            .ok_or_else(|| anyhow!(GpError::MalformedPack("missing mandatory OIDF chunk".into())))?;
        ensure_eq!(
            oidf_bytes.len(),
            FANOUT_ENTRYC * 4,
            GpError::MalformedPack("OIDF chunk has the wrong size".into())
        );
        let mut fanout = [0u32; FANOUT_ENTRYC];
        for (i, f) in fanout.iter_mut().enumerate() {
            *f = u32::from_be_bytes(oidf_bytes[i * 4..i * 4 + 4].try_into().unwrap());
        }
        for i in 1..FANOUT_ENTRYC {
            ensure!(
                fanout[i - 1] <= fanout[i],
                GpError::MalformedPack("commit-graph OIDF fanout is not monotonic".into())
            );
        }
        let n = fanout[FANOUT_ENTRYC - 1] as u64;

        let oidl_bytes = chunk_bytes(OIDL)
            .ok_or_else(|| anyhow!(GpError::MalformedPack("missing mandatory OIDL chunk".into())))?;
        ensure_eq!(
            oidl_bytes.len() as u64,
            n * algo.size() as u64,
            GpError::MalformedPack("OIDL chunk has the wrong size".into())
        );
        let mut oids = Vec::with_capacity(n as usize);
        for i in 0..n {
            let start = (i as usize) * algo.size();
            oids.push(ObjectId::from_slice(algo, &oidl_bytes[start..start + algo.size()])?);
        }

        let cdat_bytes = chunk_bytes(CDAT)
            .ok_or_else(|| anyhow!(GpError::MalformedPack("missing mandatory CDAT chunk".into())))?;
        ensure_eq!(
            cdat_bytes.len() as u64,
            n * CDAT_ENTRY_SIZE,
            GpError::MalformedPack("CDAT chunk has the wrong size".into())
        );

        let edge = chunk_bytes(EDGE).unwrap_or(&[]).to_vec();
        let gda2 = chunk_bytes(GDA2).map(<[u8]>::to_vec);
        let gdo2 = chunk_bytes(GDO2).map(<[u8]>::to_vec);
        let has_generation_v2 = gda2.is_some();

        let base_graph_ids = match chunk_bytes(BASE) {
            Some(bytes) => {
                let size = algo.size();
                ensure!(
                    bytes.len() % size == 0,
                    GpError::MalformedPack("BASE chunk is not a whole number of oids".into())
                );
                bytes.chunks(size).map(|c| ObjectId::from_slice(algo, c)).collect::<GpResult<_>>()?
            }
            None => vec![],
        };

        trace!("GraphFile::deserialize: {} commits, has_generation_v2={}", n, has_generation_v2);
        Ok(Self {
            algo,
            fanout,
            oids,
            cdat: cdat_bytes.to_vec(),
            edge,
            gda2,
            gdo2,
            base_graph_ids,
            has_generation_v2,
        })
    }
}

pub fn read_graph_file(reader: &mut impl BufReadSeek) -> GpResult<GraphFile> {
    reader.seek(SeekFrom::Start(0))?;
    GraphFile::deserialize(reader)
}

/// builds an offset(position)->oid map on first use; the lazy map exists because
/// most callers look up by oid, not by position, and the cost of a reverse map
/// should only be paid by callers that actually walk positions in bulk.
#[derive(Default)]
pub struct PositionIndex(once_cell::sync::OnceCell<HashMap<u64, ObjectId>>);

impl PositionIndex {
    pub fn get_or_build(&self, graph: &GraphFile) -> &HashMap<u64, ObjectId> {
        self.0.get_or_init(|| (0..graph.count()).map(|i| (i, graph.oids[i as usize])).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitgraph::encode::encode_graph_file;
    use std::io::Cursor;

    fn oid(byte0: u8) -> ObjectId {
        let mut b = [0u8; 20];
        b[0] = byte0;
        ObjectId::from_sha1_bytes(b)
    }

    #[test]
    fn decodes_parent_counts_and_octopus_parents() {
        // 4 commits: c0 (no parents), c1 (parent c0), c2 (parents c0,c1),
        // c3 (parents c0,c1,c2) - an octopus merge exercising the EDGE chunk
        let c0 = oid(0x10);
        let c1 = oid(0x20);
        let c2 = oid(0x30);
        let c3 = oid(0x40);

        let entries = vec![
            (c0, oid(1), vec![], 100, 0),
            (c1, oid(2), vec![c0], 101, 1),
            (c2, oid(3), vec![c0, c1], 102, 2),
            (c3, oid(4), vec![c0, c1, c2], 103, 3),
        ];

        let bytes = encode_graph_file(HashAlgo::Sha1, &entries).unwrap();
        let graph = GraphFile::deserialize(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(graph.count(), 4);

        let counts: Vec<usize> = [c0, c1, c2, c3]
            .iter()
            .map(|&oid| {
                let pos = graph.local_position_of(oid).unwrap();
                graph.commit_data_at(pos).unwrap().parents.len()
            })
            .collect();
        assert_eq!(counts, vec![0, 1, 2, 3]);

        let pos3 = graph.local_position_of(c3).unwrap();
        let data3 = graph.commit_data_at(pos3).unwrap();
        assert_eq!(data3.parents, vec![c0, c1, c2]);
    }

    #[test]
    fn rejects_non_monotonic_fanout() {
        // 2 commits, neither has parents or an overflowing generation, so the
        // encoder emits exactly OIDF/OIDL/CDAT: header_len = 8 + 12*(3+1) = 56
        let mut bytes = encode_graph_file(
            HashAlgo::Sha1,
            &[(oid(0x10), oid(1), vec![], 1, 0), (oid(0x20), oid(2), vec![], 2, 0)],
        )
        .unwrap();
        let fanout_start = 56usize;
        // fanout[200] is normally 2 (both oids have byte0 < 200); blow it up past
        // fanout[201] to deterministically break the strictly-nondecreasing check
        let entry_off = fanout_start + 200 * 4;
        bytes[entry_off..entry_off + 4].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(GraphFile::deserialize(&mut Cursor::new(bytes)).is_err());
    }
}
