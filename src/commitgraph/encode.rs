//! Commit-graph v2 encoder (§4.4). Sorts the input OIDs, builds the fanout table,
//! and writes `OIDF`/`OIDL`/`CDAT` plus `EDGE` (if any octopus merges are present)
//! and `GDA2`/`GDO2` (if any generation exceeds the 34-bit inline width). The
//! trailing checksum is computed inline via the same [`crate::io::HashWriter`]
//! pattern used by the pack/idx/rev writers.

use crate::error::{GpError, GpResult};
use crate::hash::{HashAlgo, ObjectId};
use crate::io::{HashWriter, WriteExt};
use std::collections::HashMap;
use std::io::Write;

const CGPH_MAGIC: u32 = 0x43475048;
const CGPH_VERSION: u8 = 1;
const FANOUT_ENTRYC: usize = 256;
const PARENT_NONE: u32 = 0x7000_0000;
const PARENT_OCTOPUS_USED: u32 = 0x8000_0000;
const PARENT_LAST_EDGE: u32 = 0x8000_0000;
const GENERATION_OVERFLOW_FLAG: u32 = 0x8000_0000;
const GENERATION_MAX_INLINE: u64 = (1 << 34) - 1;
const COMMIT_TIME_MASK: u64 = 0x3_FFFF_FFFF;

/// `(oid, tree, parents, commit_time, generation)` — the same shape a caller
/// would assemble from the commit objects being graphed.
pub type CommitEntry = (ObjectId, ObjectId, Vec<ObjectId>, u64, u64);

pub fn encode_graph_file(algo: HashAlgo, entries: &[CommitEntry]) -> GpResult<Vec<u8>> {
    encode_graph_layer(algo, entries, 0, &HashMap::new())
}

/// Encodes one level of a commit-graph chain (§4.4). `min_position` is this
/// level's own starting position — the parent chain's
/// [`crate::commitgraph::chain::Index::position_count`] at the point this level
/// is layered on, or `0` for a standalone file. `external_positions` resolves
/// parent oids that only exist in an earlier level, since a later level's CDAT
/// parent fields are positions into the whole concatenated chain.
pub fn encode_graph_layer(
    algo: HashAlgo,
    entries: &[CommitEntry],
    min_position: u64,
    external_positions: &HashMap<ObjectId, u64>,
) -> GpResult<Vec<u8>> {
    let mut sorted: Vec<&CommitEntry> = entries.iter().collect();
    sorted.sort_by_key(|(oid, ..)| *oid);
    for pair in sorted.windows(2) {
        ensure!(
            pair[0].0 != pair[1].0,
            GpError::MalformedPack("duplicate commit oid in commit-graph input".into())
        );
    }

    let position_of: HashMap<ObjectId, u64> =
        sorted.iter().enumerate().map(|(i, (oid, ..))| (*oid, min_position + i as u64)).collect();

    let mut fanout = [0u32; FANOUT_ENTRYC];
    for (oid, ..) in &sorted {
        fanout[oid.as_bytes()[0] as usize] += 1;
    }
    for i in 1..FANOUT_ENTRYC {
        fanout[i] += fanout[i - 1];
    }

    let mut oidl = vec![];
    for (oid, ..) in &sorted {
        oidl.extend_from_slice(oid.as_bytes());
    }

    let mut cdat = vec![];
    let mut edge = vec![];
    let mut gda2 = vec![];
    let mut gdo2 = vec![];
    let mut any_overflow = false;

    for (oid, tree, parents, commit_time, generation) in &sorted {
        ensure!(
            *commit_time <= COMMIT_TIME_MASK,
            GpError::MalformedPack(format!("commit time for `{}` exceeds 34 bits", oid))
        );
        cdat.extend_from_slice(tree.as_bytes());

        let resolve = |p: &ObjectId| -> GpResult<u32> {
            let global = position_of
                .get(p)
                .copied()
                .or_else(|| external_positions.get(p).copied())
                .ok_or_else(|| anyhow!(GpError::MalformedPack(format!("parent `{}` not in commit set", p))))?;
            u32::try_from(global).map_err(|_| {
                anyhow!(GpError::MalformedPack(format!("commit-graph position `{}` exceeds u32", global)))
            })
        };

        let (parent1, parent2) = match parents.as_slice() {
            [] => (PARENT_NONE, PARENT_NONE),
            [p1] => (resolve(p1)?, PARENT_NONE),
            [p1, p2] => (resolve(p1)?, resolve(p2)?),
            [p1, rest @ ..] => {
                let edge_index = (edge.len() / 4) as u32;
                for (i, p) in rest.iter().enumerate() {
                    let mut entry = resolve(p)?;
                    if i == rest.len() - 1 {
                        entry |= PARENT_LAST_EDGE;
                    }
                    edge.extend_from_slice(&entry.to_be_bytes());
                }
                (resolve(p1)?, edge_index | PARENT_OCTOPUS_USED)
            }
        };
        cdat.extend_from_slice(&parent1.to_be_bytes());
        cdat.extend_from_slice(&parent2.to_be_bytes());

        let inline_generation = (*generation).min(GENERATION_MAX_INLINE);
        let packed = (inline_generation << 34) | commit_time;
        cdat.extend_from_slice(&packed.to_be_bytes());

        // generation v2 stores the *offset* of the corrected date from commit_time
        let offset = generation.saturating_sub(*commit_time);
        if offset > u32::MAX as u64 {
            any_overflow = true;
        }
    }

    // only emit GDA2/GDO2 if at least one entry actually needs the corrected-date
    // offset to differ from the naive topological generation already in CDAT
    let needs_generation_v2 = sorted.iter().any(|(_, _, _, commit_time, generation)| {
        generation.saturating_sub(*commit_time) != 0 || *generation > GENERATION_MAX_INLINE
    });

    if needs_generation_v2 {
        for (_, _, _, commit_time, generation) in &sorted {
            let offset = generation.saturating_sub(*commit_time);
            if offset > u32::MAX as u64 || any_overflow {
                let overflow_index = (gdo2.len() / 8) as u32;
                gdo2.extend_from_slice(&offset.to_be_bytes());
                gda2.extend_from_slice(&(overflow_index | GENERATION_OVERFLOW_FLAG).to_be_bytes());
            } else {
                gda2.extend_from_slice(&(offset as u32).to_be_bytes());
            }
        }
    }

    write_chunked(algo, &fanout, &oidl, &cdat, &edge, &gda2, &gdo2)
}

#[allow(clippy::too_many_arguments)]
fn write_chunked(
    algo: HashAlgo,
    fanout: &[u32; FANOUT_ENTRYC],
    oidl: &[u8],
    cdat: &[u8],
    edge: &[u8],
    gda2: &[u8],
    gdo2: &[u8],
) -> GpResult<Vec<u8>> {
    let mut chunks: Vec<([u8; 4], &[u8])> = vec![];
    let mut oidf = vec![];
    for f in fanout {
        oidf.extend_from_slice(&f.to_be_bytes());
    }
    chunks.push((*b"OIDF", &oidf));
    chunks.push((*b"OIDL", oidl));
    chunks.push((*b"CDAT", cdat));
    if !edge.is_empty() {
        chunks.push((*b"EDGE", edge));
    }
    if !gda2.is_empty() {
        chunks.push((*b"GDA2", gda2));
        chunks.push((*b"GDO2", gdo2));
    }

    let header_len = 8 + 12 * (chunks.len() as u64 + 1);
    let mut offsets = vec![];
    let mut running = header_len;
    for (_, bytes) in &chunks {
        offsets.push(running);
        running += bytes.len() as u64;
    }

    let mut out = vec![];
    match algo {
        HashAlgo::Sha1 => {
            let mut w = HashWriter::new_sha1(&mut out);
            write_header_and_body(&mut w, &chunks, &offsets)?;
            w.write_hash()?;
        }
        HashAlgo::Sha256 => {
            let mut w = HashWriter::new_sha256(&mut out);
            write_header_and_body(&mut w, &chunks, &offsets)?;
            w.write_hash()?;
        }
    }
    Ok(out)
}

fn write_header_and_body(
    w: &mut (impl Write + ?Sized),
    chunks: &[([u8; 4], &[u8])],
    offsets: &[u64],
) -> GpResult<()> {
    w.write_u32(CGPH_MAGIC)?;
    w.write_u8(CGPH_VERSION)?;
    w.write_u8(1)?; // hash version: sha1; sha256 commit-graphs are not exercised by this encoder's callers yet
    w.write_u8(chunks.len() as u8)?;
    w.write_u8(0)?; // base graph count: this encoder only ever produces leaf files

    for ((sig, _), &offset) in chunks.iter().zip(offsets) {
        w.write_all(sig)?;
        w.write_u64(offset)?;
    }
    // terminating zero-signature entry
    w.write_all(&[0u8; 4])?;
    w.write_u64(offsets.last().map_or(0, |&o| o) + chunks.last().map_or(0, |(_, b)| b.len() as u64))?;

    for (_, bytes) in chunks {
        w.write_all(bytes)?;
    }
    Ok(())
}
