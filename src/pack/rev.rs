//! The `.rev` v1 reverse-index reader/writer (§4.2). A `.rev` file maps a
//! "position in pack order" (objects sorted by ascending on-disk offset) back to
//! "position in idx order" (objects sorted by oid) — the inverse of what the `.idx`
//! offset table already lets you compute the slow way by binary searching offsets.
//! Building one from an `.idx` only needs `PackIndexReader::entries_by_offset`.

use crate::error::{GpError, GpResult};
use crate::hash::{HashAlgo, ObjectId};
use crate::io::{ReadExt, WriteExt};
use crate::serialize::{BufReadSeek, Deserialize, Serialize};
use std::io::{BufRead, Read, Seek, SeekFrom, Write};

const RIDX_MAGIC: u32 = 0x52494458; // "RIDX"
const RIDX_VERSION: u32 = 1;

pub struct RevIndex {
    algo: HashAlgo,
    /// `positions[i]` is the idx-order position of the object at pack-order position `i`
    positions: Vec<u32>,
    /// pack checksum recorded in the trailer; `None` for a freshly-built index that
    /// hasn't been paired with a pack yet (filled in by [`Self::write`]'s caller)
    pack_checksum: Option<ObjectId>,
    /// the `.rev` file's own trailing checksum, over everything that precedes it;
    /// `None` for a freshly-built index that hasn't been through [`Self::deserialize`]
    rev_checksum: Option<ObjectId>,
}

impl RevIndex {
    pub fn new(algo: HashAlgo, positions: Vec<u32>) -> Self {
        Self { algo, positions, pack_checksum: None, rev_checksum: None }
    }

    /// builds a `.rev` from a `.idx`'s (oid, offset) pairs already sorted by oid
    /// (the order `PackIndexReader::entries` returns them in).
    pub fn from_idx_order(algo: HashAlgo, entries_by_idx_order: &[(ObjectId, u64)]) -> Self {
        let mut by_offset: Vec<usize> = (0..entries_by_idx_order.len()).collect();
        by_offset.sort_by_key(|&i| entries_by_idx_order[i].1);
        let positions = by_offset.into_iter().map(|i| i as u32).collect();
        Self { algo, positions, pack_checksum: None, rev_checksum: None }
    }

    pub fn pack_checksum(&self) -> Option<ObjectId> {
        self.pack_checksum
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// idx-order position of the object at pack-order position `pack_pos`
    pub fn idx_position_of(&self, pack_pos: u32) -> GpResult<u32> {
        self.positions
            .get(pack_pos as usize)
            .copied()
            .ok_or_else(|| anyhow!(GpError::MalformedRev(format!(
                "pack position `{}` out of range (n = {})",
                pack_pos,
                self.positions.len()
            ))))
    }

    pub fn positions(&self) -> &[u32] {
        &self.positions
    }

    /// binary search over the `.rev` positions for `pack_offset`, probing each
    /// candidate idx-order position's offset via `offset_oracle(idx_pos) ->
    /// pack_offset` — in practice the idx reader's own `offset_at` (§4.2's
    /// `lookup_index`). `on_probe`, if given, is called with every
    /// `(pack_offset, idx_pos)` the search visits on the way, letting a caller seed
    /// a cache from the intermediate probes instead of only the final hit.
    pub fn lookup_index(
        &self,
        pack_offset: u64,
        mut offset_oracle: impl FnMut(u32) -> GpResult<u64>,
        mut on_probe: impl FnMut(u64, u32),
    ) -> GpResult<(u32, bool)> {
        let mut low = 0u32;
        let mut high = self.positions.len() as u32;
        while low < high {
            let mid = low + (high - low) / 2;
            let idx_pos = self.idx_position_of(mid)?;
            let probed_offset = offset_oracle(idx_pos)?;
            on_probe(probed_offset, idx_pos);
            match probed_offset.cmp(&pack_offset) {
                std::cmp::Ordering::Equal => return Ok((idx_pos, true)),
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
            }
        }
        Ok((0, false))
    }
}

impl Deserialize for RevIndex {
    fn deserialize(reader: &mut impl BufRead) -> GpResult<Self> {
        let magic = reader.read_u32()?;
        ensure_eq!(magic, RIDX_MAGIC, GpError::MalformedRev("bad magic".into()));
        let version = reader.read_u32()?;
        ensure_eq!(version, RIDX_VERSION, GpError::UnsupportedVersion(version));
        let hash_byte = reader.read_u8()?;
        let algo = HashAlgo::from_rev_byte(hash_byte)?;

        // the trailing two checksums are exactly `2 * algo.size()` bytes; `fill_buf`
        // is required by the `BufRead` contract to report the true remaining length
        // once that's all that's left, so this correctly stops before the trailer.
        let trailer_size = 2 * algo.size();
        let mut positions = vec![];
        while reader.fill_buf()?.len() > trailer_size {
            positions.push(reader.read_u32()?);
        }

        let pack_checksum = reader.read_oid(algo)?;
        let rev_checksum = reader.read_oid(algo)?;
        trace!(
            "RevIndex::deserialize: n={} pack_checksum={} rev_checksum={}",
            positions.len(),
            pack_checksum,
            rev_checksum
        );
        Ok(Self {
            algo,
            positions,
            pack_checksum: Some(pack_checksum),
            rev_checksum: Some(rev_checksum),
        })
    }
}

impl RevIndex {
    /// like [`Deserialize::deserialize`], but fails fast with `malformed-rev` if the
    /// trailing pack checksum doesn't match the `.idx`/`.pack` pair this `.rev` is
    /// meant to describe — no positions are handed back to the caller on mismatch.
    pub fn decode_and_verify(
        reader: &mut impl BufRead,
        expected_pack_checksum: ObjectId,
    ) -> GpResult<Self> {
        let rev = Self::deserialize(reader)?;
        match rev.pack_checksum {
            Some(actual) if actual == expected_pack_checksum => Ok(rev),
            _ => Err(anyhow!(GpError::MalformedRev(
                "pack checksum recorded in .rev does not match the paired .idx/.pack".into()
            ))),
        }
    }

    /// re-hashes `file[..len - hash_size]` and compares it to the `.rev` file's own
    /// trailing checksum, then checks the pack-checksum field against
    /// `expected_pack_checksum` — both checksums must match (§4.2, invariant I7).
    /// `reader` must be positioned at the start of the `.rev` file; mirrors
    /// `PackIndexReader::validate_checksum`'s separate O(file size) re-hash pass.
    pub fn validate_checksums(
        reader: &mut impl BufReadSeek,
        expected_pack_checksum: ObjectId,
    ) -> GpResult<Self> {
        let start = reader.seek(SeekFrom::Current(0))?;
        let rev = Self::deserialize(reader)?;
        let rev_checksum = rev
            .rev_checksum
            .ok_or_else(|| anyhow!(GpError::MalformedRev("missing rev checksum".into())))?;

        let end = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(start))?;
        let trailer_start = end - rev.algo.size() as u64;
        let mut remaining = trailer_start - start;
        let mut buf = crate::pool::PooledBuf::get();

        let actual = match rev.algo {
            HashAlgo::Sha1 => {
                use sha1::Digest;
                let mut hasher = sha1::Sha1::new();
                while remaining > 0 {
                    let to_read = remaining.min(buf.len() as u64) as usize;
                    reader.read_exact(&mut buf[..to_read])?;
                    hasher.update(&buf[..to_read]);
                    remaining -= to_read as u64;
                }
                ObjectId::from_sha1_bytes(hasher.finalize().into())
            }
            HashAlgo::Sha256 => {
                use sha2::Digest;
                let mut hasher = sha2::Sha256::new();
                while remaining > 0 {
                    let to_read = remaining.min(buf.len() as u64) as usize;
                    reader.read_exact(&mut buf[..to_read])?;
                    hasher.update(&buf[..to_read]);
                    remaining -= to_read as u64;
                }
                ObjectId::from_sha256_bytes(hasher.finalize().into())
            }
        };
        ensure_eq!(actual, rev_checksum, GpError::InvalidChecksum);

        match rev.pack_checksum {
            Some(actual) if actual == expected_pack_checksum => Ok(rev),
            _ => Err(anyhow!(GpError::MalformedRev(
                "pack checksum recorded in .rev does not match the paired .idx/.pack".into()
            ))),
        }
    }

    /// serializes the `.rev` body (magic/version/hash-byte/positions) and the
    /// trailing pack/rev checksums, hashing the whole stream inline as it is written.
    pub fn write(&self, writer: &mut (impl Write + ?Sized), pack_checksum: &ObjectId) -> GpResult<()> {
        ensure_eq!(
            pack_checksum.algo(),
            self.algo,
            GpError::MalformedRev("pack checksum algorithm mismatch".into())
        );

        match self.algo {
            HashAlgo::Sha1 => {
                let mut hash_writer = crate::io::HashWriter::new_sha1(writer);
                hash_writer.write_u32(RIDX_MAGIC)?;
                hash_writer.write_u32(RIDX_VERSION)?;
                hash_writer.write_u8(self.algo.to_rev_byte())?;
                for &pos in &self.positions {
                    hash_writer.write_u32(pos)?;
                }
                hash_writer.write_oid(pack_checksum)?;
                hash_writer.write_hash()?;
            }
            HashAlgo::Sha256 => {
                let mut hash_writer = crate::io::HashWriter::new_sha256(writer);
                hash_writer.write_u32(RIDX_MAGIC)?;
                hash_writer.write_u32(RIDX_VERSION)?;
                hash_writer.write_u8(self.algo.to_rev_byte())?;
                for &pos in &self.positions {
                    hash_writer.write_u32(pos)?;
                }
                hash_writer.write_oid(pack_checksum)?;
                hash_writer.write_hash()?;
            }
        }
        Ok(())
    }
}

impl Serialize for RevIndex {
    fn serialize(&self, writer: &mut dyn Write) -> GpResult<()> {
        self.write(writer, &ObjectId::zero(self.algo))
    }
}

pub fn read_rev(reader: &mut impl BufReadSeek) -> GpResult<RevIndex> {
    RevIndex::deserialize(reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// the literal fixture from the scenario: 6 objects, pack order index `i`
    /// maps to idx-order position `[2, 0, 3, 4, 5, 1]`
    const FIXTURE_POSITIONS: [u32; 6] = [2, 0, 3, 4, 5, 1];

    fn write_fixture() -> Vec<u8> {
        let rev = RevIndex::new(HashAlgo::Sha1, FIXTURE_POSITIONS.to_vec());
        let mut out = vec![];
        rev.write(&mut out, &ObjectId::Sha1([0x11; 20])).unwrap();
        out
    }

    #[test]
    fn roundtrips_fixture_positions() {
        let bytes = write_fixture();
        let rev = RevIndex::deserialize(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(rev.positions(), &FIXTURE_POSITIONS);
        assert_eq!(rev.idx_position_of(0).unwrap(), 2);
        assert_eq!(rev.idx_position_of(5).unwrap(), 1);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = write_fixture();
        bytes[0] = 0;
        assert!(RevIndex::deserialize(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn out_of_range_position_is_an_error() {
        let rev = RevIndex::new(HashAlgo::Sha1, FIXTURE_POSITIONS.to_vec());
        assert!(rev.idx_position_of(100).is_err());
    }

    #[test]
    fn mismatched_pack_checksum_fails_before_delivering_positions() {
        let bytes = write_fixture(); // written against pack checksum [0x11; 20]
        let wrong_pack_checksum = ObjectId::Sha1([0x22; 20]);
        let err = RevIndex::decode_and_verify(&mut Cursor::new(bytes), wrong_pack_checksum);
        assert!(err.is_err());
    }

    #[test]
    fn matching_pack_checksum_decodes() {
        let bytes = write_fixture();
        let rev = RevIndex::decode_and_verify(&mut Cursor::new(bytes), ObjectId::Sha1([0x11; 20])).unwrap();
        assert_eq!(rev.positions(), &FIXTURE_POSITIONS);
    }

    #[test]
    fn validate_checksums_accepts_an_intact_file() {
        let bytes = write_fixture();
        let rev =
            RevIndex::validate_checksums(&mut Cursor::new(bytes), ObjectId::Sha1([0x11; 20])).unwrap();
        assert_eq!(rev.positions(), &FIXTURE_POSITIONS);
    }

    #[test]
    fn validate_checksums_rejects_a_corrupted_position() {
        let mut bytes = write_fixture();
        // flip a byte inside the positions table; the rev checksum no longer matches
        // a re-hash of the (now corrupted) body, even though parsing still succeeds
        let corrupt_at = 9; // first byte of the positions table, after the 9-byte header
        bytes[corrupt_at] ^= 0xff;
        let err = RevIndex::validate_checksums(&mut Cursor::new(bytes), ObjectId::Sha1([0x11; 20]));
        assert!(err.is_err());
    }

    #[test]
    fn validate_checksums_rejects_wrong_pack_checksum() {
        let bytes = write_fixture();
        let err = RevIndex::validate_checksums(&mut Cursor::new(bytes), ObjectId::Sha1([0x22; 20]));
        assert!(err.is_err());
    }

    /// idx-order position `i`'s offset, chosen so that walking pack order (via
    /// `FIXTURE_POSITIONS`) sees strictly ascending offsets, as a real `.rev`/`.idx`
    /// pair always does: pack_pos 0..6 -> offsets 0,10,20,30,40,50.
    const IDX_POS_OFFSETS: [u64; 6] = [10, 50, 0, 20, 30, 40];

    #[test]
    fn lookup_index_finds_a_pack_offset_via_binary_search() {
        let rev = RevIndex::new(HashAlgo::Sha1, FIXTURE_POSITIONS.to_vec());
        let offset_at_idx_pos = |idx_pos: u32| -> GpResult<u64> { Ok(IDX_POS_OFFSETS[idx_pos as usize]) };

        let mut probes = vec![];
        let (idx_pos, found) =
            rev.lookup_index(20, offset_at_idx_pos, |off, ip| probes.push((off, ip))).unwrap();
        assert!(found);
        assert_eq!(idx_pos, 3);
        assert!(!probes.is_empty());
    }

    #[test]
    fn lookup_index_reports_not_found_for_an_offset_outside_the_pack() {
        let rev = RevIndex::new(HashAlgo::Sha1, FIXTURE_POSITIONS.to_vec());
        let offset_at_idx_pos = |idx_pos: u32| -> GpResult<u64> { Ok(IDX_POS_OFFSETS[idx_pos as usize]) };
        let (_, found) = rev.lookup_index(9999, offset_at_idx_pos, |_, _| {}).unwrap();
        assert!(!found);
    }

    #[test]
    fn from_idx_order_matches_fixture_semantics() {
        // 6 objects at idx positions 0..6 with these on-disk offsets; the idx-order
        // position whose offset is smallest is what belongs at pack-order position 0
        let offsets = [50u64, 10, 5, 60, 70, 80];
        let entries: Vec<(ObjectId, u64)> = offsets
            .iter()
            .enumerate()
            .map(|(i, &off)| {
                let mut bytes = [0u8; 20];
                bytes[0] = i as u8;
                (ObjectId::from_sha1_bytes(bytes), off)
            })
            .collect();
        let rev = RevIndex::from_idx_order(HashAlgo::Sha1, &entries);
        // ascending offsets are idx-positions: 2 (5), 1 (10), 0 (50), 3 (60), 4 (70), 5 (80)
        assert_eq!(rev.positions(), &[2, 1, 0, 3, 4, 5]);
    }
}
