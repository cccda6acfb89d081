//! The `.idx` v2 reader (§4.1, `ReaderAtIndex`). Construction caches the header and
//! the full 256-entry fanout table (1 KiB); every other lookup is a pure seek+read
//! against byte ranges computed from that cache.

use crate::error::{GpError, GpResult, GpResultExt};
use crate::hash::{HashAlgo, ObjectId};
use crate::io::*;
use crate::serialize::BufReadSeek;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::ToPrimitive;
use rustc_hash::FxHashMap;
use std::io::{BufRead, Read, Seek, SeekFrom};
use std::ops::{Deref, DerefMut};

pub(crate) const PACK_IDX_MAGIC: u32 = 0xff744f63;
const FANOUT_ENTRYC: usize = 256;
const FANOUT_ENTRY_SIZE: u64 = 4;
const FANOUT_SIZE: u64 = FANOUT_ENTRYC as u64 * FANOUT_ENTRY_SIZE;
const PACK_IDX_HEADER_SIZE: u64 = 8;
const CRC_SIZE: u64 = 4;
const OFFSET_SIZE: u64 = 4;
const EXT_OFFSET_SIZE: u64 = 8;
/// maximum 31-bit offset; the MSB set means "redirect into the 64-bit ext layer"
pub(crate) const MAX_OFFSET: u64 = 0x7fffffff;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, FromPrimitive, ToPrimitive)]
enum Layer {
    Oid = 0,
    Crc = 1,
    Ofs = 2,
    Ext = 3,
}

pub struct PackIndexReader<R> {
    reader: R,
    fanout: [u32; FANOUT_ENTRYC],
    oid_cache: FxHashMap<u64, Vec<ObjectId>>,
    crc_offset_cache: FxHashMap<ObjectId, (u32, u64)>,
    /// lazily-built full reverse lookup for [`Self::find_hash`]; `None` until the
    /// first offset→oid lookup, since most callers never need it (§4.1)
    offset_to_oid: Option<FxHashMap<u64, ObjectId>>,
    /// total number of objects (`fanout[255]`)
    n: u64,
}

impl<R: BufReadSeek> PackIndexReader<R> {
    pub fn new(mut reader: R) -> GpResult<Self> {
        parse_header(&mut reader)?;
        let fanout = reader.read_array::<u32, FANOUT_ENTRYC>()?;
        for i in 1..FANOUT_ENTRYC {
            ensure!(
                fanout[i - 1] <= fanout[i],
                GpError::MalformedIdx("fanout table is not monotonic".into())
            );
        }
        let n = fanout[FANOUT_ENTRYC - 1] as u64;
        ensure!(n <= MAX_OFFSET, GpError::MalformedIdx("fanout[255] exceeds 2^31 - 1".into()));
        trace!("PackIndexReader::new: {} objects", n);
        Ok(Self {
            reader,
            fanout,
            n,
            oid_cache: Default::default(),
            crc_offset_cache: Default::default(),
            offset_to_oid: None,
        })
    }

    pub fn count(&self) -> u64 {
        self.n
    }

    pub fn contains(&mut self, oid: ObjectId) -> GpResult<bool> {
        match self.find_oid_index(oid) {
            Ok(..) => Ok(true),
            Err(err) if err.is_not_found_err() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// returns the offset of the object with oid `oid` in the packfile
    pub fn find_offset(&mut self, oid: ObjectId) -> GpResult<u64> {
        self.find_oid_crc_offset(oid).map(|(_, offset)| offset)
    }

    pub fn find_crc32(&mut self, oid: ObjectId) -> GpResult<u32> {
        self.find_oid_crc_offset(oid).map(|(crc, _)| crc)
    }

    pub fn find_oid_crc_offset(&mut self, oid: ObjectId) -> GpResult<(u32, u64)> {
        match self.crc_offset_cache.get(&oid) {
            Some(&crc_offset) => Ok(crc_offset),
            None => {
                let crc_offset = self.find_oid_crc_offset_inner(oid)?;
                self.crc_offset_cache.insert(oid, crc_offset);
                Ok(crc_offset)
            }
        }
    }

    fn find_oid_crc_offset_inner(&mut self, oid: ObjectId) -> GpResult<(u32, u64)> {
        trace!("PackIndexReader::find_oid_crc_offset({})", oid);
        let index = self.find_oid_index(oid)?;
        debug_assert_eq!(oid, self.read_oid_at(index)?);
        let crc = self.read_from::<u32>(Layer::Crc, index)?;
        let mut offset = self.read_from::<u32>(Layer::Ofs, index)? as u64;

        if offset > MAX_OFFSET {
            let ext_index = offset & MAX_OFFSET;
            offset = self.read_from(Layer::Ext, ext_index)?;
        }

        trace!("PackIndexReader::find_oid_crc_offset -> (crc={}, offset={})", crc, offset);
        Ok((crc, offset))
    }

    fn offset_of(&self, layer: Layer, index: u64) -> u64 {
        debug_assert!(layer < Layer::Ext);
        const SIZE: [u64; 4] = [20, CRC_SIZE, OFFSET_SIZE, EXT_OFFSET_SIZE];
        let layer_idx = layer.to_usize().unwrap();
        let base = PACK_IDX_HEADER_SIZE
            + FANOUT_SIZE
            + (0..layer_idx).map(|l| SIZE[l] * self.n).sum::<u64>();
        base + index * SIZE[layer_idx]
    }

    fn read_from<T: crate::serialize::Deserialize>(
        &mut self,
        layer: Layer,
        index: u64,
    ) -> GpResult<T> {
        let offset = self.offset_of(layer, index);
        self.seek(SeekFrom::Start(offset))?;
        self.read_type()
    }

    pub fn oid_at(&mut self, index: u64) -> GpResult<ObjectId> {
        self.read_oid_at(index)
    }

    fn read_oid_at(&mut self, index: u64) -> GpResult<ObjectId> {
        let offset = self.offset_of(Layer::Oid, index);
        self.seek(SeekFrom::Start(offset))?;
        self.read_oid(HashAlgo::Sha1).map_err(Into::into)
    }

    pub fn offset_at(&mut self, index: u64) -> GpResult<u64> {
        let mut offset = self.read_from::<u32>(Layer::Ofs, index)? as u64;
        if offset > MAX_OFFSET {
            let ext_index = offset & MAX_OFFSET;
            offset = self.read_from(Layer::Ext, ext_index)?;
        }
        Ok(offset)
    }

    /// reverse lookup, offset -> oid (§4.1); builds a one-shot full `offset -> oid`
    /// map on first call (every entry's oid and offset both have to be read once
    /// regardless of which offset is being looked up), then serves every further
    /// call from that cache.
    pub fn find_hash(&mut self, offset: u64) -> GpResult<ObjectId> {
        if self.offset_to_oid.is_none() {
            let mut map = FxHashMap::default();
            map.reserve(self.n as usize);
            for i in 0..self.n {
                let oid = self.read_oid_at(i)?;
                let off = self.offset_at(i)?;
                map.insert(off, oid);
            }
            self.offset_to_oid = Some(map);
        }
        self.offset_to_oid
            .as_ref()
            .unwrap()
            .get(&offset)
            .copied()
            .ok_or_else(|| anyhow!(GpError::OffsetNotFound(offset)))
    }

    /// iterator over every oid/offset pair in oid-sorted order
    pub fn entries(&mut self) -> GpResult<Vec<(ObjectId, u64)>> {
        let mut out = Vec::with_capacity(self.n as usize);
        for i in 0..self.n {
            let oid = self.read_oid_at(i)?;
            let offset = self.offset_at(i)?;
            out.push((oid, offset));
        }
        Ok(out)
    }

    /// same pairs, ordered by ascending pack offset (used to ground the `.rev` encoder)
    pub fn entries_by_offset(&mut self) -> GpResult<Vec<(ObjectId, u64)>> {
        let mut entries = self.entries()?;
        entries.sort_by_key(|&(_, offset)| offset);
        Ok(entries)
    }

    /// find the offset-sorted rank of `oid` (used by the `.rev` encoder)
    pub fn rank_by_offset(&mut self, oid: ObjectId) -> GpResult<usize> {
        let entries = self.entries_by_offset()?;
        entries
            .iter()
            .position(|&(o, _)| o == oid)
            .ok_or_else(|| anyhow!(GpError::ObjectNotFound(oid)))
    }

    /// returns the index (unit = entry count, not byte offset) of `oid` in the sorted oid array
    fn find_oid_index(&mut self, oid: ObjectId) -> GpResult<u64> {
        let prefix = oid.as_bytes()[0] as usize;
        let low = if prefix == 0 { 0 } else { self.fanout[prefix - 1] } as u64;
        let high = self.fanout[prefix] as u64;

        if !self.oid_cache.contains_key(&low) {
            self.seek(SeekFrom::Start(PACK_IDX_HEADER_SIZE + FANOUT_SIZE + low * 20))?;
            let oids: Vec<ObjectId> = (0..(high - low))
                .map(|_| self.read_oid(HashAlgo::Sha1).map_err(Into::into))
                .collect::<GpResult<_>>()?;
            self.oid_cache.insert(low, oids);
        }

        let oids = &self.oid_cache[&low];
        match oids.binary_search(&oid) {
            Ok(idx) => Ok(low + idx as u64),
            Err(idx) => Err(anyhow!(GpError::ObjectNotFoundInIndex(oid, low + idx as u64))),
        }
    }

    /// validates the trailing pack/idx checksums against a re-hash of the whole file;
    /// separated from construction because it is O(file size), per §4.2's analogous note.
    pub fn validate_checksum(&mut self) -> GpResult<()> {
        self.seek(SeekFrom::Start(0))?;
        let mut hasher = sha1::Sha1::new();
        use sha1::Digest;
        let end = self.stream_len()?;
        let trailer_start = end - 20;
        let mut remaining = trailer_start;
        let mut buf = crate::pool::PooledBuf::get();
        while remaining > 0 {
            let to_read = remaining.min(buf.len() as u64) as usize;
            self.read_exact(&mut buf[..to_read])?;
            hasher.update(&buf[..to_read]);
            remaining -= to_read as u64;
        }
        let actual: ObjectId = ObjectId::from_sha1_bytes(hasher.finalize().into());
        let expected = self.read_oid(HashAlgo::Sha1)?;
        ensure_eq!(actual, expected, GpError::InvalidChecksum);
        Ok(())
    }

    fn stream_len(&mut self) -> GpResult<u64> {
        let pos = self.seek(SeekFrom::Current(0))?;
        let end = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(pos))?;
        Ok(end)
    }
}

impl<R> Deref for PackIndexReader<R> {
    type Target = R;

    fn deref(&self) -> &Self::Target {
        &self.reader
    }
}

impl<R> DerefMut for PackIndexReader<R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.reader
    }
}

fn parse_header(mut reader: impl BufRead) -> GpResult<()> {
    let magic = reader.read_u32()?;
    ensure_eq!(magic, PACK_IDX_MAGIC, GpError::MalformedIdx("bad magic".into()));
    let version = reader.read_u32()?;
    ensure_eq!(version, 2, GpError::UnsupportedVersion(version));
    Ok(())
}
