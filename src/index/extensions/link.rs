//! `link` extension: split-index support. A "shared" index holds the bulk of
//! the entries; a small "split" index layered on top of it names the shared
//! index by hash and records which of its entries are deleted or replaced,
//! as two bitmaps positional against the shared index's entry order.

use crate::error::GpResult;
use crate::hash::{HashAlgo, ObjectId};
use crate::index::ewah::EwahBitmap;
use crate::io::ReadExt;
use std::io::{BufRead, Write};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndex {
    pub base_oid: ObjectId,
    /// bit `i` set means the shared index's entry `i` is deleted
    pub deleted: EwahBitmap,
    /// bit `i` set means the shared index's entry `i` is replaced by one
    /// carried in this split index's own entry list
    pub replaced: EwahBitmap,
}

impl SplitIndex {
    pub fn parse(data: &[u8], algo: HashAlgo) -> GpResult<Self> {
        let mut cursor = std::io::Cursor::new(data);
        let base_oid = cursor.read_oid(algo)?;
        let deleted = EwahBitmap::read(&mut cursor)?;
        let replaced = EwahBitmap::read(&mut cursor)?;
        Ok(Self { base_oid, deleted, replaced })
    }

    pub fn write(&self, w: &mut (impl Write + ?Sized)) -> GpResult<()> {
        w.write_all(self.base_oid.as_bytes())?;
        self.deleted.write(w)?;
        self.replaced.write(w)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_base_and_bitmaps() {
        let split = SplitIndex {
            base_oid: ObjectId::from_sha1_bytes([0x77; 20]),
            deleted: EwahBitmap::from_set_bits(10, [2, 7]),
            replaced: EwahBitmap::from_set_bits(10, [0]),
        };
        let mut buf = vec![];
        split.write(&mut buf).unwrap();
        assert_eq!(SplitIndex::parse(&buf, HashAlgo::Sha1).unwrap(), split);
    }
}
