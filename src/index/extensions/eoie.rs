//! `EOIE` extension: records where the variable-length entries end, so a
//! reader can jump straight to the extension table without walking every
//! entry first. Written ahead of the other extensions; its hash commits to
//! their signatures and sizes (not their payload bytes) so it can be computed
//! before those extensions are serialized onto the wire.

use crate::error::GpResult;
use crate::hash::{sha1_of, sha256_of, HashAlgo, ObjectId};
use crate::io::{ReadExt, WriteExt};
use std::io::{BufRead, Write};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eoie {
    pub entries_end_offset: u32,
    pub hash: ObjectId,
}

impl Eoie {
    pub fn parse(data: &[u8], algo: HashAlgo) -> GpResult<Self> {
        let mut cursor = std::io::Cursor::new(data);
        let entries_end_offset = cursor.read_u32()?;
        let hash = cursor.read_oid(algo)?;
        Ok(Self { entries_end_offset, hash })
    }

    pub fn write(&self, w: &mut (impl Write + ?Sized)) -> GpResult<()> {
        w.write_u32(self.entries_end_offset)?;
        w.write_oid(&self.hash)?;
        Ok(())
    }

    /// hashes the concatenation of each following extension's `{tag}{size}`,
    /// in write order, the same way the reference format does.
    pub fn compute_hash(algo: HashAlgo, following: &[([u8; 4], u32)]) -> ObjectId {
        let mut buf = vec![];
        for (tag, len) in following {
            buf.extend_from_slice(tag);
            buf.extend_from_slice(&len.to_be_bytes());
        }
        match algo {
            HashAlgo::Sha1 => sha1_of(&buf),
            HashAlgo::Sha256 => sha256_of(&buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_order_sensitive() {
        let a = Eoie::compute_hash(HashAlgo::Sha1, &[(*b"TREE", 10), (*b"REUC", 20)]);
        let b = Eoie::compute_hash(HashAlgo::Sha1, &[(*b"REUC", 20), (*b"TREE", 10)]);
        assert_ne!(a, b);
    }

    #[test]
    fn roundtrips() {
        let eoie = Eoie { entries_end_offset: 4096, hash: sha1_of(b"anything") };
        let mut buf = vec![];
        eoie.write(&mut buf).unwrap();
        assert_eq!(Eoie::parse(&buf, HashAlgo::Sha1).unwrap(), eoie);
    }
}
