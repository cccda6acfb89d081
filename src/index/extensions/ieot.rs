//! `IEOT` extension: an index into the entries table, letting a reader split
//! the entry list across worker threads without a sequential scan to find
//! the split points first.

use crate::error::GpResult;
use crate::io::{BufReadExt, ReadExt, WriteExt};
use std::io::{BufRead, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetTableEntry {
    /// byte offset, relative to the start of the entries table, of this block
    pub offset: u32,
    /// number of entries in this block
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntryOffsetTable {
    pub version: u32,
    pub blocks: Vec<OffsetTableEntry>,
}

impl IndexEntryOffsetTable {
    pub fn parse(data: &[u8]) -> GpResult<Self> {
        let mut cursor = std::io::Cursor::new(data);
        let version = cursor.read_u32()?;
        let mut blocks = vec![];
        while !cursor.is_at_eof()? {
            let offset = cursor.read_u32()?;
            let count = cursor.read_u32()?;
            blocks.push(OffsetTableEntry { offset, count });
        }
        Ok(Self { version, blocks })
    }

    pub fn write(&self, w: &mut (impl Write + ?Sized)) -> GpResult<()> {
        w.write_u32(self.version)?;
        for block in &self.blocks {
            w.write_u32(block.offset)?;
            w.write_u32(block.count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_multiple_blocks() {
        let table = IndexEntryOffsetTable {
            version: 1,
            blocks: vec![OffsetTableEntry { offset: 0, count: 100 }, OffsetTableEntry { offset: 6200, count: 50 }],
        };
        let mut buf = vec![];
        table.write(&mut buf).unwrap();
        assert_eq!(IndexEntryOffsetTable::parse(&buf).unwrap(), table);
    }
}
