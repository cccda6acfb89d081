//! Index extension table: `{tag:4}{length:u32}{payload}` records trailing the
//! entries list. An uppercase first tag byte marks the extension optional (an
//! unrecognized one is kept around as an opaque blob); lowercase marks it
//! mandatory, and an unrecognized mandatory extension is a decode error.

pub mod eoie;
pub mod fsmonitor;
pub mod ieot;
pub mod link;
pub mod reuc;
pub mod tree;
pub mod untracked;

pub use eoie::Eoie;
pub use fsmonitor::FsMonitorCache;
pub use ieot::IndexEntryOffsetTable;
pub use link::SplitIndex;
pub use reuc::ResolveUndo;
pub use tree::TreeCache;
pub use untracked::UntrackedCache;

use crate::error::{GpError, GpResult};
use crate::hash::HashAlgo;
use crate::io::WriteExt;
use std::io::Write;

pub const TREE: [u8; 4] = *b"TREE";
pub const REUC: [u8; 4] = *b"REUC";
pub const EOIE: [u8; 4] = *b"EOIE";
pub const LINK: [u8; 4] = *b"link";
pub const UNTR: [u8; 4] = *b"UNTR";
pub const FSMN: [u8; 4] = *b"FSMN";
pub const IEOT: [u8; 4] = *b"IEOT";

#[derive(Debug, Clone, PartialEq)]
pub enum Extension {
    Tree(TreeCache),
    ResolveUndo(ResolveUndo),
    EndOfIndexEntries(Eoie),
    SplitIndex(SplitIndex),
    Untracked(UntrackedCache),
    FsMonitor(FsMonitorCache),
    OffsetTable(IndexEntryOffsetTable),
    /// an optional extension (uppercase tag) this crate doesn't interpret;
    /// preserved verbatim so re-encoding doesn't lose it
    Unknown { tag: [u8; 4], data: Vec<u8> },
}

impl Extension {
    pub fn tag(&self) -> [u8; 4] {
        match self {
            Extension::Tree(_) => TREE,
            Extension::ResolveUndo(_) => REUC,
            Extension::EndOfIndexEntries(_) => EOIE,
            Extension::SplitIndex(_) => LINK,
            Extension::Untracked(_) => UNTR,
            Extension::FsMonitor(_) => FSMN,
            Extension::OffsetTable(_) => IEOT,
            Extension::Unknown { tag, .. } => *tag,
        }
    }

    pub fn parse(tag: [u8; 4], data: &[u8], algo: HashAlgo) -> GpResult<Self> {
        let parsed = if tag == TREE {
            Some(Extension::Tree(TreeCache::parse(data, algo)?))
        } else if tag == REUC {
            Some(Extension::ResolveUndo(ResolveUndo::parse(data, algo)?))
        } else if tag == EOIE {
            Some(Extension::EndOfIndexEntries(Eoie::parse(data, algo)?))
        } else if tag == LINK {
            Some(Extension::SplitIndex(SplitIndex::parse(data, algo)?))
        } else if tag == UNTR {
            Some(Extension::Untracked(UntrackedCache::parse(data, algo)?))
        } else if tag == FSMN {
            Some(Extension::FsMonitor(FsMonitorCache::parse(data)?))
        } else if tag == IEOT {
            Some(Extension::OffsetTable(IndexEntryOffsetTable::parse(data)?))
        } else {
            None
        };

        match parsed {
            Some(ext) => Ok(ext),
            None if tag[0].is_ascii_uppercase() => Ok(Extension::Unknown { tag, data: data.to_vec() }),
            None => Err(anyhow!(GpError::UnknownMandatoryExtension(tag))),
        }
    }

    pub fn write(&self, w: &mut (impl Write + ?Sized)) -> GpResult<()> {
        let mut payload = vec![];
        match self {
            Extension::Tree(ext) => ext.write(&mut payload)?,
            Extension::ResolveUndo(ext) => ext.write(&mut payload)?,
            Extension::EndOfIndexEntries(ext) => ext.write(&mut payload)?,
            Extension::SplitIndex(ext) => ext.write(&mut payload)?,
            Extension::Untracked(ext) => ext.write(&mut payload)?,
            Extension::FsMonitor(ext) => ext.write(&mut payload)?,
            Extension::OffsetTable(ext) => ext.write(&mut payload)?,
            Extension::Unknown { data, .. } => payload = data.clone(),
        }
        w.write_all(&self.tag())?;
        w.write_u32(payload.len() as u32)?;
        w.write_all(&payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_optional_extension_is_preserved() {
        let ext = Extension::Unknown { tag: *b"Xqqq", data: vec![1, 2, 3] };
        let mut buf = vec![];
        ext.write(&mut buf).unwrap();
        let tag = [buf[0], buf[1], buf[2], buf[3]];
        let parsed = Extension::parse(tag, &buf[8..], HashAlgo::Sha1).unwrap();
        assert_eq!(parsed, ext);
    }

    #[test]
    fn unknown_mandatory_extension_is_an_error() {
        assert!(Extension::parse(*b"xqqq", &[], HashAlgo::Sha1).is_err());
    }
}
