//! `UNTR` extension: a cache of each directory's untracked files, so status
//! scans can skip re-reading directories whose stat data hasn't changed.
//! Nested directories are stored as a recursive tree; three bitmaps over that
//! tree's directories (in depth-first write order) record which ones are
//! still valid, which must be re-stat'd-only (not re-scanned), and which carry
//! recorded filesystem metadata.

use crate::error::GpResult;
use crate::index::ewah::EwahBitmap;
use crate::index::time::Timespec;
use crate::io::{BufReadExt, ReadExt, WriteExt};
use std::io::{BufRead, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirStat {
    pub mtime: Timespec,
    pub size: u32,
}

impl DirStat {
    fn read(r: &mut impl BufRead) -> GpResult<Self> {
        Ok(Self { mtime: Timespec::read(r)?, size: r.read_u32()? })
    }

    fn write(&self, w: &mut (impl Write + ?Sized)) -> GpResult<()> {
        self.mtime.write(w)?;
        w.write_u32(self.size)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UntrackedDir {
    pub name: String,
    pub stat: DirStat,
    pub untracked: Vec<String>,
    pub children: Vec<UntrackedDir>,
}

impl UntrackedDir {
    fn read(r: &mut impl BufRead) -> GpResult<Self> {
        let stat = DirStat::read(r)?;
        let untracked_count = r.read_offset()?;
        let subdir_count = r.read_offset()?;
        let name = r.read_null_terminated_string()?;
        let untracked =
            (0..untracked_count).map(|_| r.read_null_terminated_string()).collect::<GpResult<_>>()?;
        let children = (0..subdir_count).map(|_| UntrackedDir::read(r)).collect::<GpResult<_>>()?;
        Ok(Self { name, stat, untracked, children })
    }

    fn write(&self, w: &mut (impl Write + ?Sized)) -> GpResult<()> {
        self.stat.write(w)?;
        w.write_offset_varint(self.untracked.len() as u64)?;
        w.write_offset_varint(self.children.len() as u64)?;
        w.write_null_terminated(self.name.as_bytes())?;
        for name in &self.untracked {
            w.write_null_terminated(name.as_bytes())?;
        }
        for child in &self.children {
            child.write(w)?;
        }
        Ok(())
    }

    fn count_dirs(&self) -> u32 {
        1 + self.children.iter().map(UntrackedDir::count_dirs).sum::<u32>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UntrackedCache {
    /// stat signatures of `info/exclude`, `core.excludesfile`, and the
    /// per-directory `.gitignore`, used to invalidate the whole cache when any
    /// of them changes
    pub identifiers: Vec<String>,
    pub root: UntrackedDir,
    /// one bit per directory (depth-first, root first): still valid
    pub valid: EwahBitmap,
    /// one bit per directory: needs a stat check but not a full re-scan
    pub check_only: EwahBitmap,
    /// one bit per directory: has recorded metadata worth trusting
    pub has_metadata: EwahBitmap,
}

impl UntrackedCache {
    pub fn parse(data: &[u8], _algo: crate::hash::HashAlgo) -> GpResult<Self> {
        let mut cursor = std::io::Cursor::new(data);
        let identifier_count = cursor.read_offset()?;
        let identifiers = (0..identifier_count)
            .map(|_| cursor.read_null_terminated_string())
            .collect::<GpResult<_>>()?;
        let root = UntrackedDir::read(&mut cursor)?;
        let valid = EwahBitmap::read(&mut cursor)?;
        let check_only = EwahBitmap::read(&mut cursor)?;
        let has_metadata = EwahBitmap::read(&mut cursor)?;
        Ok(Self { identifiers, root, valid, check_only, has_metadata })
    }

    pub fn write(&self, w: &mut (impl Write + ?Sized)) -> GpResult<()> {
        w.write_offset_varint(self.identifiers.len() as u64)?;
        for id in &self.identifiers {
            w.write_null_terminated(id.as_bytes())?;
        }
        self.root.write(w)?;
        self.valid.write(w)?;
        self.check_only.write(w)?;
        self.has_metadata.write(w)?;
        Ok(())
    }

    pub fn dir_count(&self) -> u32 {
        self.root.count_dirs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgo;

    fn sample() -> UntrackedCache {
        let child = UntrackedDir {
            name: "src".into(),
            stat: DirStat { mtime: Timespec::new(10, 0), size: 64 },
            untracked: vec!["scratch.rs".into()],
            children: vec![],
        };
        let root = UntrackedDir {
            name: String::new(),
            stat: DirStat { mtime: Timespec::new(20, 0), size: 128 },
            untracked: vec!["TODO".into()],
            children: vec![child],
        };
        UntrackedCache {
            identifiers: vec![".gitignore-sig".into()],
            root,
            valid: EwahBitmap::from_set_bits(2, [0, 1]),
            check_only: EwahBitmap::from_set_bits(2, [1]),
            has_metadata: EwahBitmap::from_set_bits(2, []),
        }
    }

    #[test]
    fn roundtrips_nested_directories() {
        let cache = sample();
        let mut buf = vec![];
        cache.write(&mut buf).unwrap();
        let decoded = UntrackedCache::parse(&buf, HashAlgo::Sha1).unwrap();
        assert_eq!(decoded, cache);
        assert_eq!(decoded.dir_count(), 2);
    }
}
