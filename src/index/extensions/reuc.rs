//! `REUC` extension: per-path "resolve undo" data, recording the pre-merge
//! stage-1/2/3 modes and blob hashes so `git checkout -m` can reconstruct a
//! conflict after it's been resolved in the index.

use crate::error::GpResult;
use crate::hash::{HashAlgo, ObjectId};
use crate::io::{BufReadExt, ReadExt, WriteExt};
use std::io::{BufRead, Write};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveUndoEntry {
    pub path: String,
    /// one mode per stage (1=ours, 2=theirs, 3=merged); 0 means that stage
    /// was never recorded for this path
    pub modes: [u32; 3],
    pub oids: [Option<ObjectId>; 3],
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolveUndo {
    pub entries: Vec<ResolveUndoEntry>,
}

impl ResolveUndo {
    pub fn parse(data: &[u8], algo: HashAlgo) -> GpResult<Self> {
        let mut cursor = std::io::Cursor::new(data);
        let mut entries = vec![];
        while !cursor.is_at_eof()? {
            let path = cursor.read_null_terminated_string()?;
            let mut modes = [0u32; 3];
            for mode in modes.iter_mut() {
                *mode = cursor.read_octal_num(0)?;
            }
            let mut oids = [None, None, None];
            for (stage, oid) in oids.iter_mut().enumerate() {
                if modes[stage] != 0 {
                    *oid = Some(cursor.read_oid(algo)?);
                }
            }
            entries.push(ResolveUndoEntry { path, modes, oids });
        }
        Ok(Self { entries })
    }

    pub fn write(&self, w: &mut (impl Write + ?Sized)) -> GpResult<()> {
        for entry in &self.entries {
            w.write_null_terminated(entry.path.as_bytes())?;
            for mode in entry.modes {
                w.write_octal_num(mode, 0)?;
            }
            for oid in entry.oids.iter().flatten() {
                w.write_oid(oid)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_a_conflicted_and_clean_path() {
        let reuc = ResolveUndo {
            entries: vec![
                ResolveUndoEntry {
                    path: "conflict.txt".into(),
                    modes: [0o100644, 0o100644, 0o100644],
                    oids: [
                        Some(ObjectId::from_sha1_bytes([1; 20])),
                        Some(ObjectId::from_sha1_bytes([2; 20])),
                        Some(ObjectId::from_sha1_bytes([3; 20])),
                    ],
                },
                ResolveUndoEntry {
                    path: "only-ours.txt".into(),
                    modes: [0o100644, 0, 0],
                    oids: [Some(ObjectId::from_sha1_bytes([4; 20])), None, None],
                },
            ],
        };
        let mut buf = vec![];
        reuc.write(&mut buf).unwrap();
        assert_eq!(ResolveUndo::parse(&buf, HashAlgo::Sha1).unwrap(), reuc);
    }
}
