//! The cached git index (`DIRC`), versions 2-4 (§4.5). An `Index` is a sorted
//! list of [`entry::IndexEntry`] plus a set of optional trailing extensions
//! (`extensions::Extension`); [`Index::deserialize`]/[`Index::serialize`] are
//! the read/write halves of the codec, validating the trailing content hash
//! the same way [`crate::pack::rev::RevIndex`] and
//! [`crate::commitgraph::GraphFile`] do for their own formats.

pub mod entry;
pub mod ewah;
pub mod extensions;
pub mod time;

pub use entry::{ExtendedFlags, IndexEntry, Stage};
pub use extensions::Extension;
pub use time::Timespec;

use crate::error::{GpError, GpResult};
use crate::hash::{sha1_of, sha256_of, HashAlgo, ObjectId};
use crate::io::{HashWriter, ReadExt, WriteExt};
use std::io::{BufRead, Cursor, Write};

const DIRC_MAGIC: [u8; 4] = *b"DIRC";
const SUPPORTED_VERSIONS: [u32; 3] = [2, 3, 4];

#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    version: u32,
    algo: HashAlgo,
    entries: Vec<IndexEntry>,
    extensions: Vec<Extension>,
}

impl Index {
    pub fn new(version: u32, algo: HashAlgo, mut entries: Vec<IndexEntry>, extensions: Vec<Extension>) -> GpResult<Self> {
        ensure!(
            SUPPORTED_VERSIONS.contains(&version),
            GpError::UnsupportedVersion(version)
        );
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Self { version, algo, entries, extensions })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn algo(&self) -> HashAlgo {
        self.algo
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, path: &str) -> Option<&IndexEntry> {
        self.entries.binary_search_by(|e| e.path.as_str().cmp(path)).ok().map(|i| &self.entries[i])
    }

    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    pub fn tree_cache(&self) -> Option<&extensions::TreeCache> {
        self.extensions.iter().find_map(|e| match e {
            Extension::Tree(tree) => Some(tree),
            _ => None,
        })
    }

    pub fn resolve_undo(&self) -> Option<&extensions::ResolveUndo> {
        self.extensions.iter().find_map(|e| match e {
            Extension::ResolveUndo(reuc) => Some(reuc),
            _ => None,
        })
    }

    pub fn split_index(&self) -> Option<&extensions::SplitIndex> {
        self.extensions.iter().find_map(|e| match e {
            Extension::SplitIndex(link) => Some(link),
            _ => None,
        })
    }

    pub fn untracked_cache(&self) -> Option<&extensions::UntrackedCache> {
        self.extensions.iter().find_map(|e| match e {
            Extension::Untracked(untr) => Some(untr),
            _ => None,
        })
    }

    pub fn fsmonitor_cache(&self) -> Option<&extensions::FsMonitorCache> {
        self.extensions.iter().find_map(|e| match e {
            Extension::FsMonitor(fsmn) => Some(fsmn),
            _ => None,
        })
    }

    pub fn offset_table(&self) -> Option<&extensions::IndexEntryOffsetTable> {
        self.extensions.iter().find_map(|e| match e {
            Extension::OffsetTable(ieot) => Some(ieot),
            _ => None,
        })
    }

    pub fn deserialize(reader: &mut impl BufRead, algo: HashAlgo) -> GpResult<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        ensure_eq!(magic, DIRC_MAGIC, GpError::MalformedIndexFile("bad magic".into()));
        let version = reader.read_u32()?;
        ensure!(SUPPORTED_VERSIONS.contains(&version), GpError::UnsupportedVersion(version));
        let entry_count = reader.read_u32()?;

        // the reader may not support seeking; buffer the rest so extensions and the
        // trailer hash can be sliced out without re-reading (mirrors
        // `commitgraph::GraphFile::deserialize`'s treatment of a plain `BufRead`).
        let mut rest = vec![];
        reader.read_to_end(&mut rest)?;
        let hash_size = algo.size();
        ensure!(rest.len() >= hash_size, GpError::MalformedIndexFile("truncated index file".into()));
        let (body, trailer) = rest.split_at(rest.len() - hash_size);
        let trailer_hash = ObjectId::from_slice(algo, trailer)?;

        let mut hashed = Vec::with_capacity(12 + body.len());
        hashed.extend_from_slice(&magic);
        hashed.extend_from_slice(&version.to_be_bytes());
        hashed.extend_from_slice(&entry_count.to_be_bytes());
        hashed.extend_from_slice(body);
        let computed_hash = match algo {
            HashAlgo::Sha1 => sha1_of(&hashed),
            HashAlgo::Sha256 => sha256_of(&hashed),
        };
        ensure_eq!(computed_hash, trailer_hash, GpError::InvalidChecksum);

        let mut cursor = Cursor::new(body);
        let mut entries = Vec::with_capacity(entry_count as usize);
        let mut previous_name = String::new();
        for _ in 0..entry_count {
            let entry = IndexEntry::read(&mut cursor, version, algo, &previous_name)?;
            previous_name = entry.path.clone();
            entries.push(entry);
        }

        let mut extension_list = vec![];
        loop {
            let remaining = body.len() - cursor.position() as usize;
            if remaining < 8 {
                break;
            }
            let mut tag = [0u8; 4];
            cursor.read_exact(&mut tag)?;
            let length = cursor.read_u32()?;
            let mut payload = vec![0u8; length as usize];
            cursor.read_exact(&mut payload)?;
            extension_list.push(Extension::parse(tag, &payload, algo)?);
        }

        // `EOIE` is fully derivable from the other extensions (see
        // `ordered_extensions_for_encode`/`serialize`) and is always regenerated
        // fresh on encode, so it's dropped here rather than kept as logical state
        // — otherwise `decode(encode(idx)) == idx` would fail for any `idx` built
        // without one.
        extension_list.retain(|ext| !matches!(ext, Extension::EndOfIndexEntries(_)));

        Ok(Self { version, algo, entries, extensions: extension_list })
    }

    pub fn serialize(&self, writer: &mut (impl Write + ?Sized)) -> GpResult<()> {
        let mut body = vec![];
        let mut previous_name = String::new();
        for entry in &self.entries {
            entry.write(&mut body, self.version, &previous_name)?;
            previous_name = entry.path.clone();
        }
        let entries_end_offset = body.len() as u32;

        let ordered = self.ordered_extensions_for_encode();
        let mut serialized = Vec::with_capacity(ordered.len());
        for ext in ordered {
            let mut payload = vec![];
            ext.write_payload(&mut payload)?;
            serialized.push((ext.tag(), payload));
        }
        let signatures_and_sizes: Vec<([u8; 4], u32)> =
            serialized.iter().map(|(tag, payload)| (*tag, payload.len() as u32)).collect();
        let eoie = extensions::Eoie { entries_end_offset, hash: extensions::Eoie::compute_hash(self.algo, &signatures_and_sizes) };

        let mut out = vec![];
        match self.algo {
            HashAlgo::Sha1 => {
                let mut w = HashWriter::new_sha1(&mut out);
                self.write_body(&mut w, &body, &eoie, &serialized)?;
                w.write_hash()?;
            }
            HashAlgo::Sha256 => {
                let mut w = HashWriter::new_sha256(&mut out);
                self.write_body(&mut w, &body, &eoie, &serialized)?;
                w.write_hash()?;
            }
        }
        writer.write_all(&out)?;
        Ok(())
    }

    fn write_body(
        &self,
        w: &mut (impl Write + ?Sized),
        body: &[u8],
        eoie: &extensions::Eoie,
        serialized: &[([u8; 4], Vec<u8>)],
    ) -> GpResult<()> {
        w.write_all(&DIRC_MAGIC)?;
        w.write_u32(self.version)?;
        w.write_u32(self.entries.len() as u32)?;
        w.write_all(body)?;

        let mut eoie_payload = vec![];
        eoie.write(&mut eoie_payload)?;
        w.write_all(&extensions::EOIE)?;
        w.write_u32(eoie_payload.len() as u32)?;
        w.write_all(&eoie_payload)?;

        for (tag, payload) in serialized {
            w.write_all(tag)?;
            w.write_u32(payload.len() as u32)?;
            w.write_all(payload)?;
        }
        Ok(())
    }

    /// `TREE`, `link`, `UNTR`, `REUC` in that order (§4.5), then any extensions
    /// this crate doesn't interpret, in their original relative order. `EOIE`
    /// itself is excluded here since [`Self::serialize`] always regenerates it
    /// fresh from the other extensions' final signatures/sizes.
    fn ordered_extensions_for_encode(&self) -> Vec<&Extension> {
        fn priority(ext: &Extension) -> u8 {
            match ext {
                Extension::Tree(_) => 0,
                Extension::SplitIndex(_) => 1,
                Extension::Untracked(_) => 2,
                Extension::ResolveUndo(_) => 3,
                Extension::FsMonitor(_) => 4,
                Extension::OffsetTable(_) => 5,
                Extension::Unknown { .. } => 6,
                Extension::EndOfIndexEntries(_) => u8::MAX,
            }
        }
        let mut exts: Vec<&Extension> =
            self.extensions.iter().filter(|e| !matches!(e, Extension::EndOfIndexEntries(_))).collect();
        exts.sort_by_key(|e| priority(e));
        exts
    }
}

impl Extension {
    fn write_payload(&self, payload: &mut Vec<u8>) -> GpResult<()> {
        match self {
            Extension::Tree(ext) => ext.write(payload),
            Extension::ResolveUndo(ext) => ext.write(payload),
            Extension::EndOfIndexEntries(ext) => ext.write(payload),
            Extension::SplitIndex(ext) => ext.write(payload),
            Extension::Untracked(ext) => ext.write(payload),
            Extension::FsMonitor(ext) => ext.write(payload),
            Extension::OffsetTable(ext) => ext.write(payload),
            Extension::Unknown { data, .. } => {
                payload.extend_from_slice(data);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obj::FileMode;

    fn sample_entry(path: &str) -> IndexEntry {
        IndexEntry {
            ctime: Timespec::new(1000, 0),
            mtime: Timespec::new(1000, 0),
            dev: 1,
            ino: 2,
            mode: FileMode::Reg,
            uid: 0,
            gid: 0,
            size: 123,
            oid: ObjectId::from_sha1_bytes([0x42; 20]),
            assume_valid: false,
            stage: Stage::None,
            extended: None,
            path: path.to_owned(),
        }
    }

    #[test]
    fn roundtrips_v2_with_tree_extension() {
        let entries = vec![sample_entry("bar"), sample_entry("foo")];
        let tree = extensions::TreeCache {
            root: extensions::tree::TreeCacheNode {
                path: String::new(),
                entry_count: 2,
                oid: Some(ObjectId::from_sha1_bytes([0x11; 20])),
                children: vec![],
            },
        };
        let index =
            Index::new(2, HashAlgo::Sha1, entries, vec![Extension::Tree(tree)]).unwrap();
        let mut buf = vec![];
        index.serialize(&mut buf).unwrap();
        let decoded = Index::deserialize(&mut Cursor::new(buf), HashAlgo::Sha1).unwrap();
        assert_eq!(decoded, index);
        assert!(decoded.tree_cache().is_some());
        assert_eq!(decoded.find("foo").unwrap().path, "foo");
    }

    #[test]
    fn roundtrips_v4_name_compression_scenario() {
        // literal scenario-4 fixture: shared "baz/bar" prefix across two entries
        let paths = [" ".repeat(20), "bar".to_owned(), "baz/bar".to_owned(), "baz/bar/bar".to_owned(), "foo".to_owned()];
        let entries: Vec<_> = paths.iter().map(|p| sample_entry(p)).collect();
        let index = Index::new(4, HashAlgo::Sha1, entries, vec![]).unwrap();
        let mut buf = vec![];
        index.serialize(&mut buf).unwrap();
        let decoded = Index::deserialize(&mut Cursor::new(buf), HashAlgo::Sha1).unwrap();
        let mut decoded_paths: Vec<_> = decoded.entries().iter().map(|e| e.path.clone()).collect();
        decoded_paths.sort();
        let mut expected = paths.to_vec();
        expected.sort();
        assert_eq!(decoded_paths, expected);
    }

    #[test]
    fn rejects_bad_magic() {
        let index = Index::new(2, HashAlgo::Sha1, vec![sample_entry("a")], vec![]).unwrap();
        let mut buf = vec![];
        index.serialize(&mut buf).unwrap();
        buf[0] = 0;
        assert!(Index::deserialize(&mut Cursor::new(buf), HashAlgo::Sha1).is_err());
    }

    #[test]
    fn rejects_trailer_hash_mismatch() {
        let index = Index::new(2, HashAlgo::Sha1, vec![sample_entry("a")], vec![]).unwrap();
        let mut buf = vec![];
        index.serialize(&mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xff;
        assert!(Index::deserialize(&mut Cursor::new(buf), HashAlgo::Sha1).is_err());
    }

    #[test]
    fn rejects_unsupported_version() {
        assert!(Index::new(5, HashAlgo::Sha1, vec![], vec![]).is_err());
    }
}
