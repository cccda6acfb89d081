//! A single `DIRC` entry: the 62-byte fixed stat/mode/oid body, an optional v3+
//! extended-flags word, and the name (encoded differently per version — see
//! [`read_name`]/[`write_name`]).

use crate::error::{GpError, GpResult};
use crate::hash::{HashAlgo, ObjectId};
use crate::index::time::Timespec;
use crate::io::{ReadExt, WriteExt};
use crate::obj::FileMode;
use std::io::{BufRead, Write};

/// merge stage recorded in an entry's flags; `None` means "not conflicted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    None,
    Ours,
    Theirs,
    Merged,
}

impl Stage {
    fn from_bits(bits: u16) -> Self {
        match bits {
            0 => Stage::None,
            1 => Stage::Ours,
            2 => Stage::Theirs,
            3 => Stage::Merged,
            _ => unreachable!("stage is masked to 2 bits"),
        }
    }

    fn to_bits(self) -> u16 {
        match self {
            Stage::None => 0,
            Stage::Ours => 1,
            Stage::Theirs => 2,
            Stage::Merged => 3,
        }
    }

    pub fn is_conflicted(self) -> bool {
        self != Stage::None
    }
}

const ASSUME_VALID_BIT: u16 = 1 << 15;
const EXTENDED_BIT: u16 = 1 << 14;
const STAGE_MASK: u16 = 0x3000;
const NAME_LEN_MASK: u16 = 0x0FFF;
const NAME_LEN_OVERFLOW: u16 = 0x0FFF;

const SKIP_WORKTREE_BIT: u16 = 1 << 14;
const INTENT_TO_ADD_BIT: u16 = 1 << 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtendedFlags {
    pub skip_worktree: bool,
    pub intent_to_add: bool,
}

impl ExtendedFlags {
    fn from_bits(bits: u16) -> Self {
        Self { skip_worktree: bits & SKIP_WORKTREE_BIT != 0, intent_to_add: bits & INTENT_TO_ADD_BIT != 0 }
    }

    fn to_bits(self) -> u16 {
        let mut bits = 0;
        if self.skip_worktree {
            bits |= SKIP_WORKTREE_BIT;
        }
        if self.intent_to_add {
            bits |= INTENT_TO_ADD_BIT;
        }
        bits
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub ctime: Timespec,
    pub mtime: Timespec,
    pub dev: u32,
    pub ino: u32,
    pub mode: FileMode,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
    pub oid: ObjectId,
    pub assume_valid: bool,
    pub stage: Stage,
    pub extended: Option<ExtendedFlags>,
    pub path: String,
}

impl IndexEntry {
    fn flags_word(&self) -> u16 {
        let mut flags = 0u16;
        if self.assume_valid {
            flags |= ASSUME_VALID_BIT;
        }
        if self.extended.is_some() {
            flags |= EXTENDED_BIT;
        }
        flags |= self.stage.to_bits() << 12;
        flags |= (self.path.len() as u16).min(NAME_LEN_OVERFLOW) & NAME_LEN_MASK;
        flags
    }

    /// size of the fixed (non-name) part of this entry, in the given format
    /// version: 62 bytes, plus 2 more if a v3+ extended-flags word is present.
    fn fixed_len(&self, version: u32) -> usize {
        62 + if version >= 3 && self.extended.is_some() { 2 } else { 0 }
    }

    pub fn read(
        r: &mut impl BufRead,
        version: u32,
        algo: HashAlgo,
        previous_name: &str,
    ) -> GpResult<Self> {
        let ctime = Timespec::read(r)?;
        let mtime = Timespec::read(r)?;
        let dev = r.read_u32()?;
        let ino = r.read_u32()?;
        let mode = FileMode::new(r.read_u32()?)?;
        let uid = r.read_u32()?;
        let gid = r.read_u32()?;
        let size = r.read_u32()?;
        let oid = r.read_oid(algo)?;
        let flags = r.read_u16()?;
        let assume_valid = flags & ASSUME_VALID_BIT != 0;
        let extended_bit = flags & EXTENDED_BIT != 0;
        let stage = Stage::from_bits((flags & STAGE_MASK) >> 12);
        let name_len = flags & NAME_LEN_MASK;

        let extended = if extended_bit {
            ensure!(version >= 3, GpError::MalformedIndexFile("extended flag set in a v2 index".into()));
            Some(ExtendedFlags::from_bits(r.read_u16()?))
        } else {
            None
        };

        let fixed_len = 62 + if extended.is_some() { 2 } else { 0 };
        let (path, consumed) = read_name(r, version, name_len, previous_name)?;

        if version < 4 {
            // padded so the whole entry (fixed part + name + NUL) is a multiple of 8
            let unpadded = fixed_len + consumed;
            let padded = (unpadded + 8) / 8 * 8;
            let mut pad = [0u8; 8];
            r.read_exact(&mut pad[..padded - unpadded])?;
        }

        Ok(Self { ctime, mtime, dev, ino, mode, uid, gid, size, oid, assume_valid, stage, extended, path })
    }

    pub fn write(&self, w: &mut (impl Write + ?Sized), version: u32, previous_name: &str) -> GpResult<usize> {
        self.ctime.validate_encodable()?;
        self.mtime.validate_encodable()?;
        self.ctime.write(w)?;
        self.mtime.write(w)?;
        w.write_u32(self.dev)?;
        w.write_u32(self.ino)?;
        w.write_u32(self.mode.as_u32())?;
        w.write_u32(self.uid)?;
        w.write_u32(self.gid)?;
        w.write_u32(self.size)?;
        w.write_oid(&self.oid)?;
        w.write_u16(self.flags_word())?;
        if let Some(extended) = self.extended {
            ensure!(version >= 3, GpError::MalformedIndexFile("extended flags require index v3+".into()));
            w.write_u16(extended.to_bits())?;
        }

        let consumed = write_name(w, version, &self.path, previous_name)?;
        let fixed_len = self.fixed_len(version);
        let mut written = fixed_len + consumed;
        if version < 4 {
            let padded = (written + 8) / 8 * 8;
            w.write_all(&vec![0u8; padded - written])?;
            written = padded;
        }
        Ok(written)
    }
}

/// returns `(name, bytes consumed from the reader)`; `consumed` excludes the v2/v3
/// padding (the caller pads separately, since padding needs the fixed-part length too).
fn read_name(
    r: &mut impl BufRead,
    version: u32,
    name_len: u16,
    previous_name: &str,
) -> GpResult<(String, usize)> {
    if version < 4 {
        if name_len == NAME_LEN_OVERFLOW {
            // name longer than 0xFFF: length isn't recorded, scan for the NUL instead
            let bytes = r.read_null_terminated_bytes()?;
            let consumed = bytes.len() + 1;
            return Ok((String::from_utf8(bytes)?, consumed));
        }
        let len = name_len as usize;
        let mut buf = vec![0u8; len];
        r.read_exact(&mut buf)?;
        r.read_u8()?; // NUL terminator, counted towards the padded entry size
        Ok((String::from_utf8(buf)?, len + 1))
    } else {
        let strip = r.read_offset()? as usize;
        ensure!(
            strip <= previous_name.len(),
            GpError::MalformedIndexFile("v4 entry strips more of the previous name than exists".into())
        );
        let suffix = r.read_null_terminated_string()?;
        let mut name = previous_name[..previous_name.len() - strip].to_owned();
        name.push_str(&suffix);
        Ok((name, 0))
    }
}

fn write_name(
    w: &mut (impl Write + ?Sized),
    version: u32,
    name: &str,
    previous_name: &str,
) -> GpResult<usize> {
    if version < 4 {
        w.write_all(name.as_bytes())?;
        w.write_u8(0)?;
        Ok(name.len() + 1)
    } else {
        let common = name.bytes().zip(previous_name.bytes()).take_while(|(a, b)| a == b).count();
        let strip = previous_name.len() - common;
        w.write_offset_varint(strip as u64)?;
        w.write_null_terminated(name[common..].as_bytes())?;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

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
    fn v2_entry_roundtrips_with_padding() {
        let entry = sample_entry("bar");
        let mut buf = vec![];
        entry.write(&mut buf, 2, "").unwrap();
        assert_eq!(buf.len() % 8, 0);
        let decoded = IndexEntry::read(&mut Cursor::new(buf), 2, HashAlgo::Sha1, "").unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn v4_entries_share_a_compressed_prefix() {
        let names = [" ".repeat(20), "bar".to_owned(), "baz/bar".to_owned(), "baz/bar/bar".to_owned(), "foo".to_owned()];
        let mut buf = vec![];
        let mut prev = String::new();
        for name in &names {
            let entry = sample_entry(name);
            entry.write(&mut buf, 4, &prev).unwrap();
            prev = name.clone();
        }

        let mut cursor = Cursor::new(buf);
        let mut prev = String::new();
        for name in &names {
            let decoded = IndexEntry::read(&mut cursor, 4, HashAlgo::Sha1, &prev).unwrap();
            assert_eq!(&decoded.path, name);
            prev = decoded.path;
        }
    }

    #[test]
    fn extended_flags_require_v3() {
        let mut entry = sample_entry("foo");
        entry.extended = Some(ExtendedFlags { skip_worktree: true, intent_to_add: false });
        let mut buf = vec![];
        assert!(entry.write(&mut buf, 2, "").is_err());
    }
}
