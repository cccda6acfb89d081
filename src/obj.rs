use crate::error::GpGenericError;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

/// the four object types exposed to callers after delta resolution; `ofs-delta`
/// and `ref-delta` only ever appear as [`crate::pack::PackObjType`], never here.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, FromPrimitive, ToPrimitive)]
pub enum ObjectType {
    Commit = 1,
    Tree   = 2,
    Blob   = 3,
    Tag    = 4,
}

impl ObjectType {
    pub fn from_u8(n: u8) -> Option<Self> {
        FromPrimitive::from_u8(n)
    }
}

impl Display for ObjectType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectType::Commit => "commit",
            ObjectType::Tree => "tree",
            ObjectType::Tag => "tag",
            ObjectType::Blob => "blob",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ObjectType {
    type Err = GpGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commit" => Ok(ObjectType::Commit),
            "tree" => Ok(ObjectType::Tree),
            "tag" => Ok(ObjectType::Tag),
            "blob" => Ok(ObjectType::Blob),
            _ => bail!("unknown git object type `{}`", s),
        }
    }
}

/// the mode bits git stores in a tree entry / index entry.
#[derive(Copy, PartialEq, Eq, Clone, PartialOrd, Ord)]
#[repr(u32)]
pub enum FileMode {
    Reg     = 0o100644,
    Exec    = 0o100755,
    Link    = 0o120000,
    Tree    = 0o40000,
    Gitlink = 0o160000,
}

impl FileMode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn is_link(self) -> bool {
        matches!(self, FileMode::Link)
    }

    pub fn is_file(self) -> bool {
        matches!(self, FileMode::Exec | FileMode::Reg)
    }

    pub fn is_tree(self) -> bool {
        matches!(self, FileMode::Tree)
    }

    pub fn new(u: u32) -> crate::error::GpResult<Self> {
        match u {
            0o100644 => Ok(Self::Reg),
            0o100755 => Ok(Self::Exec),
            0o120000 => Ok(Self::Link),
            0o40000 => Ok(Self::Tree),
            0o160000 => Ok(Self::Gitlink),
            _ => bail!("invalid filemode `{:06o}`", u),
        }
    }

    pub fn infer_obj_type(self) -> ObjectType {
        match self {
            Self::Tree => ObjectType::Tree,
            Self::Exec | Self::Reg | Self::Link => ObjectType::Blob,
            Self::Gitlink => ObjectType::Commit,
        }
    }
}

impl Display for FileMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let n = self.as_u32();
        if f.alternate() { write!(f, "{:o}", n) } else { write!(f, "{:06o}", n) }
    }
}

impl Debug for FileMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl FromStr for FileMode {
    type Err = GpGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(u32::from_str_radix(s, 8)?)
    }
}

#[derive(PartialEq, Debug)]
pub struct ObjHeader {
    pub obj_type: ObjectType,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filemode_roundtrips_through_octal() {
        for mode in [FileMode::Reg, FileMode::Exec, FileMode::Link, FileMode::Tree] {
            let s = format!("{:o}", mode.as_u32());
            assert_eq!(FileMode::from_str(&s).unwrap(), mode);
        }
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(FileMode::new(0o777).is_err());
    }
}
