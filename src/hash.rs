use crate::error::GpGenericError;
use rustc_hash::FxHasher;
use rustc_hex::{FromHex, ToHex};
use sha1::Digest;
use std::cmp::Ordering;
use std::convert::TryInto;
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// which hash algorithm a pack/idx/rev/commit-graph/index file was built with.
/// stored as a single byte in `.rev` (`1 = sha1, 2 = sha256`); the pack/idx/index
/// formats infer it purely from trailer length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    Sha1,
    Sha256,
}

impl HashAlgo {
    pub fn size(self) -> usize {
        match self {
            HashAlgo::Sha1 => 20,
            HashAlgo::Sha256 => 32,
        }
    }

    pub fn from_rev_byte(b: u8) -> GpResult<Self> {
        match b {
            1 => Ok(HashAlgo::Sha1),
            2 => Ok(HashAlgo::Sha256),
            _ => Err(anyhow!(crate::error::GpError::UnsupportedHash(b))),
        }
    }

    pub fn to_rev_byte(self) -> u8 {
        match self {
            HashAlgo::Sha1 => 1,
            HashAlgo::Sha256 => 2,
        }
    }
}

use crate::error::GpResult;

/// a content hash: either a 20-byte SHA-1 or a 32-byte SHA-256 digest.
/// ordering/equality is always byte-lexicographic, matching git's own ordering
/// of object ids within a single repository's hash algorithm.
#[derive(Clone, Copy, Eq)]
pub enum ObjectId {
    Sha1([u8; 20]),
    Sha256([u8; 32]),
}

impl ObjectId {
    /// the distinguished "unknown"/zero object id for a given algorithm
    pub fn zero(algo: HashAlgo) -> Self {
        match algo {
            HashAlgo::Sha1 => Self::Sha1([0; 20]),
            HashAlgo::Sha256 => Self::Sha256([0; 32]),
        }
    }

    pub fn algo(&self) -> HashAlgo {
        match self {
            ObjectId::Sha1(..) => HashAlgo::Sha1,
            ObjectId::Sha256(..) => HashAlgo::Sha256,
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ObjectId::Sha1(b) => b.as_slice(),
            ObjectId::Sha256(b) => b.as_slice(),
        }
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.as_bytes().iter().all(|&b| b == 0)
    }

    pub fn from_sha1_bytes(bytes: [u8; 20]) -> Self {
        Self::Sha1(bytes)
    }

    pub fn from_sha256_bytes(bytes: [u8; 32]) -> Self {
        Self::Sha256(bytes)
    }

    pub fn from_slice(algo: HashAlgo, bytes: &[u8]) -> GpResult<Self> {
        match algo {
            HashAlgo::Sha1 => Ok(Self::Sha1(bytes.try_into()?)),
            HashAlgo::Sha256 => Ok(Self::Sha256(bytes.try_into()?)),
        }
    }

    pub fn to_hex(&self) -> String {
        self.as_bytes().to_hex()
    }

    pub fn from_hex(algo: HashAlgo, s: &str) -> GpResult<Self> {
        ensure_eq!(s.len(), algo.size() * 2, "hash hex string has the wrong length");
        match algo {
            HashAlgo::Sha1 => {
                let bytes: arrayvec::ArrayVec<u8, 20> = s.from_hex()?;
                Ok(Self::Sha1(bytes.into_inner().map_err(|_| anyhow!("invalid hex digest"))?))
            }
            HashAlgo::Sha256 => {
                let bytes: arrayvec::ArrayVec<u8, 32> = s.from_hex()?;
                Ok(Self::Sha256(bytes.into_inner().map_err(|_| anyhow!("invalid hex digest"))?))
            }
        }
    }
}

impl FromStr for ObjectId {
    type Err = GpGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_end();
        match s.len() {
            40 => Self::from_hex(HashAlgo::Sha1, s),
            64 => Self::from_hex(HashAlgo::Sha256, s),
            _ => bail!("creating object id from invalid hex string (length `{}`)", s.len()),
        }
    }
}

impl PartialEq for ObjectId {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Hash for ObjectId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state)
    }
}

impl PartialOrd for ObjectId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl AsRef<[u8]> for ObjectId {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl Debug for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        if f.alternate() { write!(f, "{}", &hex[..7]) } else { write!(f, "{}", hex) }
    }
}

#[cfg(test)]
impl quickcheck::Arbitrary for ObjectId {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        Self::Sha1((0..20).map(|_| u8::arbitrary(g)).collect::<Vec<_>>().try_into().unwrap())
    }
}

pub fn crc32_of(bytes: impl AsRef<[u8]>) -> u32 {
    let mut crc = crc32fast::Hasher::new();
    crc.update(bytes.as_ref());
    crc.finalize()
}

pub fn sha1_of(bytes: impl AsRef<[u8]>) -> ObjectId {
    let mut hasher = sha1::Sha1::new();
    hasher.update(bytes);
    ObjectId::Sha1(hasher.finalize().into())
}

pub fn sha256_of(bytes: impl AsRef<[u8]>) -> ObjectId {
    use sha2::Digest as _;
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    ObjectId::Sha256(hasher.finalize().into())
}

pub trait MakeHash {
    fn mk_fx_hash(&self) -> u64;
}

impl<H: Hash + ?Sized> MakeHash for H {
    #[inline]
    fn mk_fx_hash(&self) -> u64 {
        let mut state = FxHasher::default();
        self.hash(&mut state);
        state.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sha1_hex() {
        let s = "303953e5aa461c203a324821bc1717f9b4fff895"[..40].to_owned();
        let oid: ObjectId = s.parse().unwrap();
        assert_eq!(oid.algo(), HashAlgo::Sha1);
        assert_eq!(oid.to_hex(), s);
    }

    #[test]
    fn orders_byte_lexicographically() {
        let a = ObjectId::from_sha1_bytes([0; 20]);
        let mut b = [0u8; 20];
        b[19] = 1;
        let b = ObjectId::from_sha1_bytes(b);
        assert!(a < b);
    }
}
