//! `FSMN` extension: caches the last answer from a filesystem-monitor hook,
//! so status scans can skip re-stat'ing files the monitor already knows are
//! clean. v1 monitors answer questions as of a point in time; v2 monitors
//! hand back an opaque token they understand but we don't.

use crate::error::{GpError, GpResult};
use crate::index::ewah::EwahBitmap;
use crate::io::{ReadExt, WriteExt};
use std::io::{BufRead, Write};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsMonitorToken {
    V1 { last_update_ns: u64 },
    V2 { token: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsMonitorCache {
    pub token: FsMonitorToken,
    /// one bit per index entry: dirty since the recorded token
    pub dirty: EwahBitmap,
}

impl FsMonitorCache {
    pub fn parse(data: &[u8]) -> GpResult<Self> {
        let mut cursor = std::io::Cursor::new(data);
        let version = cursor.read_u32()?;
        let token = match version {
            1 => FsMonitorToken::V1 { last_update_ns: cursor.read_u64()? },
            2 => {
                let len = cursor.read_u32()?;
                let mut buf = vec![0u8; len as usize];
                cursor.read_exact(&mut buf)?;
                FsMonitorToken::V2 { token: buf }
            }
            other => return Err(anyhow!(GpError::UnsupportedVersion(other))),
        };
        let dirty = EwahBitmap::read(&mut cursor)?;
        Ok(Self { token, dirty })
    }

    pub fn write(&self, w: &mut (impl Write + ?Sized)) -> GpResult<()> {
        match &self.token {
            FsMonitorToken::V1 { last_update_ns } => {
                w.write_u32(1)?;
                w.write_u64(*last_update_ns)?;
            }
            FsMonitorToken::V2 { token } => {
                w.write_u32(2)?;
                w.write_u32(token.len() as u32)?;
                w.write_all(token)?;
            }
        }
        self.dirty.write(w)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_v1_timestamp_token() {
        let cache =
            FsMonitorCache { token: FsMonitorToken::V1 { last_update_ns: 123 }, dirty: EwahBitmap::from_set_bits(4, [1, 3]) };
        let mut buf = vec![];
        cache.write(&mut buf).unwrap();
        assert_eq!(FsMonitorCache::parse(&buf).unwrap(), cache);
    }

    #[test]
    fn roundtrips_v2_opaque_token() {
        let cache = FsMonitorCache {
            token: FsMonitorToken::V2 { token: b"watchman:123abc".to_vec() },
            dirty: EwahBitmap::empty(4),
        };
        let mut buf = vec![];
        cache.write(&mut buf).unwrap();
        assert_eq!(FsMonitorCache::parse(&buf).unwrap(), cache);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut buf = vec![];
        buf.write_u32(3).unwrap();
        assert!(FsMonitorCache::parse(&buf).is_err());
    }
}
