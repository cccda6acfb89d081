//! `ctime`/`mtime` as stored in a `DIRC` entry: two `u32`s (seconds, nanoseconds),
//! not a `std::time::SystemTime` — the on-disk value may predate the epoch's
//! representable range on some platforms and must round-trip exactly regardless.

use crate::error::{GpError, GpResult};
use crate::io::{ReadExt, WriteExt};
use std::io::{BufRead, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord, Hash)]
pub struct Timespec {
    pub sec: u32,
    pub nsec: u32,
}

impl Timespec {
    pub const ZERO: Timespec = Timespec { sec: 0, nsec: 0 };

    pub fn new(sec: u32, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    /// "time unset" is the all-zero timespec; nanoseconds alone (§8 boundary
    /// behavior) still counts as a real, non-zero timestamp.
    pub fn is_unset(self) -> bool {
        self == Self::ZERO
    }

    pub fn read(r: &mut impl BufRead) -> GpResult<Self> {
        let sec = r.read_u32()?;
        let nsec = r.read_u32()?;
        Ok(Self { sec, nsec })
    }

    pub fn write(self, w: &mut (impl Write + ?Sized)) -> GpResult<()> {
        // a pre-epoch ctime/mtime would require a negative `u32`; reject at encode
        // time rather than silently wrapping (§4.5 "Error conditions").
        w.write_u32(self.sec)?;
        w.write_u32(self.nsec)?;
        Ok(())
    }

    pub fn validate_encodable(self) -> GpResult<()> {
        if self.sec > i32::MAX as u32 {
            return Err(anyhow!(GpError::InvalidTimestamp));
        }
        Ok(())
    }
}
