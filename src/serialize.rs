use crate::error::GpResult;
use std::io::{prelude::*, BufReader};

pub trait Serialize {
    fn serialize(&self, writer: &mut dyn Write) -> GpResult<()>;
}

pub trait BufReadSeek: BufRead + Seek {}

impl<R: BufRead + Seek> BufReadSeek for R {
}

// explicit `Self: Sized` bounds on each function (instead of on the trait) keep these
// object safe enough to be used as trait objects where only `serialize` is needed.
pub trait Deserialize {
    fn deserialize(reader: &mut impl BufRead) -> GpResult<Self>
    where
        Self: Sized;

    fn deserialize_unbuffered(reader: impl Read) -> GpResult<Self>
    where
        Self: Sized,
    {
        Self::deserialize(&mut BufReader::new(reader))
    }
}

/// deserialize trait where the size to read is required to be known ahead of time.
/// the size given is not necessarily the exact number of bytes that will be read: for
/// `OfsDelta`/`RefDelta` it is the size of the delta payload, not counting the
/// offset/base-oid that precedes it.
pub trait DeserializeSized {
    fn deserialize_sized(reader: &mut impl BufRead, size: u64) -> GpResult<Self>
    where
        Self: Sized;

    fn deserialize_from_slice(slice: &[u8]) -> GpResult<Self>
    where
        Self: Sized,
    {
        Self::deserialize_sized_unbuffered(slice, slice.len() as u64)
    }

    fn deserialize_sized_unbuffered(reader: impl Read, size: u64) -> GpResult<Self>
    where
        Self: Sized,
    {
        Self::deserialize_sized(&mut BufReader::new(reader), size)
    }
}

impl<D: Deserialize> DeserializeSized for D {
    fn deserialize_sized(reader: &mut impl BufRead, _size: u64) -> GpResult<Self>
    where
        Self: Sized,
    {
        Self::deserialize(reader)
    }
}
