use crate::error::GpResult;
use crate::hash::{HashAlgo, ObjectId};
use crate::serialize::{Deserialize, Serialize};
use sha1::Digest;
use std::fmt::Display;
use std::io::{self, prelude::*, BufReader};
use std::mem::MaybeUninit;

pub type BufferedFileStream = std::io::BufReader<std::fs::File>;

// all big-endian unless documented otherwise
pub(crate) trait ReadExt: Read {
    #[inline]
    fn read_u8(&mut self) -> io::Result<u8> {
        let mut i = 0u8;
        self.read_exact(std::slice::from_mut(&mut i))?;
        Ok(i)
    }

    /// read the offset encoding used by ofs-delta objects
    /// https://github.com/git/git/blob/master/builtin/pack-objects.c
    fn read_offset(&mut self) -> io::Result<u64> {
        let mut byte = self.read_u8()? as u64;
        let mut offset = byte & 0x7f;
        while byte & 0x80 != 0 {
            offset += 1;
            byte = self.read_u8()? as u64;
            offset = (offset << 7) | (byte & 0x7f);
        }
        Ok(offset)
    }

    #[inline]
    /// alias for `read_le_varint` with a more intuitive name at delta/object-size call sites
    fn read_size(&mut self) -> io::Result<u64> {
        self.read_le_varint()
    }

    #[inline]
    // variable length little-endian integer encoding: read the next byte while the MSB is 1
    fn read_le_varint(&mut self) -> io::Result<u64> {
        self.read_le_varint_with_shift(0).map(|x| x.1)
    }

    // `init_shift` lets the first few low bits of byte 0 carry another small field
    // (used for the 3-bit object type in a pack object header)
    fn read_le_varint_with_shift(&mut self, init_shift: u64) -> io::Result<(u8, u64)> {
        assert!(init_shift < 8);
        let mut n = 0;
        let byte = self.read_u8()?;
        let anti_shift = 7 - init_shift;
        let k_mask = ((1 << init_shift) - 1) << anti_shift;
        let k = (byte & k_mask as u8) >> anti_shift;

        let mask = (1 << anti_shift) - 1;
        n |= (byte & mask) as u64;

        if byte & 0x80 != 0 {
            let mut shift = 7 - init_shift;
            loop {
                let byte = self.read_u8()? as u64;
                n |= (byte & 0x7f) << shift;
                shift += 7;
                if byte & 0x80 == 0 {
                    break;
                }
            }
        }

        Ok((k, n))
    }

    /// format used for encoding a delta copy operation
    /// header must have the MSB set (otherwise we shouldn't be reading this format)
    /// +----------+---------+---------+---------+---------+-------+-------+-------+
    /// | 1xxxxxxx | offset1 | offset2 | offset3 | offset4 | size1 | size2 | size3 |
    /// +----------+---------+---------+---------+---------+-------+-------+-------+
    /// bit i (lsb first) of `header`'s low 7 bits says whether that byte is present
    fn read_le_packed(&mut self, header: u8) -> io::Result<u64> {
        debug_assert!(header & 1 << 7 != 0);
        let mut value = 0;
        for i in 0..7 {
            if header & 1 << i == 0 {
                continue;
            }
            let byte = self.read_u8()? as u64;
            value |= byte << (i * 8)
        }
        Ok(value)
    }

    #[inline]
    fn read_u16(&mut self) -> io::Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    #[inline]
    fn read_u32(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    #[inline]
    fn read_u64(&mut self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    #[inline]
    fn read_oid(&mut self, algo: HashAlgo) -> io::Result<ObjectId> {
        match algo {
            HashAlgo::Sha1 => {
                let mut buf = [0u8; 20];
                self.read_exact(&mut buf)?;
                Ok(ObjectId::from_sha1_bytes(buf))
            }
            HashAlgo::Sha256 => {
                let mut buf = [0u8; 32];
                self.read_exact(&mut buf)?;
                Ok(ObjectId::from_sha256_bytes(buf))
            }
        }
    }

    #[inline]
    fn read_to_vec(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = vec![];
        self.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl<R: Read + ?Sized> ReadExt for R {
}

impl Deserialize for u64 {
    fn deserialize(reader: &mut impl BufRead) -> GpResult<Self> {
        Ok(reader.read_u64()?)
    }
}

impl Deserialize for u8 {
    fn deserialize(reader: &mut impl BufRead) -> GpResult<Self> {
        Ok(reader.read_u8()?)
    }
}

impl Deserialize for u32 {
    fn deserialize(reader: &mut impl BufRead) -> GpResult<Self> {
        Ok(reader.read_u32()?)
    }
}

impl Deserialize for Vec<u8> {
    fn deserialize(reader: &mut impl BufRead) -> GpResult<Self> {
        Ok(reader.read_to_vec()?)
    }
}

impl Serialize for [u8] {
    fn serialize(&self, writer: &mut dyn Write) -> GpResult<()> {
        Ok(writer.write_all(self)?)
    }
}

impl Serialize for Vec<u8> {
    fn serialize(&self, writer: &mut dyn Write) -> GpResult<()> {
        Ok(writer.write_all(self)?)
    }
}

// this trait exists because passing `self` to `T::deserialize` which takes `&mut impl BufRead`
// requires `Self: Sized`; splitting it out keeps `BufRead` itself unconstrained.
pub trait BufReadExtSized: BufRead + Sized {
    fn read_array<T: Deserialize, const N: usize>(&mut self) -> GpResult<[T; N]> {
        let mut xs: [MaybeUninit<T>; N] = unsafe { MaybeUninit::uninit().assume_init() };
        for x in xs.iter_mut() {
            *x = MaybeUninit::new(T::deserialize(&mut *self)?);
        }
        Ok(unsafe { std::mem::transmute_copy(&xs) })
    }

    fn read_type<T: Deserialize>(&mut self) -> GpResult<T> {
        T::deserialize(self)
    }

    fn read_vec<T: Deserialize>(&mut self, n: usize) -> GpResult<Vec<T>> {
        let mut vec = Vec::with_capacity(n);
        for _ in 0..n {
            vec.push(T::deserialize(&mut *self)?);
        }
        Ok(vec)
    }
}

impl<R: BufRead> BufReadExtSized for R {
}

pub trait BufReadExt: BufRead {
    fn as_zlib_decode_stream(&mut self) -> BufReader<flate2::bufread::ZlibDecoder<&mut Self>> {
        BufReader::new(flate2::bufread::ZlibDecoder::new(self))
    }

    /// read bytes up to `sep`, parsing as a base-10 ascii number
    fn read_ascii_num(&mut self, sep: u8) -> GpResult<i64> {
        let mut buf = vec![];
        let i = self.read_until(sep, &mut buf)?;
        Ok(std::str::from_utf8(&buf[..i - 1])?.parse()?)
    }

    /// read bytes up to `sep`, parsing as an octal ascii number
    fn read_octal_num(&mut self, sep: u8) -> GpResult<u32> {
        let mut buf = vec![];
        let i = self.read_until(sep, &mut buf)?;
        Ok(u32::from_str_radix(std::str::from_utf8(&buf[..i - 1])?, 8)?)
    }

    fn read_null_terminated_bytes(&mut self) -> GpResult<Vec<u8>> {
        let mut buf = vec![];
        self.read_until(0, &mut buf)?;
        buf.pop(); // drop the null byte
        Ok(buf)
    }

    fn read_null_terminated_string(&mut self) -> GpResult<String> {
        Ok(String::from_utf8(self.read_null_terminated_bytes()?)?)
    }

    fn is_at_eof(&mut self) -> io::Result<bool> {
        Ok(self.fill_buf()?.is_empty())
    }
}

impl<R: BufRead + ?Sized> BufReadExt for R {
}

pub trait WriteExt: Write {
    fn write_u8(&mut self, u: u8) -> io::Result<()> {
        self.write_all(std::slice::from_ref(&u))
    }

    fn write_u16(&mut self, u: u16) -> io::Result<()> {
        self.write_all(&u.to_be_bytes())
    }

    fn write_u32(&mut self, u: u32) -> io::Result<()> {
        self.write_all(&u.to_be_bytes())
    }

    fn write_u64(&mut self, u: u64) -> io::Result<()> {
        self.write_all(&u.to_be_bytes())
    }

    fn write_ascii_num(&mut self, i: impl Display, sep: u8) -> io::Result<()> {
        self.write_all(i.to_string().as_bytes())?;
        self.write_u8(sep)
    }

    fn write_octal_num(&mut self, i: u32, sep: u8) -> io::Result<()> {
        self.write_all(format!("{:o}", i).as_bytes())?;
        self.write_u8(sep)
    }

    fn write_null_terminated(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.write_u8(0)
    }

    fn write_oid(&mut self, oid: &ObjectId) -> io::Result<()> {
        self.write_all(oid.as_bytes())
    }

    /// inverse of [`ReadExt::read_offset`]; also used by the index codec's
    /// variable-width extension sizes (git's `decode_varint` in `read-cache.c` is
    /// byte-for-byte the same "+1 per continuation byte" scheme as ofs-delta).
    fn write_offset_varint(&mut self, mut n: u64) -> io::Result<()> {
        let mut stack = vec![(n & 0x7f) as u8];
        loop {
            n >>= 7;
            if n == 0 {
                break;
            }
            n -= 1;
            stack.push(0x80 | (n & 0x7f) as u8);
        }
        stack.reverse();
        self.write_all(&stack)
    }

    /// write `data` prefixed by its serialized size in bytes as a u32
    fn write_with_size(&mut self, data: &impl Serialize) -> GpResult<()> {
        let mut buf = vec![];
        data.serialize(&mut buf)?;
        self.write_u32(buf.len() as u32)?;
        self.write_all(&buf)?;
        Ok(())
    }
}

impl<W: Write + ?Sized> WriteExt for W {
}

pub(crate) struct HashReader<'a, D> {
    reader: &'a mut dyn BufRead,
    hasher: D,
}

impl<'a, D: Digest> BufRead for HashReader<'a, D> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.reader.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.reader.consume(amt)
    }
}

impl<'a, D: Digest> Read for HashReader<'a, D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

impl<'a, D: Digest> HashReader<'a, D> {
    pub fn new(reader: &'a mut dyn BufRead) -> Self {
        Self { reader, hasher: D::new() }
    }
}

impl<'a> HashReader<'a, sha1::Sha1> {
    pub fn new_sha1(reader: &'a mut dyn BufRead) -> Self {
        Self::new(reader)
    }

    pub fn finalize_sha1_hash(&mut self) -> ObjectId {
        ObjectId::from_sha1_bytes(self.hasher.finalize_reset().into())
    }
}

impl<'a> HashReader<'a, sha2::Sha256> {
    pub fn new_sha256(reader: &'a mut dyn BufRead) -> Self {
        Self::new(reader)
    }

    pub fn finalize_sha256_hash(&mut self) -> ObjectId {
        ObjectId::from_sha256_bytes(self.hasher.finalize_reset().into())
    }
}

/// hashes all the bytes written into the writer using `D`, so the trailing content-hash
/// of a file can be computed inline during a single write pass.
pub(crate) struct HashWriter<'a, D> {
    writer: &'a mut dyn Write,
    hasher: D,
}

impl<'a, D: Digest> Write for HashWriter<'a, D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl<'a, D: Digest> HashWriter<'a, D> {
    pub fn new(writer: &'a mut dyn Write) -> Self {
        Self { writer, hasher: D::new() }
    }
}

impl<'a> HashWriter<'a, sha1::Sha1> {
    pub fn new_sha1(writer: &'a mut dyn Write) -> Self {
        Self::new(writer)
    }

    pub fn write_hash(self) -> io::Result<ObjectId> {
        let hash = ObjectId::from_sha1_bytes(self.hasher.finalize().into());
        self.writer.write_oid(&hash)?;
        Ok(hash)
    }
}

impl<'a> HashWriter<'a, sha2::Sha256> {
    pub fn new_sha256(writer: &'a mut dyn Write) -> Self {
        Self::new(writer)
    }

    pub fn write_hash(self) -> io::Result<ObjectId> {
        let hash = ObjectId::from_sha256_bytes(self.hasher.finalize().into());
        self.writer.write_oid(&hash)?;
        Ok(hash)
    }
}
