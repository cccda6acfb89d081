//! Word-aligned compressed bitmap codec (EWAH), used by the `link` and `UNTR`
//! index extensions. On disk: `bit_size: u32`, `word_count: u32`, `word_count`
//! big-endian `u64` "compressed words", then a trailing `u64` marking the buffer
//! position of the bitmap's last running-length word.
//!
//! Each compressed word is either a running-length word (RLW) — `bit 0` is the
//! run's value, the next 32 bits are the run length in full words, the top 31
//! bits are a count of literal words immediately following it — or one of those
//! literal words, taken as 64 raw bits. A full decoder has to walk every RLW
//! group since real bitmaps interleave many of them; this crate's own encoder
//! only ever emits a single RLW-then-literals group (valid, just not run-length
//! compressed), documented in DESIGN.md as a deliberate simplification.

use crate::error::GpResult;
use crate::io::{ReadExt, WriteExt};
use std::io::{BufRead, Write};

const WORD_BITS: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EwahBitmap {
    bit_size: u32,
    words: Vec<u64>,
    rlw_pos: u64,
}

impl EwahBitmap {
    pub fn bit_size(&self) -> u32 {
        self.bit_size
    }

    pub fn empty(bit_size: u32) -> Self {
        Self::from_set_bits(bit_size, std::iter::empty())
    }

    /// builds a single RLW-then-literals group covering exactly `bit_size` bits.
    pub fn from_set_bits(bit_size: u32, set_bits: impl IntoIterator<Item = u32>) -> Self {
        let word_count = (bit_size as usize + WORD_BITS as usize - 1) / WORD_BITS as usize;
        let mut literals = vec![0u64; word_count];
        for bit in set_bits {
            assert!(bit < bit_size, "bit {} out of range for a {}-bit bitmap", bit, bit_size);
            literals[(bit / WORD_BITS) as usize] |= 1u64 << (bit % WORD_BITS);
        }
        let rlw_header = Self::pack_rlw(false, 0, literals.len() as u64);
        let mut words = vec![rlw_header];
        words.extend(literals);
        Self { bit_size, words, rlw_pos: 0 }
    }

    fn pack_rlw(running_bit: bool, running_len: u64, literal_count: u64) -> u64 {
        assert!(running_len <= u32::MAX as u64, "EWAH run length overflow");
        assert!(literal_count <= (1 << 31) - 1, "EWAH literal count overflow");
        (running_bit as u64) | (running_len << 1) | (literal_count << 33)
    }

    fn unpack_rlw(word: u64) -> (bool, u64, u64) {
        let running_bit = word & 1 != 0;
        let running_len = (word >> 1) & 0xFFFF_FFFF;
        let literal_count = word >> 33;
        (running_bit, running_len, literal_count)
    }

    /// every set bit's global position, ascending, bounded by `bit_size`.
    pub fn iter_set_bits(&self) -> impl Iterator<Item = u32> + '_ {
        self.expand_words().into_iter().enumerate().flat_map(move |(word_idx, word)| {
            (0..WORD_BITS).filter_map(move |bit_idx| {
                let global = word_idx as u32 * WORD_BITS + bit_idx;
                (global < self.bit_size && word & (1u64 << bit_idx) != 0).then_some(global)
            })
        })
    }

    pub fn is_set(&self, bit: u32) -> bool {
        bit < self.bit_size && self.iter_set_bits().any(|b| b == bit)
    }

    fn expand_words(&self) -> Vec<u64> {
        let mut out = vec![];
        let mut pos = 0usize;
        while pos < self.words.len() {
            let (running_bit, running_len, literal_count) = Self::unpack_rlw(self.words[pos]);
            pos += 1;
            let fill = if running_bit { u64::MAX } else { 0 };
            out.extend(std::iter::repeat(fill).take(running_len as usize));
            for _ in 0..literal_count {
                out.push(*self.words.get(pos).unwrap_or(&0));
                pos += 1;
            }
        }
        out
    }

    pub fn read(r: &mut impl BufRead) -> GpResult<Self> {
        let bit_size = r.read_u32()?;
        let word_count = r.read_u32()?;
        let words = (0..word_count).map(|_| r.read_u64()).collect::<std::io::Result<Vec<u64>>>()?;
        let rlw_pos = r.read_u64()?;
        Ok(Self { bit_size, words, rlw_pos })
    }

    pub fn write(&self, w: &mut (impl Write + ?Sized)) -> GpResult<()> {
        w.write_u32(self.bit_size)?;
        w.write_u32(self.words.len() as u32)?;
        for &word in &self.words {
            w.write_u64(word)?;
        }
        w.write_u64(self.rlw_pos)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn roundtrips_sparse_bits() {
        let bitmap = EwahBitmap::from_set_bits(200, [0, 63, 64, 65, 130, 199]);
        let mut buf = vec![];
        bitmap.write(&mut buf).unwrap();
        let decoded = EwahBitmap::read(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded.iter_set_bits().collect::<Vec<_>>(), vec![0, 63, 64, 65, 130, 199]);
    }

    #[test]
    fn empty_bitmap_has_no_set_bits() {
        let bitmap = EwahBitmap::empty(10);
        assert_eq!(bitmap.iter_set_bits().count(), 0);
        assert!(!bitmap.is_set(3));
    }

    #[test]
    fn decodes_hand_built_run_length_word() {
        // two all-zero words (run), one literal word with bit 5 set
        let rlw = EwahBitmap::pack_rlw(false, 2, 1);
        let bitmap = EwahBitmap { bit_size: 3 * 64, words: vec![rlw, 1 << 5], rlw_pos: 0 };
        assert_eq!(bitmap.iter_set_bits().collect::<Vec<_>>(), vec![64 + 5]);
    }
}
