//! The CIF (index) row codec: a trivial, fixed-width 4-field record that
//! cross-links one ordinal's CWF and CPF byte ranges.
//!
//! Unlike every other record type, a CIF row's fields are never subject to a
//! header-declared scale: offsets and sizes are stored as plain integers.
//! The row width is fixed at 64 + 64 + 16 + 16 = 160 bits (20 bytes),
//! byte-aligned, so [`encode`]/[`decode`] work directly off a 20-byte slice
//! rather than needing a [`crate::bitio::BitWriter`] accumulator.

use crate::bitio::{pack64, unpack64};

/// Bit width of the two file-offset fields.
const OFFSET_BITS: u32 = 64;
/// Bit width of the two byte-size fields.
const SIZE_BITS: u32 = 16;

/// Byte length of one encoded CIF row.
pub const ROW_LEN: usize = ((OFFSET_BITS * 2 + SIZE_BITS * 2) / 8) as usize;

/// One CIF row: `(cwf_offset, cwf_size, cpf_offset, cpf_size)`, per spec §3.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CifRow {
    /// Byte offset of this ordinal's record in the CWF file.
    pub cwf_offset: u64,
    /// Byte length of this ordinal's record in the CWF file.
    pub cwf_size: u16,
    /// Byte offset of this ordinal's record in the CPF file.
    pub cpf_offset: u64,
    /// Byte length of this ordinal's record in the CPF file.
    pub cpf_size: u16,
}

impl CifRow {
    /// Encodes this row into a fresh [`ROW_LEN`]-byte buffer.
    pub fn encode(&self) -> [u8; ROW_LEN] {
        let mut buf = [0u8; ROW_LEN];
        let mut bit_off = 0u64;
        pack64(&mut buf, bit_off, OFFSET_BITS, self.cwf_offset);
        bit_off += u64::from(OFFSET_BITS);
        pack64(&mut buf, bit_off, OFFSET_BITS, self.cpf_offset);
        bit_off += u64::from(OFFSET_BITS);
        pack64(&mut buf, bit_off, SIZE_BITS, u64::from(self.cwf_size));
        bit_off += u64::from(SIZE_BITS);
        pack64(&mut buf, bit_off, SIZE_BITS, u64::from(self.cpf_size));
        buf
    }

    /// Decodes a row from a [`ROW_LEN`]-byte slice.
    pub fn decode(buf: &[u8]) -> CifRow {
        debug_assert!(buf.len() >= ROW_LEN);
        let mut bit_off = 0u64;
        let cwf_offset = unpack64(buf, bit_off, OFFSET_BITS);
        bit_off += u64::from(OFFSET_BITS);
        let cpf_offset = unpack64(buf, bit_off, OFFSET_BITS);
        bit_off += u64::from(OFFSET_BITS);
        let cwf_size = unpack64(buf, bit_off, SIZE_BITS) as u16;
        bit_off += u64::from(SIZE_BITS);
        let cpf_size = unpack64(buf, bit_off, SIZE_BITS) as u16;
        CifRow {
            cwf_offset,
            cwf_size,
            cpf_offset,
            cpf_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let row = CifRow {
            cwf_offset: 0xDEAD_BEEF_0011,
            cwf_size: 4096,
            cpf_offset: 0x1234_5678_9ABC,
            cpf_size: 512,
        };
        let encoded = row.encode();
        assert_eq!(ROW_LEN, encoded.len());
        assert_eq!(row, CifRow::decode(&encoded));
    }

    #[test]
    fn zero_row_roundtrips() {
        let row = CifRow::default();
        assert_eq!(row, CifRow::decode(&row.encode()));
    }
}
