//! A forward-only bit-level reader over an in-memory buffer.
//!
//! Descriptor and codec-configuration payloads are bit-packed; this cursor provides the reads
//! they need: plain bit fields, non-consuming peeks, Exp-Golomb codes, byte alignment relative
//! to the scoped range, and the H.264 emulation-prevention mode in which `00 00 03` byte
//! stuffing is removed from the stream as it is consumed.

use crate::error::{ParseError, Result};

/// A forward-only bit reader over a borrowed byte slice.
///
/// The readable range can be narrowed with [`sub_cursor`](Self::sub_cursor) to scope a
/// descriptor or NAL payload; reads past the scoped range fail with [`ParseError::OutOfData`].
#[derive(Clone, Copy)]
pub struct BitCursor<'a> {
    buf: &'a [u8],
    byte_pos: usize,
    bit_pos: u32,
    bits_left: u64,
    emulation_prevention: bool,
    zero_run: u32,
}

impl<'a> BitCursor<'a> {
    /// Create a cursor over the whole of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            byte_pos: 0,
            bit_pos: 0,
            bits_left: buf.len() as u64 * 8,
            emulation_prevention: false,
            zero_run: 0,
        }
    }

    /// The number of raw bits remaining in the scoped range.
    pub fn bits_left(&self) -> u64 {
        self.bits_left
    }

    /// The number of whole bytes remaining in the scoped range.
    pub fn bytes_left(&self) -> u64 {
        self.bits_left / 8
    }

    /// Turn on removal of `00 00 03` emulation-prevention stuffing, as used for NAL payloads.
    pub fn enable_emulation_prevention(&mut self) {
        self.emulation_prevention = true;
    }

    /// Read a single bit.
    pub fn read_bit(&mut self) -> Result<u32> {
        if self.bit_pos == 0 && self.emulation_prevention {
            self.skip_stuffing_byte()?;
        }
        ensure_attach!(self.bits_left > 0, ParseError::OutOfData, "bit read past end of data");

        let byte = self.buf[self.byte_pos];
        let bit = (byte >> (7 - self.bit_pos)) & 1;

        self.bit_pos += 1;
        self.bits_left -= 1;
        if self.bit_pos == 8 {
            self.zero_run = if byte == 0 { self.zero_run + 1 } else { 0 };
            self.bit_pos = 0;
            self.byte_pos += 1;
        }

        Ok(bit as u32)
    }

    /// Read `n` bits (`n` ≤ 32) as a big-endian unsigned value.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        debug_assert!(n <= 32);
        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()?;
        }
        Ok(value)
    }

    /// Read `n` bits (`n` ≤ 64) as a big-endian unsigned value.
    pub fn read_bits_u64(&mut self, n: u32) -> Result<u64> {
        debug_assert!(n <= 64);
        let mut value = 0u64;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u64;
        }
        Ok(value)
    }

    /// Read `n` bits without consuming them.
    pub fn peek_bits(&self, n: u32) -> Result<u32> {
        let mut probe = *self;
        probe.read_bits(n)
    }

    /// Skip `n` bits.
    pub fn skip_bits(&mut self, n: u64) -> Result<()> {
        if !self.emulation_prevention && self.bit_pos == 0 && n % 8 == 0 {
            ensure_attach!(n <= self.bits_left, ParseError::OutOfData, "skip past end of data");
            self.byte_pos += (n / 8) as usize;
            self.bits_left -= n;
            return Ok(());
        }
        for _ in 0..n {
            self.read_bit()?;
        }
        Ok(())
    }

    /// Skip `n` whole bytes.
    pub fn skip_bytes(&mut self, n: u64) -> Result<()> {
        self.skip_bits(n * 8)
    }

    /// Read `len` whole bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(len);
        for _ in 0..len {
            bytes.push(self.read_bits(8)? as u8);
        }
        Ok(bytes)
    }

    /// Consume the sub-byte remainder of the scoped range, returning the consumed bits.
    ///
    /// When the scope started byte-aligned this aligns the cursor to the next byte boundary;
    /// callers check the returned value where the format requires the padding to be zero.
    pub fn align_to_byte(&mut self) -> Result<u32> {
        let n = (self.bits_left % 8) as u32;
        self.read_bits(n)
    }

    /// Read an unsigned Exp-Golomb code.
    pub fn read_ue(&mut self) -> Result<u32> {
        let mut leading_zeros = 0u32;
        while self.read_bit()? == 0 {
            leading_zeros += 1;
            ensure_attach!(leading_zeros < 32, ParseError::InvalidInput, "exp-golomb code too long");
        }
        let suffix = self.read_bits(leading_zeros)?;
        Ok((1u32 << leading_zeros) - 1 + suffix)
    }

    /// Read a signed Exp-Golomb code.
    pub fn read_se(&mut self) -> Result<i32> {
        let code = self.read_ue()?;
        if code % 2 == 1 {
            Ok((code / 2 + 1) as i32)
        } else {
            Ok(-((code / 2) as i32))
        }
    }

    /// A child cursor scoped to exactly the next `size_bytes` bytes.
    ///
    /// The parent cursor is not advanced; callers skip it past the scoped payload once the
    /// child has been decoded.
    pub fn sub_cursor(&self, size_bytes: u64) -> Result<BitCursor<'a>> {
        let size_bits = size_bytes
            .checked_mul(8)
            .ok_or_else(|| report_attach!(ParseError::OutOfData, "descriptor size overflow"))?;
        ensure_attach!(size_bits <= self.bits_left, ParseError::OutOfData, "scoped range past end of data");
        let mut child = *self;
        child.bits_left = size_bits;
        // Emulation-prevention state does not carry across a scope boundary.
        child.zero_run = 0;
        Ok(child)
    }

    /// Shorten the scoped range past its trailing run of zero bits, returning the number of
    /// bits stripped.
    ///
    /// This is the RBSP trailing-bits handling: after stripping, the last bit in scope is the
    /// stop bit (or the scope is empty when it was all zeros).
    pub fn strip_trailing_zero_bits(&mut self) -> u32 {
        let start = self.byte_pos as u64 * 8 + self.bit_pos as u64;
        let mut end = start + self.bits_left;
        while end > start {
            let idx = end - 1;
            let bit = (self.buf[(idx / 8) as usize] >> (7 - idx % 8)) & 1;
            if bit != 0 {
                break;
            }
            end -= 1;
        }
        let stripped = (start + self.bits_left) - end;
        self.bits_left = end - start;
        stripped as u32
    }

    fn skip_stuffing_byte(&mut self) -> Result<()> {
        if self.zero_run >= 2 && self.bits_left >= 8 && self.buf[self.byte_pos] == 0x03 {
            self.byte_pos += 1;
            self.bits_left -= 8;
            self.zero_run = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use crate::error::ParseError;

    use super::*;

    /// Encode `value` with the standard Exp-Golomb scheme, appending bits to `bits`.
    fn encode_ue(bits: &mut Vec<bool>, value: u32) {
        let code = value as u64 + 1;
        let width = 64 - code.leading_zeros();
        for _ in 0..width - 1 {
            bits.push(false);
        }
        for i in (0..width).rev() {
            bits.push(code >> i & 1 == 1);
        }
    }

    fn pack(bits: &[bool]) -> Vec<u8> {
        let mut bytes = vec![0u8; (bits.len() + 7) / 8];
        for (i, bit) in bits.iter().enumerate() {
            if *bit {
                bytes[i / 8] |= 1 << (7 - i % 8);
            }
        }
        bytes
    }

    #[test]
    fn read_bits_big_endian() {
        let data = [0b1011_0001, 0b1000_0000];
        let mut bb = BitCursor::new(&data);
        assert_eq!(bb.read_bits(3).unwrap(), 0b101);
        assert_eq!(bb.read_bits(6).unwrap(), 0b1_0001_1);
        assert_eq!(bb.bits_left(), 7);
    }

    #[test]
    fn peek_is_side_effect_free() {
        let data = [0xa5, 0x5a, 0x33];
        let mut bb = BitCursor::new(&data);
        bb.read_bits(5).unwrap();

        let before = bb.bits_left();
        let peeked = bb.peek_bits(11).unwrap();
        assert_eq!(bb.bits_left(), before);
        assert_eq!(bb.read_bits(11).unwrap(), peeked);
    }

    #[test]
    fn skip_matches_read() {
        let data = [0xde, 0xad, 0xbe, 0xef];
        let mut read_side = BitCursor::new(&data);
        let mut skip_side = BitCursor::new(&data);
        read_side.read_bits(13).unwrap();
        skip_side.skip_bits(13).unwrap();
        assert_eq!(read_side.bits_left(), skip_side.bits_left());
        assert_eq!(read_side.read_bits(7).unwrap(), skip_side.read_bits(7).unwrap());
    }

    #[test]
    fn out_of_data() {
        let data = [0xff];
        let mut bb = BitCursor::new(&data);
        bb.read_bits(8).unwrap();
        assert_matches!(bb.read_bit(), Err(err) => {
            assert_eq!(err.into_inner(), ParseError::OutOfData);
        });
    }

    #[test]
    fn exp_golomb_roundtrip() {
        for value in [0u32, 1, 2, 255, 65535] {
            let mut bits = Vec::new();
            encode_ue(&mut bits, value);
            let bytes = pack(&bits);
            let mut bb = BitCursor::new(&bytes);
            assert_eq!(bb.read_ue().unwrap(), value, "round-trip of {value}");
        }
    }

    #[test]
    fn exp_golomb_signed() {
        // Codes 0..=4 map to 0, 1, -1, 2, -2.
        let mut bits = Vec::new();
        for code in 0..5 {
            encode_ue(&mut bits, code);
        }
        let bytes = pack(&bits);
        let mut bb = BitCursor::new(&bytes);
        for expected in [0, 1, -1, 2, -2] {
            assert_eq!(bb.read_se().unwrap(), expected);
        }
    }

    #[test]
    fn emulation_prevention_removes_stuffing() {
        let data = [0x00, 0x00, 0x03, 0x01, 0xab];
        let mut bb = BitCursor::new(&data);
        bb.enable_emulation_prevention();
        assert_eq!(bb.read_bits(24).unwrap(), 0x000001);
        assert_eq!(bb.read_bits(8).unwrap(), 0xab);
    }

    #[test]
    fn emulation_prevention_only_after_two_zero_bytes() {
        let data = [0x00, 0x01, 0x03, 0x02];
        let mut bb = BitCursor::new(&data);
        bb.enable_emulation_prevention();
        assert_eq!(bb.read_bits(32).unwrap(), 0x00010302);
    }

    #[test]
    fn sub_cursor_scopes_reads() {
        let data = [0x11, 0x22, 0x33, 0x44];
        let bb = BitCursor::new(&data);
        let mut child = bb.sub_cursor(2).unwrap();
        assert_eq!(child.read_bits(16).unwrap(), 0x1122);
        assert_matches!(child.read_bit(), Err(err) => {
            assert_eq!(err.into_inner(), ParseError::OutOfData);
        });
    }

    #[test]
    fn strip_trailing_zero_bits() {
        let data = [0xa0, 0x80, 0x00];
        let mut bb = BitCursor::new(&data);
        let stripped = bb.strip_trailing_zero_bits();
        assert_eq!(stripped, 15);
        assert_eq!(bb.bits_left(), 9);
        bb.skip_bits(8).unwrap();
        // The stop bit is the last bit left in scope.
        assert_eq!(bb.read_bit().unwrap(), 1);
    }

    #[test]
    fn align_to_byte_returns_leftover_bits() {
        let data = [0b1110_0001, 0xff];
        let mut bb = BitCursor::new(&data);
        bb.read_bits(3).unwrap();
        assert_eq!(bb.align_to_byte().unwrap(), 0b00001);
        assert_eq!(bb.bits_left(), 8);
    }
}
