//! Avro binary primitives: zig-zag varints, length-prefixed bytes, IEEE floats

use crate::{CodecError, Result};

/// Cursor over an Avro-encoded buffer
pub(crate) struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn read_long(&mut self) -> Result<i64> {
        let start = self.pos;
        let mut raw: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or(CodecError::Truncated { offset: self.pos })?;
            self.pos += 1;
            if shift > 63 {
                return Err(CodecError::InvalidVarint { offset: start });
            }
            raw |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    pub(crate) fn read_int(&mut self) -> Result<i32> {
        let start = self.pos;
        let value = self.read_long()?;
        i32::try_from(value).map_err(|_| CodecError::InvalidVarint { offset: start })
    }

    pub(crate) fn read_len(&mut self) -> Result<usize> {
        let len = self.read_long()?;
        usize::try_from(len).map_err(|_| CodecError::NegativeLength(len))
    }

    pub(crate) fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(CodecError::Truncated { offset: self.pos })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_len()?;
        self.read_slice(len)
    }

    pub(crate) fn read_bool(&mut self) -> Result<bool> {
        let offset = self.pos;
        match self.read_slice(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::SchemaMismatch {
                expected: "boolean byte 0 or 1".to_string(),
                found: format!("{other} at byte {offset}"),
            }),
        }
    }

    pub(crate) fn read_f32(&mut self) -> Result<f32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.read_slice(4)?);
        Ok(f32::from_le_bytes(raw))
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.read_slice(8)?);
        Ok(f64::from_le_bytes(raw))
    }
}

pub(crate) fn write_long(out: &mut Vec<u8>, value: i64) {
    let mut raw = ((value << 1) ^ (value >> 63)) as u64;
    while raw & !0x7f != 0 {
        out.push(((raw & 0x7f) | 0x80) as u8);
        raw >>= 7;
    }
    out.push(raw as u8);
}

pub(crate) fn write_len(out: &mut Vec<u8>, len: usize) {
    // Lengths beyond i64::MAX cannot come out of a decoded buffer
    write_long(out, i64::try_from(len).unwrap_or(i64::MAX));
}

pub(crate) fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_len(out, bytes.len());
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: i64) -> Vec<u8> {
        let mut out = Vec::new();
        write_long(&mut out, value);
        out
    }

    #[test]
    fn test_zigzag_matches_reference_encoding() {
        assert_eq!(encoded(0), vec![0x00]);
        assert_eq!(encoded(-1), vec![0x01]);
        assert_eq!(encoded(1), vec![0x02]);
        assert_eq!(encoded(-64), vec![0x7f]);
        assert_eq!(encoded(64), vec![0x80, 0x01]);
    }

    #[test]
    fn test_extreme_longs_decode() -> Result<()> {
        for value in [i64::MIN, i64::MAX, -1_000_000_007, 1 << 40] {
            let bytes = encoded(value);
            let mut decoder = Decoder::new(&bytes);
            assert_eq!(decoder.read_long()?, value);
            assert!(decoder.is_empty());
        }
        Ok(())
    }

    #[test]
    fn test_truncated_varint() {
        let mut decoder = Decoder::new(&[0x80, 0x80]);
        assert!(matches!(
            decoder.read_long(),
            Err(CodecError::Truncated { offset: 2 })
        ));
    }

    #[test]
    fn test_overlong_varint_rejected() {
        let bytes = [0xffu8; 11];
        let mut decoder = Decoder::new(&bytes);
        assert!(matches!(
            decoder.read_long(),
            Err(CodecError::InvalidVarint { offset: 0 })
        ));
    }

    #[test]
    fn test_negative_length_rejected() {
        let bytes = encoded(-3);
        let mut decoder = Decoder::new(&bytes);
        assert!(matches!(
            decoder.read_bytes(),
            Err(CodecError::NegativeLength(-3))
        ));
    }
}
