//! Little-endian byte codec shared by page, record, and catalog encodings.
//!
//! Fixed-width integers are little-endian; variable-length integers use
//! unsigned LEB128. Byte strings are prefixed with a varint length. Decoding
//! never panics: truncated or malformed input surfaces as
//! [`ArborError::StorageCorrupt`].

use arbor_error::{ArborError, Result};

/// Maximum encoded length of a `u64` varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Append-only encoder.
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_bits().to_le_bytes());
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn put_varint(&mut self, mut v: u64) {
        loop {
            #[allow(clippy::cast_possible_truncation)]
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_varint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_str(&mut self, s: &str) {
        self.put_bytes(s.as_bytes());
    }

    /// Encode an optional `u64` as a presence byte followed by a varint.
    pub fn put_opt_varint(&mut self, v: Option<u64>) {
        match v {
            Some(v) => {
                self.buf.push(1);
                self.put_varint(v);
            }
            None => self.buf.push(0),
        }
    }

    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor-based decoder over a borrowed slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ArborError::corrupt(format!(
                "truncated input at byte {}: need {n}, have {}",
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(u64::from_le_bytes(self.take_array()?)))
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ArborError::corrupt(format!("invalid bool byte {other}"))),
        }
    }

    pub fn get_varint(&mut self) -> Result<u64> {
        let mut out = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.get_u8()?;
            let bits = u64::from(byte & 0x7f);
            let shift = 7 * i;
            if shift == 63 && bits > 1 {
                return Err(ArborError::corrupt("varint overflows u64"));
            }
            out |= bits << shift;
            if byte & 0x80 == 0 {
                return Ok(out);
            }
        }
        Err(ArborError::corrupt("varint longer than 10 bytes"))
    }

    pub fn get_varint_u32(&mut self) -> Result<u32> {
        let v = self.get_varint()?;
        u32::try_from(v).map_err(|_| ArborError::corrupt(format!("varint {v} exceeds u32")))
    }

    pub fn get_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.get_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| ArborError::corrupt(format!("length {len} exceeds usize")))?;
        self.take(len)
    }

    pub fn get_string(&mut self) -> Result<String> {
        let bytes = self.get_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ArborError::corrupt(format!("invalid utf-8 string: {e}")))
    }

    pub fn get_opt_varint(&mut self) -> Result<Option<u64>> {
        match self.get_u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.get_varint()?)),
            other => Err(ArborError::corrupt(format!("invalid option tag {other}"))),
        }
    }

    pub fn get_raw(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fixed_width_fields() {
        let mut w = ByteWriter::new();
        w.put_u8(7);
        w.put_u16(0xBEEF);
        w.put_u32(0xDEAD_BEEF);
        w.put_i64(-42);
        w.put_f64(2.5);
        w.put_bool(true);
        w.put_str("arbor");
        w.put_opt_varint(None);
        w.put_opt_varint(Some(300));
        let bytes = w.into_vec();

        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.get_u8().unwrap(), 7);
        assert_eq!(r.get_u16().unwrap(), 0xBEEF);
        assert_eq!(r.get_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.get_i64().unwrap(), -42);
        assert!((r.get_f64().unwrap() - 2.5).abs() < f64::EPSILON);
        assert!(r.get_bool().unwrap());
        assert_eq!(r.get_string().unwrap(), "arbor");
        assert_eq!(r.get_opt_varint().unwrap(), None);
        assert_eq!(r.get_opt_varint().unwrap(), Some(300));
        assert!(r.is_exhausted());
    }

    #[test]
    fn truncated_input_is_corruption() {
        let mut r = ByteReader::new(&[1, 2]);
        let err = r.get_u32().unwrap_err();
        assert!(matches!(err, ArborError::StorageCorrupt { .. }));
    }

    #[test]
    fn overlong_varint_is_rejected() {
        let bytes = [0xFFu8; 11];
        let mut r = ByteReader::new(&bytes);
        assert!(r.get_varint().is_err());
    }

    #[test]
    fn invalid_bool_is_rejected() {
        let mut r = ByteReader::new(&[2]);
        assert!(r.get_bool().is_err());
    }

    proptest! {
        #[test]
        fn prop_varint_decodes_what_was_encoded(v in any::<u64>()) {
            let mut w = ByteWriter::new();
            w.put_varint(v);
            let bytes = w.into_vec();
            prop_assert!(bytes.len() <= MAX_VARINT_LEN);
            let mut r = ByteReader::new(&bytes);
            prop_assert_eq!(r.get_varint()?, v);
            prop_assert!(r.is_exhausted());
        }
    }
}
