//! Flat, ordered encoding of signing state.
//!
//! Every value is one of: a big-endian `u32`, a byte string prefixed by its
//! `u32` length, or an optional value prefixed by a presence tag
//! (`0x00` absent, `0x01` present). Absent values are never confused with
//! present empty byte strings.

use crate::error::{CmssResult, Error};

const TAG_ABSENT: u8 = 0x00;
const TAG_PRESENT: u8 = 0x01;

/// Appends fields to a flat byte buffer.
#[derive(Debug, Default)]
pub(crate) struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn bytes(&mut self, value: &[u8]) {
        let len = u32::try_from(value.len()).expect("field longer than 4 GiB");
        self.u32(len);
        self.buf.extend_from_slice(value);
    }

    pub(crate) fn option<T>(&mut self, value: Option<&T>, encode: impl FnOnce(&mut Self, &T)) {
        match value {
            None => self.buf.push(TAG_ABSENT),
            Some(inner) => {
                self.buf.push(TAG_PRESENT);
                encode(self, inner);
            }
        }
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads fields back in the order they were written.
#[derive(Debug)]
pub(crate) struct Decoder<'a> {
    input: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(input: &'a [u8]) -> Self {
        Self { input }
    }

    fn take(&mut self, len: usize) -> CmssResult<&'a [u8]> {
        if self.input.len() < len {
            return Err(Error::Truncated);
        }
        let (head, tail) = self.input.split_at(len);
        self.input = tail;
        Ok(head)
    }

    pub(crate) fn u32(&mut self) -> CmssResult<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(raw))
    }

    pub(crate) fn bytes(&mut self) -> CmssResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Reads a byte string that must be exactly `expected` bytes long.
    pub(crate) fn bytes_exact(&mut self, expected: usize) -> CmssResult<Vec<u8>> {
        let value = self.bytes()?;
        if value.len() != expected {
            return Err(Error::Malformed("unexpected field length"));
        }
        Ok(value)
    }

    pub(crate) fn option<T>(
        &mut self,
        decode: impl FnOnce(&mut Self) -> CmssResult<T>,
    ) -> CmssResult<Option<T>> {
        match self.take(1)?[0] {
            TAG_ABSENT => Ok(None),
            TAG_PRESENT => decode(self).map(Some),
            _ => Err(Error::Malformed("invalid presence tag")),
        }
    }

    /// Succeeds only if every input byte has been consumed.
    pub(crate) fn finish(self) -> CmssResult<()> {
        if self.input.is_empty() {
            Ok(())
        } else {
            Err(Error::TrailingBytes(self.input.len()))
        }
    }
}
