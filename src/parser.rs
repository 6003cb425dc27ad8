//! Byte cursor used by every decoder in the crate.
use crate::error::DecodeError;
use std::collections::VecDeque;

/// `ByteParser` owns the bytes it reads from, so decoded values never borrow
/// from a caller buffer.
#[derive(Debug, Clone, Default)]
pub struct ByteParser {
    pub deque: VecDeque<u8>,
}

impl ByteParser {
    #[must_use]
    pub fn new(deque: VecDeque<u8>) -> Self {
        Self { deque }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.deque.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deque.is_empty()
    }

    pub fn get_u8(&mut self) -> Option<u8> {
        self.deque.pop_front()
    }

    pub fn get_u16(&mut self) -> Option<u16> {
        if self.deque.len() < 2 {
            return None;
        }
        let hi = self.deque.pop_front()?;
        let lo = self.deque.pop_front()?;
        Some(u16::from_be_bytes([hi, lo]))
    }

    /// Reads a 24-bit big-endian integer, as used by handshake lengths.
    pub fn get_u24(&mut self) -> Option<u32> {
        if self.deque.len() < 3 {
            return None;
        }
        let b0 = self.deque.pop_front()?;
        let b1 = self.deque.pop_front()?;
        let b2 = self.deque.pop_front()?;
        Some(u32::from_be_bytes([0, b0, b1, b2]))
    }

    /// Takes exactly `count` bytes, or nothing at all when fewer are left.
    pub fn get_bytes(&mut self, count: usize) -> Option<Vec<u8>> {
        if self.deque.len() < count {
            return None;
        }
        Some(self.deque.drain(..count).collect())
    }

    /// Peeks at a byte without consuming it.
    #[must_use]
    pub fn peek(&self, index: usize) -> Option<u8> {
        self.deque.get(index).copied()
    }

    /// Consumes everything that is left.
    pub fn drain(&mut self) -> Vec<u8> {
        self.deque.drain(..).collect()
    }

    pub fn expect_u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        let available = self.len();
        self.get_u8()
            .ok_or(DecodeError::TooShort { field, needed: 1, available })
    }

    pub fn expect_u16(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        let available = self.len();
        self.get_u16()
            .ok_or(DecodeError::TooShort { field, needed: 2, available })
    }

    pub fn expect_u24(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        let available = self.len();
        self.get_u24()
            .ok_or(DecodeError::TooShort { field, needed: 3, available })
    }

    pub fn expect_bytes(
        &mut self,
        count: usize,
        field: &'static str,
    ) -> Result<Vec<u8>, DecodeError> {
        let available = self.len();
        self.get_bytes(count)
            .ok_or(DecodeError::TooShort { field, needed: count, available })
    }

    /// Reads a vector prefixed with a one byte length.
    pub fn expect_vec_u8(&mut self, field: &'static str) -> Result<Vec<u8>, DecodeError> {
        let len = self.expect_u8(field)?;
        self.expect_bytes(len as usize, field)
    }

    /// Reads a vector prefixed with a two byte length.
    pub fn expect_vec_u16(&mut self, field: &'static str) -> Result<Vec<u8>, DecodeError> {
        let len = self.expect_u16(field)?;
        self.expect_bytes(len as usize, field)
    }

    /// Reads a vector prefixed with a three byte length.
    pub fn expect_vec_u24(&mut self, field: &'static str) -> Result<Vec<u8>, DecodeError> {
        let len = self.expect_u24(field)?;
        self.expect_bytes(len as usize, field)
    }
}

impl From<Vec<u8>> for ByteParser {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(VecDeque::from(bytes))
    }
}

impl From<&[u8]> for ByteParser {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.iter().copied().collect())
    }
}
