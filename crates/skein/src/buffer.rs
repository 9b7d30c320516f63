use std::borrow::Cow;
use std::mem::size_of;
use std::ops::{Index, IndexMut};

use bytemuck::Pod;

pub const DEFAULT_BUFFER_SIZE: usize = 32;

/// Growable byte store with a shared read/write cursor.
///
/// Bits are packed LSB first into the byte under the cursor. Any typed access
/// first realigns to the next whole byte, so a multi-byte value never straddles
/// a partially written byte. Typed values are copied in host byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Vec<u8>,
    current_byte: usize,
    current_bit: u8,
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(size: usize) -> Self {
        Self {
            data: vec![0; size],
            current_byte: 0,
            current_bit: 0,
        }
    }

    /// Takes ownership of received bytes. The cursor starts at the front, ready
    /// for reading.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            current_byte: 0,
            current_bit: 0,
        }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_bytes(data.to_vec())
    }

    /// Writes `value` at the cursor and returns the offset it was written at,
    /// so it can be patched later with [`ByteBuffer::write_at`].
    pub fn write<T: Pod>(&mut self, value: T) -> usize {
        let size = size_of::<T>();
        self.align_and_expand(size);

        let offset = self.current_byte;
        self.data[offset..offset + size].copy_from_slice(bytemuck::bytes_of(&value));
        self.current_byte += size;

        offset
    }

    /// Overwrites a value previously written at `offset`. Cursors are untouched.
    pub fn write_at<T: Pod>(&mut self, offset: usize, value: T) {
        let size = size_of::<T>();
        assert!(
            offset + size <= self.data.len(),
            "patch of {} bytes at {} exceeds allocated size {}",
            size,
            offset,
            self.data.len()
        );
        self.data[offset..offset + size].copy_from_slice(bytemuck::bytes_of(&value));
    }

    pub fn read<T: Pod>(&mut self) -> T {
        self.align_bit_index();

        let size = size_of::<T>();
        self.check_remaining(size);

        let start = self.current_byte;
        let value = bytemuck::pod_read_unaligned(&self.data[start..start + size]);
        self.current_byte += size;

        value
    }

    pub fn write_bit(&mut self, value: bool) {
        if self.current_bit == 0 {
            self.expand(1);
            self.data[self.current_byte] = 0;
        }

        if value {
            self.data[self.current_byte] |= 1 << self.current_bit;
        }

        self.advance_bit();
    }

    pub fn read_bit(&mut self) -> bool {
        self.check_remaining(1);

        let bit = self.data[self.current_byte] & (1 << self.current_bit) != 0;
        self.advance_bit();

        bit
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.align_and_expand(bytes.len());

        let start = self.current_byte;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.current_byte += bytes.len();
    }

    pub fn read_bytes(&mut self, length: usize) -> &[u8] {
        self.align_bit_index();
        self.check_remaining(length);

        let start = self.current_byte;
        self.current_byte += length;
        &self.data[start..start + length]
    }

    pub fn write_string(&mut self, value: &str) {
        assert!(
            !value.as_bytes().contains(&0),
            "strings written to a ByteBuffer cannot contain NUL"
        );

        let bytes = value.as_bytes();
        self.align_and_expand(bytes.len() + 1);

        let start = self.current_byte;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.data[start + bytes.len()] = 0;
        self.current_byte += bytes.len() + 1;
    }

    /// Returns the NUL-terminated string at the cursor and moves past the
    /// terminator. Borrowed unless the bytes are not valid UTF-8.
    pub fn read_string(&mut self) -> Cow<'_, str> {
        let start = self.current_byte;
        self.try_read_string()
            .unwrap_or_else(|| panic!("unterminated string at offset {}", start))
    }

    /// Like [`ByteBuffer::read_string`], but returns `None` without moving the
    /// cursor when no terminator is left in the buffer.
    pub fn try_read_string(&mut self) -> Option<Cow<'_, str>> {
        self.align_bit_index();

        let start = self.current_byte.min(self.data.len());
        let length = self.data[start..].iter().position(|&byte| byte == 0)?;

        self.current_byte = start + length + 1;
        Some(String::from_utf8_lossy(&self.data[start..start + length]))
    }

    /// Trims the allocation to exactly [`ByteBuffer::current_size`].
    pub fn shrink(&mut self) {
        let size = self.current_size();
        self.data.truncate(size);
        self.data.shrink_to_fit();
    }

    pub fn start_read(&mut self) {
        self.current_byte = 0;
        self.current_bit = 0;
    }

    pub fn end(&self) -> bool {
        self.current_byte == self.data.len()
    }

    pub fn current_size(&self) -> usize {
        self.current_byte + usize::from(self.current_bit != 0)
    }

    pub fn allocated_size(&self) -> usize {
        self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.current_size())
    }

    /// Bytes written so far. This is what goes on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.current_size()]
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.shrink();
        self.data
    }

    fn check_remaining(&self, size: usize) {
        assert!(
            self.current_byte + size <= self.data.len(),
            "read of {} bytes at {} exceeds allocated size {}",
            size,
            self.current_byte,
            self.data.len()
        );
    }

    fn advance_bit(&mut self) {
        self.current_bit += 1;
        if self.current_bit == 8 {
            self.current_bit = 0;
            self.current_byte += 1;
        }
    }

    fn align_bit_index(&mut self) {
        if self.current_bit != 0 {
            self.current_byte += 1;
            self.current_bit = 0;
        }
    }

    fn align_and_expand(&mut self, size: usize) {
        self.align_bit_index();
        self.expand(size);
    }

    fn expand(&mut self, size: usize) {
        let needed = self.current_byte + size;
        if needed > self.data.len() {
            let mut new_size = self.data.len().max(1);
            while new_size < needed {
                new_size *= 2;
            }
            self.data.resize(new_size, 0);
        }
    }
}

impl Index<usize> for ByteBuffer {
    type Output = u8;

    fn index(&self, index: usize) -> &u8 {
        &self.data[index]
    }
}

impl IndexMut<usize> for ByteBuffer {
    fn index_mut(&mut self, index: usize) -> &mut u8 {
        &mut self.data[index]
    }
}
