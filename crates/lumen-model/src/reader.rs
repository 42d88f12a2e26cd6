//! Cursors over serialized model data.
//!
//! Weights can be loaded from a sequential stream ([`StreamReader`]) or from a
//! model image already in memory ([`MemReader`]). Both decode little-endian
//! values with the same rules and count consumed bytes the same way, so a
//! model loads identically through either path.

use std::io::{ErrorKind, Read};

use byteorder::{ByteOrder, LittleEndian};

use lumen_blob::{BlobAllocatorError, BlobError};

use crate::error::ModelError;

/// A forward-only cursor over model bytes.
///
/// Every read either fills its destination completely or fails. A failed read
/// leaves the cursor in an unspecified position and the load must be aborted.
pub trait ModelReader {
    /// Fills `buf` with the next `buf.len()` bytes.
    ///
    /// # Arguments
    ///
    /// * `buf` - The destination buffer.
    /// * `what` - The name of the field being read, used in errors.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Truncated`] if fewer bytes are available.
    fn read_bytes(&mut self, buf: &mut [u8], what: &'static str) -> Result<(), ModelError>;

    /// Returns the number of bytes consumed so far.
    fn consumed(&self) -> usize;

    /// Fails early when the source is known to hold fewer than `len` more bytes.
    ///
    /// Sources of unknown length accept any request; their reads fail later.
    fn ensure_available(&self, _len: usize, _what: &'static str) -> Result<(), ModelError> {
        Ok(())
    }

    /// Reads a four byte tag.
    fn read_tag(&mut self) -> Result<[u8; 4], ModelError> {
        let mut tag = [0u8; 4];
        self.read_bytes(&mut tag, "weight tag")?;
        Ok(tag)
    }

    /// Reads `dst.len()` little-endian f32 values.
    fn read_f32_into(&mut self, dst: &mut [f32], what: &'static str) -> Result<(), ModelError> {
        let mut bytes = staging_buffer::<u8>(std::mem::size_of_val(dst))?;
        self.read_bytes(&mut bytes, what)?;
        LittleEndian::read_f32_into(&bytes, dst);
        Ok(())
    }

    /// Reads `dst.len()` little-endian u16 values.
    fn read_u16_into(&mut self, dst: &mut [u16], what: &'static str) -> Result<(), ModelError> {
        let mut bytes = staging_buffer::<u8>(std::mem::size_of_val(dst))?;
        self.read_bytes(&mut bytes, what)?;
        LittleEndian::read_u16_into(&bytes, dst);
        Ok(())
    }

    /// Reads `len` raw bytes into a new vector.
    fn read_byte_vec(&mut self, len: usize, what: &'static str) -> Result<Vec<u8>, ModelError> {
        self.ensure_available(len, what)?;
        let mut bytes = staging_buffer(len)?;
        self.read_bytes(&mut bytes, what)?;
        Ok(bytes)
    }
}

/// Allocates a zeroed buffer of `len` items, reporting failure as an error.
pub(crate) fn staging_buffer<T: Copy + Default>(len: usize) -> Result<Vec<T>, ModelError> {
    let bytes = len
        .checked_mul(std::mem::size_of::<T>())
        .ok_or(BlobError::AllocationFailed(BlobAllocatorError::TooLarge))?;

    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| BlobError::AllocationFailed(BlobAllocatorError::OutOfMemory { bytes }))?;
    buf.resize(len, T::default());
    Ok(buf)
}

impl<T: ModelReader + ?Sized> ModelReader for &mut T {
    fn read_bytes(&mut self, buf: &mut [u8], what: &'static str) -> Result<(), ModelError> {
        (**self).read_bytes(buf, what)
    }

    fn consumed(&self) -> usize {
        (**self).consumed()
    }

    fn ensure_available(&self, len: usize, what: &'static str) -> Result<(), ModelError> {
        (**self).ensure_available(len, what)
    }

    fn read_f32_into(&mut self, dst: &mut [f32], what: &'static str) -> Result<(), ModelError> {
        (**self).read_f32_into(dst, what)
    }

    fn read_u16_into(&mut self, dst: &mut [u16], what: &'static str) -> Result<(), ModelError> {
        (**self).read_u16_into(dst, what)
    }
}

/// Sequential reader over any [`Read`] source, such as a buffered file.
///
/// # Example
///
/// ```rust
/// use lumen_model::reader::{ModelReader, StreamReader};
///
/// let bytes = [0u8, 0, 128, 63];
/// let mut reader = StreamReader::new(&bytes[..]);
/// let mut value = [0.0f32];
/// reader.read_f32_into(&mut value, "value").unwrap();
/// assert_eq!(value, [1.0]);
/// assert_eq!(reader.consumed(), 4);
/// ```
pub struct StreamReader<R: Read> {
    inner: R,
    consumed: usize,
}

impl<R: Read> StreamReader<R> {
    /// Wraps a stream, starting the byte count at zero.
    pub fn new(inner: R) -> Self {
        Self { inner, consumed: 0 }
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> ModelReader for StreamReader<R> {
    fn read_bytes(&mut self, buf: &mut [u8], what: &'static str) -> Result<(), ModelError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(ModelError::Truncated {
                        what,
                        needed: buf.len(),
                        available: filled,
                    })
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.consumed += buf.len();
        Ok(())
    }

    fn consumed(&self) -> usize {
        self.consumed
    }
}

/// Bounds-checked cursor over a model image held in memory.
///
/// # Example
///
/// ```rust
/// use lumen_model::reader::{MemReader, ModelReader};
///
/// let image = [1u8, 2, 3];
/// let mut reader = MemReader::new(&image);
/// assert!(reader.read_tag().is_err());
/// ```
pub struct MemReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MemReader<'a> {
    /// Creates a cursor at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Returns the bytes not consumed yet.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Advances past the next `len` bytes and returns them.
    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], ModelError> {
        self.ensure_available(len, what)?;
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}

impl ModelReader for MemReader<'_> {
    fn read_bytes(&mut self, buf: &mut [u8], what: &'static str) -> Result<(), ModelError> {
        let bytes = self.take(buf.len(), what)?;
        buf.copy_from_slice(bytes);
        Ok(())
    }

    fn consumed(&self) -> usize {
        self.pos
    }

    fn ensure_available(&self, len: usize, what: &'static str) -> Result<(), ModelError> {
        let available = self.data.len() - self.pos;
        if len > available {
            return Err(ModelError::Truncated {
                what,
                needed: len,
                available,
            });
        }
        Ok(())
    }

    fn read_f32_into(&mut self, dst: &mut [f32], what: &'static str) -> Result<(), ModelError> {
        let bytes = self.take(std::mem::size_of_val(dst), what)?;
        LittleEndian::read_f32_into(bytes, dst);
        Ok(())
    }

    fn read_u16_into(&mut self, dst: &mut [u16], what: &'static str) -> Result<(), ModelError> {
        let bytes = self.take(std::mem::size_of_val(dst), what)?;
        LittleEndian::read_u16_into(bytes, dst);
        Ok(())
    }
}
