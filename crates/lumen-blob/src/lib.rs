#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Overview
//!
//! `lumen-blob` provides the [`Blob`], the single tensor type passed between
//! layers: input activations, decoded weights, bias vectors and outputs.
//!
//! - **Blob**: `c` planes of `w x h` floats, each plane `cstep` elements apart
//! - **BlobStorage**: reference-counted buffer with zero-copy windows
//! - **BlobAllocator**: pluggable allocation so failures surface as errors
//!
//! ```rust
//! use lumen_blob::{Blob, CpuAllocator};
//!
//! let blob = Blob::new(5, 5, 2, CpuAllocator).unwrap();
//! let ch0 = blob.channel(0);
//! assert_eq!(ch0.plane(0).len(), 25);
//! ```

/// Allocator module containing memory management utilities.
pub mod allocator;

/// Blob module containing the tensor type.
pub mod blob;

/// Error types for blob operations.
pub mod error;

/// Operations producing new blobs from existing ones.
pub mod ops;

/// Storage module containing the shared buffer implementation.
pub mod storage;

pub use crate::allocator::{blob_layout, BlobAllocator, BlobAllocatorError, CpuAllocator};
pub use crate::blob::Blob;
pub use crate::error::BlobError;

/// Round `size` up to the next multiple of `align`.
///
/// `align` must be a power of two.
#[inline]
pub fn align_size(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

/// Like [`align_size`], returning `None` when the rounded size overflows.
#[inline]
pub fn checked_align_size(size: usize, align: usize) -> Option<usize> {
    size.checked_add(align - 1).map(|s| s & !(align - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_size() {
        assert_eq!(align_size(0, 4), 0);
        assert_eq!(align_size(1, 4), 4);
        assert_eq!(align_size(4, 4), 4);
        assert_eq!(align_size(18, 4), 20);
        assert_eq!(align_size(100, 16), 112);
    }

    #[test]
    fn test_checked_align_size() {
        assert_eq!(checked_align_size(18, 4), Some(20));
        assert_eq!(checked_align_size(usize::MAX - 3, 4), Some(usize::MAX - 3));
        assert_eq!(checked_align_size(usize::MAX - 2, 4), None);
    }
}
