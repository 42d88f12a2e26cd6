//! Allocation of blob buffers.
//!
//! A blob buffer is requested as a count of f32 elements and turned into a
//! [`BLOB_ALIGN`]-aligned layout by [`blob_layout`]. The allocator only sees
//! that layout and hands back zero-filled memory, so a blob is usable as soon
//! as it exists. Every failure, an oversized request included, comes back as a
//! [`BlobAllocatorError`] the caller can act on.

use std::{alloc::Layout, ptr::NonNull};

use crate::storage::BLOB_ALIGN;

/// Why a blob buffer could not be obtained.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum BlobAllocatorError {
    /// The requested size does not fit in an addressable buffer.
    #[error("Requested blob size exceeds the addressable memory")]
    TooLarge,

    /// The allocator has no memory left for the request.
    #[error("Out of memory while allocating {bytes} bytes of blob storage")]
    OutOfMemory {
        /// Size of the rejected request.
        bytes: usize,
    },
}

/// Source of zero-filled blob memory.
///
/// Planes of one blob are written from several worker threads, and blobs move
/// freely between threads, so allocators are `Send + Sync`.
pub trait BlobAllocator: Clone + Send + Sync + 'static {
    /// Returns zero-filled memory for `layout`. The layout size is never zero.
    fn allocate_zeroed(&self, layout: Layout) -> Result<NonNull<u8>, BlobAllocatorError>;

    /// Releases memory returned by [`BlobAllocator::allocate_zeroed`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate_zeroed` on an equal allocator called with
    /// the same `layout`, and must not be released twice.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Blob allocator backed by the global system allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuAllocator;

impl BlobAllocator for CpuAllocator {
    fn allocate_zeroed(&self, layout: Layout) -> Result<NonNull<u8>, BlobAllocatorError> {
        // SAFETY: blob layouts always have a non-zero size
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or(BlobAllocatorError::OutOfMemory {
            bytes: layout.size(),
        })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: upheld by the caller
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

/// Layout of a buffer holding `elements` f32 values, aligned to [`BLOB_ALIGN`].
///
/// # Errors
///
/// Returns [`BlobAllocatorError::TooLarge`] if the byte size overflows.
pub fn blob_layout(elements: usize) -> Result<Layout, BlobAllocatorError> {
    Layout::array::<f32>(elements)
        .and_then(|layout| layout.align_to(BLOB_ALIGN))
        .map_err(|_| BlobAllocatorError::TooLarge)
}
