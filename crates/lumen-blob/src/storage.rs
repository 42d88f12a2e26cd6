//! Arc-based storage for blob planes.
//!
//! A [`BlobStorage`] is a reference-counted float buffer plus an element
//! window into it. Cloning is a reference-count increment, so channel views
//! share the allocation of the blob they were taken from and keep it alive.

use std::{alloc::Layout, mem::ManuallyDrop, ptr::NonNull, sync::Arc};

use crate::allocator::{blob_layout, BlobAllocator, BlobAllocatorError};

/// Alignment in bytes of every blob allocation and of every plane inside it.
pub const BLOB_ALIGN: usize = 16;

/// Where the memory of a storage came from, which decides how it is released.
#[derive(Debug, Clone, Copy)]
enum Origin {
    /// Allocated through a [`BlobAllocator`] with the given layout.
    Allocator(Layout),
    /// Adopted from a `Vec<f32>` with the given capacity.
    Vec(usize),
    /// Zero-length storage with a dangling pointer, nothing to release.
    Dangling,
}

struct StorageImpl<A: BlobAllocator> {
    /// Pointer to the first element, never null.
    ptr: NonNull<f32>,
    /// Number of initialized elements.
    len: usize,
    origin: Origin,
    alloc: A,
}

impl<A: BlobAllocator> Drop for StorageImpl<A> {
    fn drop(&mut self) {
        match self.origin {
            Origin::Allocator(layout) => {
                // SAFETY: the buffer came from `allocate_zeroed` with this layout
                unsafe { self.alloc.deallocate(self.ptr.cast(), layout) }
            }
            Origin::Vec(capacity) => {
                // SAFETY: ptr, len and capacity come from a Vec<f32> that was
                // forgotten in `from_vec`, this is the last reference to it.
                unsafe { drop(Vec::from_raw_parts(self.ptr.as_ptr(), self.len, capacity)) }
            }
            Origin::Dangling => {}
        }
    }
}

/// Reference-counted float buffer with an element window.
///
/// # Thread Safety
///
/// `BlobStorage` is `Send + Sync`. Shared access only hands out `&[f32]`;
/// mutable access requires `&mut self` and a uniquely owned allocation.
pub struct BlobStorage<A: BlobAllocator> {
    inner: Arc<StorageImpl<A>>,
    /// Offset of the window in elements.
    offset: usize,
    /// Length of the window in elements.
    len: usize,
}

// SAFETY: the raw buffer is plain f32 data, reads go through &self and writes
// through &mut self on a uniquely owned Arc.
unsafe impl<A: BlobAllocator> Send for BlobStorage<A> {}

// SAFETY: see the Send impl above.
unsafe impl<A: BlobAllocator> Sync for BlobStorage<A> {}

impl<A: BlobAllocator> BlobStorage<A> {
    /// Allocates a zero-initialized storage of `len` elements.
    ///
    /// # Arguments
    ///
    /// * `len` - The number of f32 elements.
    /// * `alloc` - The allocator used for the buffer. Kept to release it.
    ///
    /// # Errors
    ///
    /// Returns an error if the layout overflows or the allocator fails.
    pub fn new(len: usize, alloc: A) -> Result<Self, BlobAllocatorError> {
        if len == 0 {
            return Ok(Self::wrap(NonNull::dangling(), 0, Origin::Dangling, alloc));
        }

        let layout = blob_layout(len)?;
        let ptr = alloc.allocate_zeroed(layout)?.cast::<f32>();
        Ok(Self::wrap(ptr, len, Origin::Allocator(layout), alloc))
    }

    /// Adopts a vector as storage without copying its data.
    pub fn from_vec(vec: Vec<f32>, alloc: A) -> Self {
        let mut vec = ManuallyDrop::new(vec);
        let len = vec.len();
        let capacity = vec.capacity();
        // SAFETY: Vec pointers are never null, even when empty
        let ptr = unsafe { NonNull::new_unchecked(vec.as_mut_ptr()) };
        Self::wrap(ptr, len, Origin::Vec(capacity), alloc)
    }

    fn wrap(ptr: NonNull<f32>, len: usize, origin: Origin, alloc: A) -> Self {
        Self {
            inner: Arc::new(StorageImpl {
                ptr,
                len,
                origin,
                alloc,
            }),
            offset: 0,
            len,
        }
    }

    /// Creates a view of `len` elements starting at `offset` within this window.
    ///
    /// The view shares the allocation and extends its lifetime.
    ///
    /// Returns `None` if the requested window exceeds the current one.
    pub fn view(&self, offset: usize, len: usize) -> Option<Self> {
        let end = offset.checked_add(len)?;
        if end > self.len {
            return None;
        }
        Some(Self {
            inner: Arc::clone(&self.inner),
            offset: self.offset + offset,
            len,
        })
    }

    /// Returns the allocator that owns the buffer.
    #[inline]
    pub fn alloc(&self) -> &A {
        &self.inner.alloc
    }

    /// Returns the number of elements in the window.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the window holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the offset of the window into the allocation, in elements.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns true if no other storage shares this allocation.
    #[inline]
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }

    /// Returns the data pointer of the window.
    #[inline]
    pub fn as_ptr(&self) -> *const f32 {
        // SAFETY: offset + len <= inner.len is upheld by `view`
        unsafe { self.inner.ptr.as_ptr().add(self.offset) }
    }

    /// Returns the window as a slice.
    pub fn as_slice(&self) -> &[f32] {
        // SAFETY: the window lies within the initialized allocation
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    /// Returns the window as a mutable slice.
    ///
    /// # Panics
    ///
    /// Panics if the allocation is shared with another storage, for example a
    /// channel view that is still alive.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        assert!(
            self.is_unique(),
            "Cannot get mutable slice when blob storage is shared. Drop the views first."
        );
        // SAFETY: the allocation is uniquely owned and the window is in bounds
        unsafe {
            std::slice::from_raw_parts_mut(self.inner.ptr.as_ptr().add(self.offset), self.len)
        }
    }
}

impl<A: BlobAllocator> Clone for BlobStorage<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            offset: self.offset,
            len: self.len,
        }
    }
}

impl<A: BlobAllocator> std::fmt::Debug for BlobStorage<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStorage")
            .field("ptr", &self.inner.ptr)
            .field("origin", &self.inner.origin)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("is_unique", &self.is_unique())
            .finish()
    }
}
