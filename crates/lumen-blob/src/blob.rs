use rayon::prelude::*;

use crate::{
    allocator::{BlobAllocator, BlobAllocatorError, CpuAllocator},
    checked_align_size,
    error::BlobError,
    storage::{BlobStorage, BLOB_ALIGN},
};

/// A three-axis float tensor made of `c` planes of `h` rows and `w` columns.
///
/// Planes are stored one after another, each occupying `cstep` elements with
/// `cstep >= w * h`. Blobs created with [`Blob::new`] pad `cstep` so every
/// plane starts on a [`BLOB_ALIGN`] byte boundary.
///
/// Cloning a blob is cheap: the clone shares the underlying buffer. So do the
/// views returned by [`Blob::channel`].
///
/// # Example
///
/// ```rust
/// use lumen_blob::{Blob, CpuAllocator};
///
/// let mut blob = Blob::new(3, 2, 2, CpuAllocator).unwrap();
/// assert_eq!(blob.cstep(), 8);
///
/// blob.fill_channel(1, 2.0);
/// assert_eq!(blob.plane(1), &[2.0; 6]);
/// assert_eq!(blob.plane(0), &[0.0; 6]);
/// ```
#[derive(Clone, Debug)]
pub struct Blob<A: BlobAllocator = CpuAllocator> {
    storage: BlobStorage<A>,
    w: usize,
    h: usize,
    c: usize,
    cstep: usize,
}

impl<A: BlobAllocator + Default> Default for Blob<A> {
    fn default() -> Self {
        Self::empty(A::default())
    }
}

impl<A: BlobAllocator> Blob<A> {
    /// Creates the empty blob, holding no planes and no memory.
    pub fn empty(alloc: A) -> Self {
        Self {
            storage: BlobStorage::from_vec(Vec::new(), alloc),
            w: 0,
            h: 0,
            c: 0,
            cstep: 0,
        }
    }

    /// Allocates a zero-filled blob with `c` aligned planes of `w x h` elements.
    ///
    /// # Arguments
    ///
    /// * `w` - The plane width.
    /// * `h` - The plane height.
    /// * `c` - The number of channels.
    /// * `alloc` - The allocator used for the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::AllocationFailed`] if the buffer cannot be allocated,
    /// including shapes whose size does not fit in memory.
    pub fn new(w: usize, h: usize, c: usize, alloc: A) -> Result<Self, BlobError> {
        let elem = std::mem::size_of::<f32>();
        let cstep = w
            .checked_mul(h)
            .and_then(|n| n.checked_mul(elem))
            .and_then(|bytes| checked_align_size(bytes, BLOB_ALIGN))
            .map(|bytes| bytes / elem)
            .ok_or(BlobAllocatorError::TooLarge)?;
        let len = cstep.checked_mul(c).ok_or(BlobAllocatorError::TooLarge)?;
        let storage = BlobStorage::new(len, alloc)?;
        Ok(Self {
            storage,
            w,
            h,
            c,
            cstep,
        })
    }

    /// Allocates a zero-filled one-dimensional blob of `w` elements.
    pub fn new_1d(w: usize, alloc: A) -> Result<Self, BlobError> {
        let storage = BlobStorage::new(w, alloc)?;
        Ok(Self {
            storage,
            w,
            h: 1,
            c: 1,
            cstep: w,
        })
    }

    /// Wraps a vector of packed planes without copying it.
    ///
    /// The planes are expected back to back, so the resulting `cstep` is `w * h`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::InvalidShape`] if `data.len() != w * h * c`.
    pub fn from_vec(
        w: usize,
        h: usize,
        c: usize,
        data: Vec<f32>,
        alloc: A,
    ) -> Result<Self, BlobError> {
        let expected = w.checked_mul(h).and_then(|n| n.checked_mul(c));
        if expected != Some(data.len()) {
            return Err(BlobError::InvalidShape(
                data.len(),
                expected.unwrap_or(usize::MAX),
            ));
        }
        Ok(Self {
            storage: BlobStorage::from_vec(data, alloc),
            w,
            h,
            c,
            cstep: w * h,
        })
    }

    /// Wraps a vector as a one-dimensional blob without copying it.
    pub fn from_vec_1d(data: Vec<f32>, alloc: A) -> Self {
        let w = data.len();
        Self {
            storage: BlobStorage::from_vec(data, alloc),
            w,
            h: 1,
            c: 1,
            cstep: w,
        }
    }

    /// Expands the first `len` half-precision codes into a one-dimensional blob.
    ///
    /// Trailing codes beyond `len`, such as alignment padding, are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::InvalidShape`] if fewer than `len` codes are given,
    /// or [`BlobError::AllocationFailed`] if the blob cannot be allocated.
    pub fn from_float16(codes: &[u16], len: usize, alloc: A) -> Result<Self, BlobError> {
        if codes.len() < len {
            return Err(BlobError::InvalidShape(codes.len(), len));
        }
        let mut blob = Self::new_1d(len, alloc)?;
        blob.as_mut_slice()
            .iter_mut()
            .zip(codes.iter())
            .for_each(|(dst, &code)| *dst = half::f16::from_bits(code).to_f32());
        Ok(blob)
    }

    /// Returns the plane width.
    #[inline]
    pub fn w(&self) -> usize {
        self.w
    }

    /// Returns the plane height.
    #[inline]
    pub fn h(&self) -> usize {
        self.h
    }

    /// Returns the number of channels.
    #[inline]
    pub fn c(&self) -> usize {
        self.c
    }

    /// Returns the distance in elements between the starts of two planes.
    #[inline]
    pub fn cstep(&self) -> usize {
        self.cstep
    }

    /// Returns the number of elements in the buffer, padding included.
    #[inline]
    pub fn total(&self) -> usize {
        self.cstep * self.c
    }

    /// Returns true for the empty blob, which must not be used as data.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Returns the allocator backing this blob.
    #[inline]
    pub fn alloc(&self) -> &A {
        self.storage.alloc()
    }

    /// Returns the whole buffer, padding between planes included.
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        self.storage.as_slice()
    }

    /// Returns the whole buffer mutably.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is shared with a clone or a channel view.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        self.storage.as_mut_slice()
    }

    /// Returns a one-channel blob sharing plane `i` of this blob.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.c()`. Callers are expected to stay in range.
    pub fn channel(&self, i: usize) -> Blob<A> {
        assert!(i < self.c, "channel {i} out of range for {} channels", self.c);
        let storage = self
            .storage
            .view(i * self.cstep, self.cstep)
            .unwrap_or_else(|| unreachable!("plane {i} lies within the buffer"));
        Blob {
            storage,
            w: self.w,
            h: self.h,
            c: 1,
            cstep: self.cstep,
        }
    }

    /// Returns the `w * h` elements of plane `i`.
    #[inline]
    pub fn plane(&self, i: usize) -> &[f32] {
        let start = i * self.cstep;
        &self.as_slice()[start..start + self.w * self.h]
    }

    /// Returns the `w * h` elements of plane `i` mutably.
    #[inline]
    pub fn plane_mut(&mut self, i: usize) -> &mut [f32] {
        let start = i * self.cstep;
        let len = self.w * self.h;
        &mut self.as_mut_slice()[start..start + len]
    }

    /// Returns row `y` of plane `i`.
    #[inline]
    pub fn row(&self, i: usize, y: usize) -> &[f32] {
        let start = i * self.cstep + y * self.w;
        &self.as_slice()[start..start + self.w]
    }

    /// Iterates over the planes, padding excluded.
    pub fn planes(&self) -> impl Iterator<Item = &[f32]> + '_ {
        let len = self.w * self.h;
        self.as_slice()
            .chunks(self.cstep.max(1))
            .map(move |plane| &plane[..len])
    }

    /// Iterates over the planes mutably, padding excluded.
    pub fn planes_mut(&mut self) -> impl Iterator<Item = &mut [f32]> + '_ {
        let len = self.w * self.h;
        let cstep = self.cstep.max(1);
        self.as_mut_slice()
            .chunks_mut(cstep)
            .map(move |plane| &mut plane[..len])
    }

    /// Iterates over the planes mutably and in parallel, padding excluded.
    ///
    /// Every item is a disjoint region, which makes it the unit of work for
    /// per-channel kernels.
    pub fn par_planes_mut(&mut self) -> impl IndexedParallelIterator<Item = &mut [f32]> + '_ {
        let len = self.w * self.h;
        let cstep = self.cstep.max(1);
        self.as_mut_slice()
            .par_chunks_mut(cstep)
            .map(move |plane| &mut plane[..len])
    }

    /// Sets every element of the buffer to `value`.
    pub fn fill(&mut self, value: f32) {
        self.as_mut_slice().fill(value);
    }

    /// Sets every element of plane `i` to `value`.
    pub fn fill_channel(&mut self, i: usize, value: f32) {
        self.plane_mut(i).fill(value);
    }

    /// Copies the planes into a packed vector of `w * h * c` elements.
    pub fn to_packed_vec(&self) -> Vec<f32> {
        self.planes().flatten().copied().collect()
    }
}

impl<A: BlobAllocator> std::ops::Index<usize> for Blob<A> {
    type Output = f32;

    fn index(&self, index: usize) -> &Self::Output {
        &self.as_slice()[index]
    }
}

impl<A: BlobAllocator> std::ops::IndexMut<usize> for Blob<A> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.as_mut_slice()[index]
    }
}
