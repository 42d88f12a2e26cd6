use rayon::prelude::*;

use crate::{allocator::BlobAllocator, blob::Blob, error::BlobError};

/// Copy a blob while removing a border from every plane.
///
/// The result is a fresh blob of `(w - left - right) x (h - top - bottom)`
/// planes allocated with the allocator of `src`.
///
/// # Arguments
///
/// * `src` - The source blob.
/// * `top` - Rows removed at the top.
/// * `bottom` - Rows removed at the bottom.
/// * `left` - Columns removed on the left.
/// * `right` - Columns removed on the right.
///
/// # Errors
///
/// Returns [`BlobError::InvalidBorder`] if the border leaves no pixels, or
/// [`BlobError::AllocationFailed`] if the destination cannot be allocated.
///
/// # Example
///
/// ```rust
/// use lumen_blob::{ops::copy_cut_border, Blob, CpuAllocator};
///
/// let src = Blob::from_vec(4, 3, 1, (0..12).map(|v| v as f32).collect(), CpuAllocator).unwrap();
/// let dst = copy_cut_border(&src, 1, 1, 1, 1).unwrap();
///
/// assert_eq!((dst.w(), dst.h()), (2, 1));
/// assert_eq!(dst.plane(0), &[5.0, 6.0]);
/// ```
pub fn copy_cut_border<A: BlobAllocator>(
    src: &Blob<A>,
    top: usize,
    bottom: usize,
    left: usize,
    right: usize,
) -> Result<Blob<A>, BlobError> {
    let (w, h) = (src.w(), src.h());
    if left + right >= w || top + bottom >= h {
        return Err(BlobError::InvalidBorder {
            top,
            bottom,
            left,
            right,
            w,
            h,
        });
    }

    let outw = w - left - right;
    let outh = h - top - bottom;

    let mut dst = Blob::new(outw, outh, src.c(), src.alloc().clone())?;

    dst.par_planes_mut()
        .enumerate()
        .for_each(|(q, dst_plane)| {
            let src_plane = src.plane(q);
            dst_plane
                .chunks_exact_mut(outw)
                .enumerate()
                .for_each(|(y, dst_row)| {
                    let offset = (y + top) * w + left;
                    dst_row.copy_from_slice(&src_plane[offset..offset + outw]);
                });
        });

    Ok(dst)
}
