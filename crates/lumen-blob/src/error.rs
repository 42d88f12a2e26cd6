use crate::allocator::BlobAllocatorError;

/// An error type for blob operations.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum BlobError {
    /// The blob buffer could not be allocated.
    #[error("Failed to allocate blob storage: {0}")]
    AllocationFailed(#[from] BlobAllocatorError),

    /// The data length does not match the requested shape.
    #[error("Data length ({0}) does not match the blob size ({1})")]
    InvalidShape(usize, usize),

    /// The requested border leaves nothing of the plane.
    #[error("Border (top {top}, bottom {bottom}, left {left}, right {right}) is larger than the {w}x{h} plane")]
    InvalidBorder {
        /// Rows removed at the top.
        top: usize,
        /// Rows removed at the bottom.
        bottom: usize,
        /// Columns removed on the left.
        left: usize,
        /// Columns removed on the right.
        right: usize,
        /// Plane width.
        w: usize,
        /// Plane height.
        h: usize,
    },
}

impl BlobError {
    /// Returns true if the error comes from a failed allocation.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, BlobError::AllocationFailed(_))
    }
}
