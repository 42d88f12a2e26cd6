use lumen_blob::BlobError;

/// An error type for model loading.
#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    /// The model data ended before the block being read was complete.
    #[error("Unexpected end of model data while reading {what}: needed {needed} bytes, {available} available")]
    Truncated {
        /// The part of the weight block being read.
        what: &'static str,
        /// Bytes required by the format.
        needed: usize,
        /// Bytes that were left in the source.
        available: usize,
    },

    /// The underlying stream failed.
    #[error("Failed to read model data. {0}")]
    Io(#[from] std::io::Error),

    /// The destination blob could not be created.
    #[error("Failed to create blob. {0}")]
    Blob(#[from] BlobError),

    /// A parameter holds a value of the wrong kind or range.
    #[error("Invalid value for parameter {id}: {reason}")]
    InvalidParam {
        /// The parameter key.
        id: u32,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ModelError {
    /// Returns true if the error comes from a failed allocation.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, ModelError::Blob(e) if e.is_out_of_memory())
    }

    /// Returns true if the model data was too short.
    pub fn is_truncated(&self) -> bool {
        matches!(self, ModelError::Truncated { .. })
    }
}
