use lumen_blob::BlobError;
use lumen_model::ModelError;
use thiserror::Error;

/// An error type for layer operations.
#[derive(Error, Debug)]
pub enum LayerError {
    /// Loading parameters or weights failed.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// A blob could not be created.
    #[error(transparent)]
    Blob(#[from] BlobError),

    /// `forward` was called before the weights were installed.
    #[error("Layer weights are not loaded")]
    NotLoaded,

    /// The input blob has no elements.
    #[error("Input blob is empty")]
    EmptyInput,

    /// The weight blob does not hold the values the layer needs.
    #[error("Weight data has {actual} values, expected {expected}")]
    WeightShape {
        /// Values required by the layer.
        expected: usize,
        /// Values present.
        actual: usize,
    },

    /// The bias blob does not hold one value per output channel.
    #[error("Bias data has {actual} values, expected {expected}")]
    BiasShape {
        /// Values required by the layer.
        expected: usize,
        /// Values present.
        actual: usize,
    },

    /// A hyper-parameter makes the layer undefined.
    #[error("Invalid layer configuration: {0}")]
    InvalidConfig(&'static str),

    /// Trimming the padding would leave no output pixels.
    #[error("Padding {pad} leaves no output for a {w}x{h} plane")]
    InvalidOutputShape {
        /// Untrimmed width.
        w: usize,
        /// Untrimmed height.
        h: usize,
        /// Padding removed from each side.
        pad: usize,
    },
}

impl LayerError {
    /// Returns true if the error comes from a failed allocation.
    pub fn is_out_of_memory(&self) -> bool {
        match self {
            LayerError::Blob(e) => e.is_out_of_memory(),
            LayerError::Model(e) => e.is_out_of_memory(),
            _ => false,
        }
    }
}
