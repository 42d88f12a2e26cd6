use lumen_blob::{Blob, BlobAllocator, CpuAllocator};
use lumen_model::{ModelReader, ParamDict};

use crate::{deconvolution::Deconvolution, error::LayerError};

/// The capabilities every layer exposes to a network executor.
///
/// A layer is configured once with [`Layer::load_param`], receives its weights
/// with [`Layer::load_model`] and can then run [`Layer::forward`] any number of
/// times, possibly from several threads.
pub trait Layer<A: BlobAllocator = CpuAllocator>: Send + Sync {
    /// The registered type name of the layer.
    fn type_name(&self) -> &'static str;

    /// Returns true if the layer consumes one blob and produces one blob.
    fn one_blob_only(&self) -> bool {
        false
    }

    /// Returns true if the layer can overwrite its input.
    fn support_inplace(&self) -> bool {
        false
    }

    /// Reads the hyper-parameters of the layer.
    fn load_param(&mut self, pd: &ParamDict) -> Result<(), LayerError>;

    /// Reads the learnable parameters from the model.
    ///
    /// On failure the previously installed weights are kept.
    fn load_model(&mut self, reader: &mut dyn ModelReader) -> Result<(), LayerError>;

    /// Computes the output blob. The input is never modified.
    fn forward(&self, input: &Blob<A>) -> Result<Blob<A>, LayerError>;
}

/// Creates an unconfigured layer from its type name.
///
/// Returns `None` for unknown types.
///
/// # Example
///
/// ```rust
/// use lumen_nn::layer::create_layer;
///
/// let layer = create_layer("Deconvolution").unwrap();
/// assert!(layer.one_blob_only());
/// assert!(create_layer("Softmax").is_none());
/// ```
pub fn create_layer(type_name: &str) -> Option<Box<dyn Layer>> {
    match type_name {
        "Deconvolution" => Some(Box::new(Deconvolution::default())),
        _ => None,
    }
}
