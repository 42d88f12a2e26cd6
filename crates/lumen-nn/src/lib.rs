#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Lumen Neural Network Layers
//!
//! ## Key Features
//!
//! - **Deconvolution**: transposed convolution with dilation, stride and output trimming
//! - **Two strategies**: direct scatter, or GEMM followed by a [`im2col::col2im`] fold
//! - **Layout transforms**: [`im2col::im2col`] and [`im2col::col2im`] for any kernel geometry
//!
//! ## Example: Deconvolution
//!
//! ```rust
//! use lumen_blob::{Blob, CpuAllocator};
//! use lumen_model::ParamDict;
//! use lumen_nn::layer::{create_layer, Layer};
//!
//! let mut pd = ParamDict::new();
//! pd.set(0, 1).set(1, 3).set(3, 2).set(6, 9);
//!
//! let mut layer = create_layer("Deconvolution").unwrap();
//! layer.load_param(&pd).unwrap();
//!
//! // raw encoding: zero tag followed by nine f32 weights
//! let mut image = vec![0u8; 4];
//! image.extend((0..9).flat_map(|_| 1.0f32.to_le_bytes()));
//! layer.load_model(&mut lumen_model::MemReader::new(&image)).unwrap();
//!
//! let input = Blob::from_vec(5, 5, 1, vec![1.0; 25], CpuAllocator).unwrap();
//! let output = layer.forward(&input).unwrap();
//! assert_eq!((output.w(), output.h(), output.c()), (11, 11, 1));
//! ```

/// Transposed convolution layer.
pub mod deconvolution;

/// Error types for the layers.
pub mod error;

/// Strided matrix multiplication.
pub mod gemm;

/// Conversions between spatial tensors and column buffers.
pub mod im2col;

/// The layer interface and factory.
pub mod layer;

/// Scheduling of per-plane kernels.
pub mod parallel;

pub use deconvolution::{DeconvStrategy, Deconvolution, DeconvolutionConfig};
pub use error::LayerError;
pub use layer::{create_layer, Layer};
pub use parallel::ExecutionStrategy;
