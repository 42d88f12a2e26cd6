#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! Layers load their learnable parameters from a binary model through a
//! [`ModelReader`], either a sequential stream or an in-memory image. Weight
//! blocks carry a tag selecting one of three encodings (float16, quantized,
//! raw f32); bias blocks follow untagged.
//!
//! ```rust
//! use lumen_blob::CpuAllocator;
//! use lumen_model::{
//!     reader::MemReader,
//!     weights::{read_layer_weights, WeightEncoding},
//!     writer::WeightWriter,
//! };
//!
//! let mut writer = WeightWriter::new(Vec::new());
//! writer.write_weights(&[0.5; 4], WeightEncoding::Float16).unwrap();
//! let image = writer.into_inner();
//!
//! let mut reader = MemReader::new(&image);
//! let weights = read_layer_weights(&mut reader, 4, 1, false, CpuAllocator).unwrap();
//! assert_eq!(weights.weight.as_slice(), &[0.5; 4]);
//! ```

/// Error types for model loading.
pub mod error;

/// Integer-keyed layer parameters.
pub mod param;

/// Stream and memory cursors over model bytes.
pub mod reader;

/// Tagged weight block decoding.
pub mod weights;

/// Weight block encoding.
pub mod writer;

pub use error::ModelError;
pub use param::ParamDict;
pub use reader::{MemReader, ModelReader, StreamReader};
pub use weights::{LayerWeights, WeightEncoding};
