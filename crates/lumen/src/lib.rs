#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! Re-exports the lumen crates under short names:
//!
//! ```rust
//! use lumen::{blob::Blob, nn::Deconvolution};
//!
//! let layer = Deconvolution::default();
//! assert!(layer.weight().is_none());
//! assert!(Blob::new(2, 2, 1, lumen::blob::CpuAllocator).is_ok());
//! ```

#[doc(inline)]
pub use lumen_blob as blob;

#[doc(inline)]
pub use lumen_model as model;

#[doc(inline)]
pub use lumen_nn as nn;
