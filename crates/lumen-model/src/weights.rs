//! Decoding of learnable parameter blocks.
//!
//! A weight block starts with a four byte tag selecting its encoding:
//!
//! ```text
//! [4 bytes: tag]
//!   tag == 0x01306B47        -> align4(n * 2) bytes of float16 codes
//!   byte sum of tag != 0     -> 256 x f32 lookup table, align4(n) bytes of u8 indices
//!   otherwise (all zero)     -> n x f32
//! [bias: num_output x f32, untagged, only if the layer has a bias term]
//! ```

use lumen_blob::{checked_align_size, Blob, BlobAllocator, BlobAllocatorError, BlobError};

use crate::{
    error::ModelError,
    reader::{staging_buffer, ModelReader},
};

/// Tag marking a block of half-precision weights.
pub const FLOAT16_TAG: u32 = 0x0130_6B47;

/// Tag written in front of quantized blocks.
///
/// Readers accept any tag with a non-zero byte other than [`FLOAT16_TAG`] as
/// quantized. The writer uses the smallest such value so its output carries no
/// meaning beyond "not float16, not raw".
pub const QUANTIZED_TAG: u32 = 0x0000_0001;

/// Number of entries in the lookup table of a quantized block.
pub const QUANTIZATION_TABLE_LEN: usize = 256;

/// The encoding of a weight block, decided by its tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightEncoding {
    /// IEEE half-precision codes.
    Float16,
    /// 8-bit indices into a 256-entry f32 table.
    Quantized,
    /// Plain f32 values.
    Raw,
}

impl WeightEncoding {
    /// Classifies a tag as read from the model, bytes in file order.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lumen_model::weights::WeightEncoding;
    ///
    /// assert_eq!(WeightEncoding::from_tag([0x47, 0x6B, 0x30, 0x01]), WeightEncoding::Float16);
    /// assert_eq!(WeightEncoding::from_tag([0, 0, 0, 1]), WeightEncoding::Quantized);
    /// assert_eq!(WeightEncoding::from_tag([0; 4]), WeightEncoding::Raw);
    /// ```
    pub fn from_tag(tag: [u8; 4]) -> Self {
        let byte_sum: u32 = tag.iter().map(|&b| b as u32).sum();
        if u32::from_le_bytes(tag) == FLOAT16_TAG {
            WeightEncoding::Float16
        } else if byte_sum != 0 {
            WeightEncoding::Quantized
        } else {
            WeightEncoding::Raw
        }
    }

    /// Returns the number of bytes following the tag for `len` weights, or
    /// `None` if that size is not addressable.
    pub fn payload_size(&self, len: usize) -> Option<usize> {
        match self {
            WeightEncoding::Float16 => len
                .checked_mul(std::mem::size_of::<u16>())
                .and_then(|bytes| checked_align_size(bytes, 4)),
            WeightEncoding::Quantized => checked_align_size(len, 4)
                .and_then(|bytes| bytes.checked_add(QUANTIZATION_TABLE_LEN * 4)),
            WeightEncoding::Raw => len.checked_mul(std::mem::size_of::<f32>()),
        }
    }
}

/// Weight and optional bias of a layer, in canonical f32 form.
#[derive(Debug, Clone)]
pub struct LayerWeights<A: BlobAllocator> {
    /// Flat weight blob.
    pub weight: Blob<A>,
    /// Flat bias blob, present when the layer has a bias term.
    pub bias: Option<Blob<A>>,
}

/// Reads a tagged weight block of `len` values into a one-dimensional blob.
///
/// # Arguments
///
/// * `reader` - The cursor positioned at the tag.
/// * `len` - The number of weights the layer expects.
/// * `alloc` - The allocator for the resulting blob.
///
/// # Errors
///
/// Returns [`ModelError::Truncated`] if the block is shorter than its encoding
/// demands and [`ModelError::Blob`] if the blob cannot be allocated. Readers
/// that know their length report truncation before allocating anything.
pub fn read_weight_data<R, A>(reader: &mut R, len: usize, alloc: A) -> Result<Blob<A>, ModelError>
where
    R: ModelReader + ?Sized,
    A: BlobAllocator,
{
    let start = reader.consumed();
    let encoding = WeightEncoding::from_tag(reader.read_tag()?);

    let weight = match encoding {
        WeightEncoding::Float16 => read_float16(reader, len, alloc),
        WeightEncoding::Quantized => read_quantized(reader, len, alloc),
        WeightEncoding::Raw => read_raw(reader, len, alloc),
    }
    .inspect_err(|e| log::warn!("aborted {encoding:?} weight block of {len} values: {e}"))?;

    log::debug!(
        "decoded {len} weights ({encoding:?}, {} bytes)",
        reader.consumed() - start
    );

    Ok(weight)
}

/// Checks a field of `size` bytes against the reader before anything is
/// allocated for it. `None` stands for a size beyond the address space.
fn field_size<R>(
    reader: &R,
    size: Option<usize>,
    what: &'static str,
) -> Result<usize, ModelError>
where
    R: ModelReader + ?Sized,
{
    reader.ensure_available(size.unwrap_or(usize::MAX), what)?;
    size.ok_or_else(|| BlobError::AllocationFailed(BlobAllocatorError::TooLarge).into())
}

fn read_float16<R, A>(reader: &mut R, len: usize, alloc: A) -> Result<Blob<A>, ModelError>
where
    R: ModelReader + ?Sized,
    A: BlobAllocator,
{
    let what = "float16 weights";
    let size = field_size(reader, WeightEncoding::Float16.payload_size(len), what)?;

    let mut codes = staging_buffer::<u16>(size / 2)?;
    reader.read_u16_into(&mut codes, what)?;
    Ok(Blob::from_float16(&codes, len, alloc)?)
}

fn read_quantized<R, A>(reader: &mut R, len: usize, alloc: A) -> Result<Blob<A>, ModelError>
where
    R: ModelReader + ?Sized,
    A: BlobAllocator,
{
    let mut table = [0.0f32; QUANTIZATION_TABLE_LEN];
    reader.read_f32_into(&mut table, "quantization table")?;

    let what = "quantized indices";
    let size = field_size(reader, checked_align_size(len, 4), what)?;
    let indices = reader.read_byte_vec(size, what)?;

    let mut weight = Blob::new_1d(len, alloc)?;
    weight
        .as_mut_slice()
        .iter_mut()
        .zip(indices.iter())
        .for_each(|(w, &idx)| *w = table[idx as usize]);

    Ok(weight)
}

fn read_raw<R, A>(reader: &mut R, len: usize, alloc: A) -> Result<Blob<A>, ModelError>
where
    R: ModelReader + ?Sized,
    A: BlobAllocator,
{
    let what = "raw weights";
    field_size(reader, WeightEncoding::Raw.payload_size(len), what)?;

    let mut weight = Blob::new_1d(len, alloc)?;
    reader.read_f32_into(weight.as_mut_slice(), what)?;
    Ok(weight)
}

/// Reads an untagged block of `len` f32 bias values.
pub fn read_bias_data<R, A>(reader: &mut R, len: usize, alloc: A) -> Result<Blob<A>, ModelError>
where
    R: ModelReader + ?Sized,
    A: BlobAllocator,
{
    field_size(reader, len.checked_mul(std::mem::size_of::<f32>()), "bias")?;

    let mut bias = Blob::new_1d(len, alloc)?;
    reader.read_f32_into(bias.as_mut_slice(), "bias")?;
    Ok(bias)
}

/// Reads the weights of a layer followed by its bias when `bias_term` is set.
///
/// Nothing is returned unless the whole block decoded, so a truncated model
/// never yields partially filled weights.
///
/// # Example
///
/// ```rust
/// use lumen_blob::CpuAllocator;
/// use lumen_model::{reader::MemReader, weights::read_layer_weights};
///
/// // raw tag, two weights, one bias
/// let mut image = vec![0u8; 4];
/// for v in [1.0f32, 2.0, 0.5] {
///     image.extend_from_slice(&v.to_le_bytes());
/// }
///
/// let mut reader = MemReader::new(&image);
/// let weights = read_layer_weights(&mut reader, 2, 1, true, CpuAllocator).unwrap();
/// assert_eq!(weights.weight.as_slice(), &[1.0, 2.0]);
/// assert_eq!(weights.bias.unwrap().as_slice(), &[0.5]);
/// ```
pub fn read_layer_weights<R, A>(
    reader: &mut R,
    weight_data_size: usize,
    num_output: usize,
    bias_term: bool,
    alloc: A,
) -> Result<LayerWeights<A>, ModelError>
where
    R: ModelReader + ?Sized,
    A: BlobAllocator,
{
    let weight = read_weight_data(reader, weight_data_size, alloc.clone())?;

    let bias = if bias_term {
        let bias = read_bias_data(reader, num_output, alloc)
            .inspect_err(|e| log::warn!("aborted bias block of {num_output} values: {e}"))?;
        Some(bias)
    } else {
        None
    };

    Ok(LayerWeights { weight, bias })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{MemReader, StreamReader};
    use lumen_blob::CpuAllocator;

    fn push_f32s(buf: &mut Vec<u8>, values: &[f32]) {
        values
            .iter()
            .for_each(|v| buf.extend_from_slice(&v.to_le_bytes()));
    }

    #[test]
    fn test_weight_encoding_from_tag() {
        assert_eq!(
            WeightEncoding::from_tag(FLOAT16_TAG.to_le_bytes()),
            WeightEncoding::Float16
        );
        assert_eq!(
            WeightEncoding::from_tag(QUANTIZED_TAG.to_le_bytes()),
            WeightEncoding::Quantized
        );
        assert_eq!(
            WeightEncoding::from_tag([0, 0, 1, 0]),
            WeightEncoding::Quantized
        );
        // same bytes in the other order are not the float16 tag
        assert_eq!(
            WeightEncoding::from_tag(FLOAT16_TAG.to_be_bytes()),
            WeightEncoding::Quantized
        );
        assert_eq!(WeightEncoding::from_tag([0; 4]), WeightEncoding::Raw);
    }

    #[test]
    fn test_payload_size() {
        assert_eq!(WeightEncoding::Float16.payload_size(9), Some(20));
        assert_eq!(WeightEncoding::Float16.payload_size(8), Some(16));
        assert_eq!(WeightEncoding::Quantized.payload_size(9), Some(1024 + 12));
        assert_eq!(WeightEncoding::Raw.payload_size(9), Some(36));

        assert_eq!(WeightEncoding::Float16.payload_size(1 << 63), None);
        assert_eq!(WeightEncoding::Quantized.payload_size(usize::MAX), None);
        assert_eq!(WeightEncoding::Raw.payload_size(1 << 62), None);
    }

    #[test]
    fn test_read_raw_weights() -> Result<(), ModelError> {
        let mut image = vec![0u8; 4];
        push_f32s(&mut image, &[0.25, -1.0, 3.5]);

        let mut reader = MemReader::new(&image);
        let weight = read_weight_data(&mut reader, 3, CpuAllocator)?;
        assert_eq!(weight.as_slice(), &[0.25, -1.0, 3.5]);
        assert_eq!(reader.consumed(), 16);
        Ok(())
    }

    #[test]
    fn test_read_float16_weights_skips_padding() -> Result<(), ModelError> {
        let mut image = FLOAT16_TAG.to_le_bytes().to_vec();
        for v in [1.0f32, 0.5, -2.0] {
            image.extend_from_slice(&half::f16::from_f32(v).to_bits().to_le_bytes());
        }
        // 3 codes are 6 bytes, padded to 8
        image.extend_from_slice(&[0xAA, 0xBB]);
        push_f32s(&mut image, &[9.0]);

        let mut reader = MemReader::new(&image);
        let weights = read_layer_weights(&mut reader, 3, 1, true, CpuAllocator)?;
        assert_eq!(weights.weight.as_slice(), &[1.0, 0.5, -2.0]);
        assert_eq!(weights.bias.map(|b| b.as_slice().to_vec()), Some(vec![9.0]));
        assert_eq!(reader.consumed(), 4 + 8 + 4);
        Ok(())
    }

    #[test]
    fn test_read_quantized_weights() -> Result<(), ModelError> {
        let mut image = QUANTIZED_TAG.to_le_bytes().to_vec();
        let table: Vec<f32> = (0..256).map(|i| i as f32 * 0.5).collect();
        push_f32s(&mut image, &table);
        image.extend_from_slice(&[4, 255, 0, 1, 2]);
        // 5 indices padded to 8 bytes
        image.extend_from_slice(&[0, 0, 0]);

        let mut reader = StreamReader::new(&image[..]);
        let weight = read_weight_data(&mut reader, 5, CpuAllocator)?;
        assert_eq!(weight.as_slice(), &[2.0, 127.5, 0.0, 0.5, 1.0]);
        assert_eq!(reader.consumed(), 4 + 1024 + 8);
        Ok(())
    }

    #[test]
    fn test_read_without_bias() -> Result<(), ModelError> {
        let mut image = vec![0u8; 4];
        push_f32s(&mut image, &[1.0, 2.0, 3.0]);

        let mut reader = MemReader::new(&image);
        let weights = read_layer_weights(&mut reader, 2, 1, false, CpuAllocator)?;
        assert!(weights.bias.is_none());
        assert_eq!(reader.consumed(), 12);
        assert_eq!(reader.remaining().len(), 4);
        Ok(())
    }

    #[test]
    fn test_truncated_weights_fail() {
        let mut image = vec![0u8; 4];
        push_f32s(&mut image, &[1.0, 2.0]);

        let mut reader = MemReader::new(&image);
        let err = read_layer_weights(&mut reader, 3, 1, false, CpuAllocator).unwrap_err();
        assert!(err.is_truncated());

        let mut reader = StreamReader::new(&image[..]);
        let err = read_layer_weights(&mut reader, 3, 1, false, CpuAllocator).unwrap_err();
        assert!(err.is_truncated());
    }

    #[test]
    fn test_truncated_bias_fails() {
        let mut image = vec![0u8; 4];
        push_f32s(&mut image, &[1.0, 2.0, 0.5]);

        let mut reader = MemReader::new(&image);
        let err = read_layer_weights(&mut reader, 2, 2, true, CpuAllocator).unwrap_err();
        assert!(matches!(
            err,
            ModelError::Truncated {
                what: "bias",
                needed: 8,
                available: 4,
            }
        ));
    }

    #[test]
    fn test_truncated_quantized_table_fails() {
        let mut image = QUANTIZED_TAG.to_le_bytes().to_vec();
        push_f32s(&mut image, &[0.0; 100]);

        let mut reader = MemReader::new(&image);
        let err = read_weight_data(&mut reader, 4, CpuAllocator).unwrap_err();
        assert!(matches!(
            err,
            ModelError::Truncated {
                what: "quantization table",
                ..
            }
        ));
    }

    fn block_with_tag(tag: u32, payload_len: usize) -> Vec<u8> {
        let mut image = tag.to_le_bytes().to_vec();
        image.resize(4 + payload_len, 0);
        image
    }

    #[test]
    fn test_huge_declared_size_is_truncated() {
        // each block holds a full quantization table and a few more bytes
        for tag in [FLOAT16_TAG, QUANTIZED_TAG, 0] {
            let image = block_with_tag(tag, 1032);
            for len in [1 << 40, 1 << 62, 1 << 63, usize::MAX] {
                let mut reader = MemReader::new(&image);
                let err = read_layer_weights(&mut reader, len, 1, true, CpuAllocator).unwrap_err();
                assert!(err.is_truncated(), "tag {tag:#x}, len {len}: {err}");
            }
        }

        let image = block_with_tag(QUANTIZED_TAG, 1032);
        let err = read_weight_data(&mut MemReader::new(&image), 1 << 63, CpuAllocator).unwrap_err();
        assert!(matches!(
            err,
            ModelError::Truncated {
                what: "quantized indices",
                available: 8,
                ..
            }
        ));
    }

    #[test]
    fn test_huge_declared_size_from_stream_fails_cleanly() {
        for tag in [FLOAT16_TAG, QUANTIZED_TAG, 0] {
            let image = block_with_tag(tag, 1032);

            // not addressable at all
            let mut reader = StreamReader::new(&image[..]);
            let err = read_weight_data(&mut reader, usize::MAX, CpuAllocator).unwrap_err();
            assert!(err.is_out_of_memory(), "tag {tag:#x}: {err}");

            // allocatable, but the stream ends first
            let mut reader = StreamReader::new(&image[..]);
            let err = read_weight_data(&mut reader, 1 << 16, CpuAllocator).unwrap_err();
            assert!(err.is_truncated(), "tag {tag:#x}: {err}");
        }
    }

    #[test]
    fn test_huge_bias_is_truncated() {
        let mut image = vec![0u8; 4];
        push_f32s(&mut image, &[1.0, 2.0]);

        let mut reader = MemReader::new(&image);
        let err = read_layer_weights(&mut reader, 2, usize::MAX, true, CpuAllocator).unwrap_err();
        assert!(matches!(err, ModelError::Truncated { what: "bias", .. }));
    }
}
