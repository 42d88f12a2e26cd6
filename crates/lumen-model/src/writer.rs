use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::weights::{WeightEncoding, FLOAT16_TAG, QUANTIZATION_TABLE_LEN, QUANTIZED_TAG};

/// Serializes weight blocks in the layout read by
/// [`read_layer_weights`](crate::weights::read_layer_weights).
///
/// # Example
///
/// ```rust
/// use lumen_model::{weights::WeightEncoding, writer::WeightWriter};
///
/// let mut writer = WeightWriter::new(Vec::new());
/// writer.write_weights(&[1.0, 2.0, 3.0], WeightEncoding::Float16).unwrap();
/// writer.write_bias(&[0.5]).unwrap();
///
/// // tag + 3 codes padded to 8 bytes + one bias value
/// assert_eq!(writer.written(), 4 + 8 + 4);
/// ```
pub struct WeightWriter<W: Write> {
    inner: W,
    written: usize,
}

impl<W: Write> WeightWriter<W> {
    /// Wraps a sink, starting the byte count at zero.
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    /// Returns the number of bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Returns the wrapped sink.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Writes a tagged weight block with the given encoding.
    ///
    /// Quantized blocks use a table spanning the range of `weights`, see
    /// [`linear_quantization_table`].
    pub fn write_weights(
        &mut self,
        weights: &[f32],
        encoding: WeightEncoding,
    ) -> std::io::Result<()> {
        match encoding {
            WeightEncoding::Raw => self.write_raw(weights),
            WeightEncoding::Float16 => self.write_float16(weights),
            WeightEncoding::Quantized => {
                let table = linear_quantization_table(weights);
                self.write_quantized(weights, &table)
            }
        }
    }

    /// Writes a raw f32 block behind an all-zero tag.
    pub fn write_raw(&mut self, weights: &[f32]) -> std::io::Result<()> {
        self.write_u32(0)?;
        self.write_f32s(weights)
    }

    /// Writes a half-precision block, padded to a multiple of four bytes.
    pub fn write_float16(&mut self, weights: &[f32]) -> std::io::Result<()> {
        self.write_u32(FLOAT16_TAG)?;
        for &w in weights {
            self.inner
                .write_u16::<LittleEndian>(half::f16::from_f32(w).to_bits())?;
        }
        self.written += weights.len() * 2;
        self.pad_to_4()
    }

    /// Writes a quantized block: the table, then one index per weight
    /// pointing at the nearest table entry, padded to a multiple of four bytes.
    pub fn write_quantized(
        &mut self,
        weights: &[f32],
        table: &[f32; QUANTIZATION_TABLE_LEN],
    ) -> std::io::Result<()> {
        self.write_u32(QUANTIZED_TAG)?;
        self.write_f32s(table)?;
        let indices: Vec<u8> = weights.iter().map(|&w| nearest_index(table, w)).collect();
        self.inner.write_all(&indices)?;
        self.written += indices.len();
        self.pad_to_4()
    }

    /// Writes an untagged bias block.
    pub fn write_bias(&mut self, bias: &[f32]) -> std::io::Result<()> {
        self.write_f32s(bias)
    }

    fn write_u32(&mut self, value: u32) -> std::io::Result<()> {
        self.inner.write_u32::<LittleEndian>(value)?;
        self.written += 4;
        Ok(())
    }

    fn write_f32s(&mut self, values: &[f32]) -> std::io::Result<()> {
        for &v in values {
            self.inner.write_f32::<LittleEndian>(v)?;
        }
        self.written += values.len() * 4;
        Ok(())
    }

    fn pad_to_4(&mut self) -> std::io::Result<()> {
        let pad = lumen_blob::align_size(self.written, 4) - self.written;
        self.inner.write_all(&[0u8; 4][..pad])?;
        self.written += pad;
        Ok(())
    }
}

/// Builds a table of 256 evenly spaced values from the minimum to the maximum of `weights`.
pub fn linear_quantization_table(weights: &[f32]) -> [f32; QUANTIZATION_TABLE_LEN] {
    let (min, max) = weights
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &w| {
            (lo.min(w), hi.max(w))
        });

    let mut table = [0.0f32; QUANTIZATION_TABLE_LEN];
    if weights.is_empty() {
        return table;
    }

    let step = (max - min) / (QUANTIZATION_TABLE_LEN - 1) as f32;
    table
        .iter_mut()
        .enumerate()
        .for_each(|(i, t)| *t = min + step * i as f32);
    table
}

fn nearest_index(table: &[f32; QUANTIZATION_TABLE_LEN], value: f32) -> u8 {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, &t) in table.iter().enumerate() {
        let dist = (t - value).abs();
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    best as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ModelError,
        reader::{MemReader, ModelReader},
        weights::read_layer_weights,
    };
    use approx::assert_abs_diff_eq;
    use lumen_blob::CpuAllocator;

    #[test]
    fn test_write_raw_block() -> std::io::Result<()> {
        let mut writer = WeightWriter::new(Vec::new());
        writer.write_raw(&[1.0, -1.0])?;
        let bytes = writer.into_inner();
        assert_eq!(&bytes[..4], &[0, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &1.0f32.to_le_bytes());
        assert_eq!(bytes.len(), 12);
        Ok(())
    }

    #[test]
    fn test_quantized_block_is_padded() -> std::io::Result<()> {
        let mut writer = WeightWriter::new(Vec::new());
        writer.write_weights(&[0.0, 1.0, 0.5], WeightEncoding::Quantized)?;
        assert_eq!(writer.written(), 4 + 1024 + 4);
        assert_eq!(
            Some(writer.written() - 4),
            WeightEncoding::Quantized.payload_size(3)
        );
        assert_eq!(&writer.into_inner()[..4], &QUANTIZED_TAG.to_le_bytes());
        Ok(())
    }

    #[test]
    fn test_linear_quantization_table() {
        let table = linear_quantization_table(&[-1.0, 0.0, 1.0]);
        assert_eq!(table[0], -1.0);
        assert_abs_diff_eq!(table[255], 1.0, epsilon = 1e-6);
        assert_eq!(nearest_index(&table, 1.0), 255);
        assert_eq!(nearest_index(&table, -1.0), 0);

        let empty = linear_quantization_table(&[]);
        assert!(empty.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_write_then_read_every_encoding() -> Result<(), ModelError> {
        let weights: Vec<f32> = (0..27).map(|i| (i as f32 - 13.0) * 0.125).collect();
        let bias = [0.5, -0.25, 1.0];

        for encoding in [
            WeightEncoding::Raw,
            WeightEncoding::Float16,
            WeightEncoding::Quantized,
        ] {
            let mut writer = WeightWriter::new(Vec::new());
            writer.write_weights(&weights, encoding)?;
            writer.write_bias(&bias)?;
            let image = writer.into_inner();

            let mut reader = MemReader::new(&image);
            let decoded = read_layer_weights(&mut reader, weights.len(), 3, true, CpuAllocator)?;
            assert_eq!(reader.consumed(), image.len());

            // values are multiples of 1/8 in [-1.625, 1.625]: exact in f16,
            // within half a table step when quantized
            let tolerance = match encoding {
                WeightEncoding::Raw | WeightEncoding::Float16 => 0.0,
                WeightEncoding::Quantized => 3.25 / 255.0 / 2.0 + 1e-6,
            };
            for (a, b) in decoded.weight.as_slice().iter().zip(weights.iter()) {
                assert_abs_diff_eq!(a, b, epsilon = tolerance);
            }
            assert_eq!(decoded.bias.map(|b| b.as_slice().to_vec()), Some(bias.to_vec()));
        }
        Ok(())
    }
}
