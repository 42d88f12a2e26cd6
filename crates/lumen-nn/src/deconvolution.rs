//! Transposed convolution.
//!
//! Every input pixel is scattered into a `kernel_size x kernel_size`
//! neighbourhood of the output, scaled by the kernel weights. The output is
//! first produced on a bordered plane of `(w - 1) * stride + kernel_extent`
//! pixels per side and then `pad` pixels are removed from each border.

use lumen_blob::{ops::copy_cut_border, Blob, BlobAllocator, CpuAllocator};
use lumen_model::{error::ModelError, weights::read_layer_weights, ModelReader, ParamDict};

use crate::{
    error::LayerError,
    gemm::{gemm, MatRef},
    im2col::{col2im, ColumnGeometry},
    layer::Layer,
    parallel::{for_each_plane_mut, ExecutionStrategy},
};

/// Hyper-parameters of a deconvolution layer.
///
/// The weights are laid out as `[num_output][channels][kernel_size][kernel_size]`,
/// so `weight_data_size` must equal `num_output * channels * kernel_size^2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeconvolutionConfig {
    /// Number of output channels.
    pub num_output: usize,
    /// Side of the square kernel.
    pub kernel_size: usize,
    /// Spacing between kernel taps.
    pub dilation: usize,
    /// Spacing between the scattered input pixels in the output.
    pub stride: usize,
    /// Pixels removed from each border of the output.
    pub pad: usize,
    /// Whether a bias block follows the weights.
    pub bias_term: bool,
    /// Number of weights stored in the model.
    pub weight_data_size: usize,
}

impl Default for DeconvolutionConfig {
    fn default() -> Self {
        Self {
            num_output: 0,
            kernel_size: 0,
            dilation: 1,
            stride: 1,
            pad: 0,
            bias_term: false,
            weight_data_size: 0,
        }
    }
}

impl DeconvolutionConfig {
    /// Reads the configuration from parameter ids 0 to 6.
    ///
    /// | id | field | default |
    /// |----|-------|---------|
    /// | 0 | `num_output` | 0 |
    /// | 1 | `kernel_size` | 0 |
    /// | 2 | `dilation` | 1 |
    /// | 3 | `stride` | 1 |
    /// | 4 | `pad` | 0 |
    /// | 5 | `bias_term` | 0 |
    /// | 6 | `weight_data_size` | 0 |
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidParam`] for negative or float values, and
    /// for a zero kernel size, stride or dilation.
    pub fn from_param_dict(pd: &ParamDict) -> Result<Self, ModelError> {
        let defaults = Self::default();
        let config = Self {
            num_output: pd.get_usize(0, defaults.num_output)?,
            kernel_size: pd.get_usize(1, defaults.kernel_size)?,
            dilation: pd.get_usize(2, defaults.dilation)?,
            stride: pd.get_usize(3, defaults.stride)?,
            pad: pd.get_usize(4, defaults.pad)?,
            bias_term: pd.get_bool(5, defaults.bias_term)?,
            weight_data_size: pd.get_usize(6, defaults.weight_data_size)?,
        };

        if config.kernel_size == 0 {
            return Err(ModelError::InvalidParam {
                id: 1,
                reason: "kernel_size must be at least 1".to_string(),
            });
        }
        if config.dilation == 0 {
            return Err(ModelError::InvalidParam {
                id: 2,
                reason: "dilation must be at least 1".to_string(),
            });
        }
        if config.stride == 0 {
            return Err(ModelError::InvalidParam {
                id: 3,
                reason: "stride must be at least 1".to_string(),
            });
        }

        Ok(config)
    }

    /// Footprint of the dilated kernel, `dilation * (kernel_size - 1) + 1`.
    pub fn kernel_extent(&self) -> usize {
        self.dilation * self.kernel_size.saturating_sub(1) + 1
    }

    /// Output size before the padding is removed.
    pub fn bordered_size(&self, w: usize, h: usize) -> (usize, usize) {
        let extent = self.kernel_extent();
        (
            w.saturating_sub(1) * self.stride + extent,
            h.saturating_sub(1) * self.stride + extent,
        )
    }

    /// Final output size, or `None` if the padding consumes the whole plane.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lumen_nn::deconvolution::DeconvolutionConfig;
    ///
    /// let config = DeconvolutionConfig {
    ///     num_output: 2,
    ///     kernel_size: 3,
    ///     stride: 2,
    ///     ..Default::default()
    /// };
    /// assert_eq!(config.output_size(5, 5), Some((11, 11)));
    /// ```
    pub fn output_size(&self, w: usize, h: usize) -> Option<(usize, usize)> {
        let (outw, outh) = self.bordered_size(w, h);
        let trimmed_w = outw.checked_sub(2 * self.pad).filter(|&v| v > 0)?;
        let trimmed_h = outh.checked_sub(2 * self.pad).filter(|&v| v > 0)?;
        Some((trimmed_w, trimmed_h))
    }
}

/// Selects how the forward pass is computed.
///
/// Both strategies compute the same function and differ only in summation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeconvStrategy {
    /// Scatter every input pixel into a bordered output, then trim it.
    #[default]
    Direct,
    /// Multiply the weights with the input into a column buffer, then fold it with [`col2im`].
    Gemm,
}

/// A deconvolution (transposed convolution) layer.
///
/// # Example
///
/// ```rust
/// use lumen_blob::{Blob, CpuAllocator};
/// use lumen_nn::deconvolution::{Deconvolution, DeconvolutionConfig};
/// use lumen_nn::layer::Layer;
///
/// let config = DeconvolutionConfig {
///     num_output: 1,
///     kernel_size: 2,
///     stride: 2,
///     weight_data_size: 4,
///     ..Default::default()
/// };
/// let mut layer = Deconvolution::new(config);
/// layer
///     .set_weights(Blob::from_vec_1d(vec![1.0, 2.0, 3.0, 4.0], CpuAllocator), None)
///     .unwrap();
///
/// let input = Blob::from_vec(1, 1, 1, vec![2.0], CpuAllocator).unwrap();
/// let output = layer.forward(&input).unwrap();
/// assert_eq!(output.plane(0), &[2.0, 4.0, 6.0, 8.0]);
/// ```
#[derive(Debug, Clone)]
pub struct Deconvolution<A: BlobAllocator = CpuAllocator> {
    config: DeconvolutionConfig,
    weight: Option<Blob<A>>,
    bias: Option<Blob<A>>,
    strategy: DeconvStrategy,
    execution: ExecutionStrategy,
    alloc: A,
}

impl Default for Deconvolution<CpuAllocator> {
    fn default() -> Self {
        Self::new(DeconvolutionConfig::default())
    }
}

impl Deconvolution<CpuAllocator> {
    /// Creates a layer without weights that allocates on the CPU.
    pub fn new(config: DeconvolutionConfig) -> Self {
        Self::with_allocator(config, CpuAllocator)
    }
}

impl<A: BlobAllocator> Deconvolution<A> {
    /// Registered type name.
    pub const TYPE_NAME: &'static str = "Deconvolution";

    /// Creates a layer without weights whose blobs come from `alloc`.
    pub fn with_allocator(config: DeconvolutionConfig, alloc: A) -> Self {
        Self {
            config,
            weight: None,
            bias: None,
            strategy: DeconvStrategy::default(),
            execution: ExecutionStrategy::default(),
            alloc,
        }
    }

    /// Selects the forward strategy.
    pub fn with_strategy(mut self, strategy: DeconvStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Selects how output planes are scheduled.
    pub fn with_execution(mut self, execution: ExecutionStrategy) -> Self {
        self.execution = execution;
        self
    }

    /// Returns the hyper-parameters.
    pub fn config(&self) -> &DeconvolutionConfig {
        &self.config
    }

    /// Returns the forward strategy.
    pub fn strategy(&self) -> DeconvStrategy {
        self.strategy
    }

    /// Returns the installed weights, if any.
    pub fn weight(&self) -> Option<&Blob<A>> {
        self.weight.as_ref()
    }

    /// Returns the installed bias, if any.
    pub fn bias(&self) -> Option<&Blob<A>> {
        self.bias.as_ref()
    }

    /// Installs weights and bias directly, bypassing the model reader.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::WeightShape`] if `weight` does not hold
    /// `weight_data_size` values and [`LayerError::BiasShape`] if the bias
    /// disagrees with `bias_term` or `num_output`.
    pub fn set_weights(
        &mut self,
        weight: Blob<A>,
        bias: Option<Blob<A>>,
    ) -> Result<(), LayerError> {
        let weight = packed(weight);
        if weight.as_slice().len() != self.config.weight_data_size {
            return Err(LayerError::WeightShape {
                expected: self.config.weight_data_size,
                actual: weight.as_slice().len(),
            });
        }

        let bias = bias.map(packed);
        let expected_bias = if self.config.bias_term {
            self.config.num_output
        } else {
            0
        };
        let actual_bias = bias.as_ref().map_or(0, |b| b.as_slice().len());
        if actual_bias != expected_bias {
            return Err(LayerError::BiasShape {
                expected: expected_bias,
                actual: actual_bias,
            });
        }

        self.weight = Some(weight);
        self.bias = bias;
        Ok(())
    }

    fn forward_direct(
        &self,
        input: &Blob<A>,
        weight: &[f32],
        bias: Option<&[f32]>,
    ) -> Result<Blob<A>, LayerError> {
        let DeconvolutionConfig {
            num_output,
            kernel_size,
            dilation,
            stride,
            pad,
            ..
        } = self.config;
        let (w, h, channels) = (input.w(), input.h(), input.c());
        let (outw, outh) = self.config.bordered_size(w, h);
        let maxk = kernel_size * kernel_size;

        let mut bordered = Blob::new(outw, outh, num_output, self.alloc.clone())?;

        // offset of every kernel tap relative to its anchor pixel
        let space_ofs = (0..kernel_size)
            .flat_map(|i| (0..kernel_size).map(move |j| i * dilation * outw + j * dilation))
            .collect::<Vec<_>>();

        for_each_plane_mut(&mut bordered, self.execution, |p, out| {
            out.fill(bias.map_or(0.0, |b| b[p]));

            let kernels = &weight[p * channels * maxk..(p + 1) * channels * maxk];
            for (q, kptr) in kernels.chunks_exact(maxk.max(1)).enumerate() {
                let src = input.plane(q);
                for i in 0..h {
                    for j in 0..w {
                        let val = src[i * w + j];
                        let anchor = i * stride * outw + j * stride;
                        let dst = &mut out[anchor..];
                        space_ofs
                            .iter()
                            .zip(kptr.iter())
                            .for_each(|(&ofs, &wt)| dst[ofs] += val * wt);
                    }
                }
            }
        });

        if pad > 0 {
            return Ok(copy_cut_border(&bordered, pad, pad, pad, pad)?);
        }
        Ok(bordered)
    }

    fn forward_gemm(
        &self,
        input: &Blob<A>,
        weight: &[f32],
        bias: Option<&[f32]>,
        outw: usize,
        outh: usize,
    ) -> Result<Blob<A>, LayerError> {
        let DeconvolutionConfig {
            num_output,
            kernel_size,
            dilation,
            stride,
            pad,
            ..
        } = self.config;
        let (w, h, channels) = (input.w(), input.h(), input.c());
        let maxk = kernel_size * kernel_size;

        let mut output = Blob::new(outw, outh, num_output, self.alloc.clone())?;

        // the column grid of the padded output is exactly the input grid
        let geom = ColumnGeometry::square(1, outh, outw, kernel_size, pad, stride, dilation);
        debug_assert_eq!((geom.height_col(), geom.width_col()), (h, w));

        let rhs = MatRef {
            data: input.as_slice(),
            rows: channels,
            cols: w * h,
            row_stride: input.cstep(),
            col_stride: 1,
        };

        for_each_plane_mut(&mut output, self.execution, |p, out| {
            let lhs = MatRef {
                data: &weight[p * channels * maxk..(p + 1) * channels * maxk],
                rows: maxk,
                cols: channels,
                row_stride: 1,
                col_stride: maxk,
            };

            let mut col = vec![0.0; maxk * w * h];
            gemm(lhs, rhs, &mut col);
            col2im(&col, &geom, out);

            if let Some(b) = bias {
                out.iter_mut().for_each(|v| *v += b[p]);
            }
        });

        Ok(output)
    }
}

impl<A: BlobAllocator> Layer<A> for Deconvolution<A> {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn one_blob_only(&self) -> bool {
        true
    }

    fn load_param(&mut self, pd: &ParamDict) -> Result<(), LayerError> {
        let config = DeconvolutionConfig::from_param_dict(pd)?;
        if config != self.config {
            self.weight = None;
            self.bias = None;
        }
        self.config = config;
        Ok(())
    }

    fn load_model(&mut self, reader: &mut dyn ModelReader) -> Result<(), LayerError> {
        let weights = read_layer_weights(
            reader,
            self.config.weight_data_size,
            self.config.num_output,
            self.config.bias_term,
            self.alloc.clone(),
        )?;

        self.weight = Some(weights.weight);
        self.bias = weights.bias;
        Ok(())
    }

    fn forward(&self, input: &Blob<A>) -> Result<Blob<A>, LayerError> {
        let weight = self.weight.as_ref().ok_or(LayerError::NotLoaded)?.as_slice();
        let bias = self.bias.as_ref().map(|b| b.as_slice());

        if self.config.kernel_size == 0 || self.config.stride == 0 || self.config.dilation == 0 {
            return Err(LayerError::InvalidConfig(
                "kernel_size, stride and dilation must be at least 1",
            ));
        }

        let (w, h, channels) = (input.w(), input.h(), input.c());
        if input.is_empty() || w * h * channels == 0 {
            return Err(LayerError::EmptyInput);
        }

        let expected = self.config.num_output * channels * self.config.kernel_size.pow(2);
        if weight.len() != expected {
            return Err(LayerError::WeightShape {
                expected,
                actual: weight.len(),
            });
        }
        if let Some(b) = bias {
            if b.len() != self.config.num_output {
                return Err(LayerError::BiasShape {
                    expected: self.config.num_output,
                    actual: b.len(),
                });
            }
        }

        let (outw, outh) = self.config.output_size(w, h).ok_or_else(|| {
            let (bw, bh) = self.config.bordered_size(w, h);
            LayerError::InvalidOutputShape {
                w: bw,
                h: bh,
                pad: self.config.pad,
            }
        })?;

        log::debug!(
            "deconvolution {:?}: {w}x{h}x{channels} -> {outw}x{outh}x{}",
            self.strategy,
            self.config.num_output
        );

        match self.strategy {
            DeconvStrategy::Direct => self.forward_direct(input, weight, bias),
            DeconvStrategy::Gemm => self.forward_gemm(input, weight, bias, outw, outh),
        }
    }
}

/// Returns a blob whose slice holds exactly its `w * h * c` elements.
fn packed<A: BlobAllocator>(blob: Blob<A>) -> Blob<A> {
    if blob.as_slice().len() == blob.w() * blob.h() * blob.c() {
        return blob;
    }
    let alloc = blob.alloc().clone();
    Blob::from_vec_1d(blob.to_packed_vec(), alloc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use lumen_blob::BlobAllocatorError;
    use lumen_model::MemReader;

    fn single_channel_layer(strategy: DeconvStrategy) -> Deconvolution {
        let config = DeconvolutionConfig {
            num_output: 1,
            kernel_size: 2,
            stride: 1,
            bias_term: true,
            weight_data_size: 4,
            ..Default::default()
        };
        let mut layer = Deconvolution::new(config).with_strategy(strategy);
        layer
            .set_weights(
                Blob::from_vec_1d(vec![1.0, 1.0, 1.0, 1.0], CpuAllocator),
                Some(Blob::from_vec_1d(vec![0.25], CpuAllocator)),
            )
            .unwrap();
        layer
    }

    #[test]
    fn test_config_from_param_dict() -> Result<(), ModelError> {
        let mut pd = ParamDict::new();
        pd.set(0, 2).set(1, 3).set(3, 2).set(5, 1).set(6, 18);

        let config = DeconvolutionConfig::from_param_dict(&pd)?;
        assert_eq!(
            config,
            DeconvolutionConfig {
                num_output: 2,
                kernel_size: 3,
                dilation: 1,
                stride: 2,
                pad: 0,
                bias_term: true,
                weight_data_size: 18,
            }
        );
        Ok(())
    }

    #[test]
    fn test_config_rejects_zero_stride() {
        let mut pd = ParamDict::new();
        pd.set(1, 3).set(3, 0);
        let err = DeconvolutionConfig::from_param_dict(&pd).unwrap_err();
        assert!(matches!(err, ModelError::InvalidParam { id: 3, .. }));
    }

    #[test]
    fn test_config_rejects_missing_kernel_size() {
        // key 1 defaults to zero
        let err = DeconvolutionConfig::from_param_dict(&ParamDict::new()).unwrap_err();
        assert!(matches!(err, ModelError::InvalidParam { id: 1, .. }));

        let mut pd = ParamDict::new();
        pd.set(0, 1).set(1, 0);
        let mut layer = Deconvolution::default();
        assert!(matches!(
            layer.load_param(&pd),
            Err(LayerError::Model(ModelError::InvalidParam { id: 1, .. }))
        ));
    }

    #[test]
    fn test_forward_rejects_zero_kernel_size() {
        let config = DeconvolutionConfig {
            num_output: 1,
            kernel_size: 0,
            weight_data_size: 0,
            ..Default::default()
        };
        let input = Blob::from_vec(2, 2, 1, vec![1.0, 2.0, 3.0, 4.0], CpuAllocator).unwrap();

        for strategy in [DeconvStrategy::Direct, DeconvStrategy::Gemm] {
            let mut layer = Deconvolution::new(config).with_strategy(strategy);
            layer
                .set_weights(Blob::from_vec_1d(Vec::new(), CpuAllocator), None)
                .unwrap();
            assert!(matches!(
                layer.forward(&input),
                Err(LayerError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_output_size() {
        let config = DeconvolutionConfig {
            kernel_size: 3,
            dilation: 2,
            stride: 2,
            pad: 1,
            ..Default::default()
        };
        assert_eq!(config.kernel_extent(), 5);
        assert_eq!(config.bordered_size(4, 3), (11, 9));
        assert_eq!(config.output_size(4, 3), Some((9, 7)));

        let too_much = DeconvolutionConfig { pad: 5, ..config };
        assert_eq!(too_much.output_size(4, 3), None);
    }

    #[test]
    fn test_forward_overlapping_taps() {
        let input = Blob::from_vec(2, 2, 1, vec![1.0, 2.0, 3.0, 4.0], CpuAllocator).unwrap();
        let expected = [
            1.25, 3.25, 2.25, //
            4.25, 10.25, 6.25, //
            3.25, 7.25, 4.25,
        ];

        for strategy in [DeconvStrategy::Direct, DeconvStrategy::Gemm] {
            let output = single_channel_layer(strategy).forward(&input).unwrap();
            assert_eq!((output.w(), output.h(), output.c()), (3, 3, 1));
            for (a, b) in output.plane(0).iter().zip(expected.iter()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_forward_with_padding_and_serial_execution() {
        let input = Blob::from_vec(2, 2, 1, vec![1.0, 2.0, 3.0, 4.0], CpuAllocator).unwrap();
        let mut layer =
            single_channel_layer(DeconvStrategy::Direct).with_execution(ExecutionStrategy::Serial);
        layer.config.pad = 1;

        let output = layer.forward(&input).unwrap();
        assert_eq!((output.w(), output.h()), (1, 1));
        assert_abs_diff_eq!(output.plane(0)[0], 10.25, epsilon = 1e-6);
    }

    #[test]
    fn test_forward_rejects_excess_padding() {
        let input = Blob::from_vec(1, 1, 1, vec![1.0], CpuAllocator).unwrap();
        let mut layer = single_channel_layer(DeconvStrategy::Gemm);
        layer.config.pad = 1;

        assert!(matches!(
            layer.forward(&input),
            Err(LayerError::InvalidOutputShape { w: 2, h: 2, pad: 1 })
        ));
    }

    #[test]
    fn test_forward_rejects_channel_mismatch() {
        let input = Blob::new(2, 2, 3, CpuAllocator).unwrap();
        let layer = single_channel_layer(DeconvStrategy::Direct);
        assert!(matches!(
            layer.forward(&input),
            Err(LayerError::WeightShape {
                expected: 12,
                actual: 4
            })
        ));
    }

    #[test]
    fn test_set_weights_validates_bias() {
        let config = DeconvolutionConfig {
            num_output: 2,
            kernel_size: 1,
            weight_data_size: 2,
            ..Default::default()
        };
        let mut layer = Deconvolution::new(config);
        let res = layer.set_weights(
            Blob::from_vec_1d(vec![1.0, 1.0], CpuAllocator),
            Some(Blob::from_vec_1d(vec![0.0, 0.0], CpuAllocator)),
        );
        assert!(matches!(
            res,
            Err(LayerError::BiasShape {
                expected: 0,
                actual: 2
            })
        ));
        assert!(layer.weight().is_none());
    }

    #[test]
    fn test_load_param_drops_stale_weights() {
        let mut layer = single_channel_layer(DeconvStrategy::Direct);
        assert!(layer.weight().is_some());

        let mut pd = ParamDict::new();
        pd.set(0, 1).set(1, 2).set(5, 1).set(6, 4);
        layer.load_param(&pd).unwrap();
        assert!(layer.weight().is_some());

        pd.set(4, 1);
        layer.load_param(&pd).unwrap();
        assert!(layer.weight().is_none());
        assert!(layer.bias().is_none());
    }

    #[test]
    fn test_load_model_from_memory() {
        let mut image = vec![0u8; 4];
        for v in [1.0f32, 2.0, 3.0, 4.0, -1.0] {
            image.extend_from_slice(&v.to_le_bytes());
        }

        let mut layer = single_channel_layer(DeconvStrategy::Direct);
        let mut reader = MemReader::new(&image);
        layer.load_model(&mut reader).unwrap();

        assert_eq!(layer.weight().unwrap().as_slice(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(layer.bias().unwrap().as_slice(), &[-1.0]);
        assert!(reader.remaining().is_empty());
    }

    #[derive(Clone, Debug)]
    struct ExhaustedAllocator;

    impl BlobAllocator for ExhaustedAllocator {
        fn allocate_zeroed(
            &self,
            layout: std::alloc::Layout,
        ) -> Result<std::ptr::NonNull<u8>, BlobAllocatorError> {
            Err(BlobAllocatorError::OutOfMemory {
                bytes: layout.size(),
            })
        }

        unsafe fn deallocate(&self, _ptr: std::ptr::NonNull<u8>, _layout: std::alloc::Layout) {}
    }

    #[test]
    fn test_forward_allocation_failure() {
        let config = DeconvolutionConfig {
            num_output: 1,
            kernel_size: 1,
            weight_data_size: 1,
            ..Default::default()
        };
        let mut layer = Deconvolution::with_allocator(config, ExhaustedAllocator);
        layer
            .set_weights(Blob::from_vec_1d(vec![2.0], ExhaustedAllocator), None)
            .unwrap();

        let input = Blob::from_vec(1, 1, 1, vec![1.0], ExhaustedAllocator).unwrap();
        for strategy in [DeconvStrategy::Direct, DeconvStrategy::Gemm] {
            let layer = layer.clone().with_strategy(strategy);
            let err = layer.forward(&input).unwrap_err();
            assert!(err.is_out_of_memory());
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_config_serde() -> Result<(), serde_json::Error> {
        let config = DeconvolutionConfig {
            num_output: 4,
            kernel_size: 3,
            pad: 1,
            bias_term: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&config)?;
        let back: DeconvolutionConfig = serde_json::from_str(&json)?;
        assert_eq!(back, config);
        Ok(())
    }
}
