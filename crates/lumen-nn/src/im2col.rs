use rayon::prelude::*;

/// Geometry shared by [`im2col`] and [`col2im`].
///
/// The spatial tensor holds `channels` packed planes of `height x width`. The
/// column buffer holds one row of `height_col * width_col` values for each of
/// the `channels * kernel_h * kernel_w` virtual channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnGeometry {
    /// Number of spatial channels.
    pub channels: usize,
    /// Spatial height.
    pub height: usize,
    /// Spatial width.
    pub width: usize,
    /// Kernel rows.
    pub kernel_h: usize,
    /// Kernel columns.
    pub kernel_w: usize,
    /// Zero padding above and below.
    pub pad_h: usize,
    /// Zero padding left and right.
    pub pad_w: usize,
    /// Vertical stride.
    pub stride_h: usize,
    /// Horizontal stride.
    pub stride_w: usize,
    /// Vertical dilation.
    pub dilation_h: usize,
    /// Horizontal dilation.
    pub dilation_w: usize,
}

impl ColumnGeometry {
    /// Geometry with a square kernel and identical parameters on both axes.
    pub fn square(
        channels: usize,
        height: usize,
        width: usize,
        kernel_size: usize,
        pad: usize,
        stride: usize,
        dilation: usize,
    ) -> Self {
        Self {
            channels,
            height,
            width,
            kernel_h: kernel_size,
            kernel_w: kernel_size,
            pad_h: pad,
            pad_w: pad,
            stride_h: stride,
            stride_w: stride,
            dilation_h: dilation,
            dilation_w: dilation,
        }
    }

    /// Rows of the column grid. Sizes not evenly covered by the stride are truncated.
    pub fn height_col(&self) -> usize {
        col_extent(self.height, self.pad_h, self.kernel_h, self.stride_h, self.dilation_h)
    }

    /// Columns of the column grid.
    pub fn width_col(&self) -> usize {
        col_extent(self.width, self.pad_w, self.kernel_w, self.stride_w, self.dilation_w)
    }

    /// Number of elements of the spatial tensor.
    pub fn im_len(&self) -> usize {
        self.channels * self.height * self.width
    }

    /// Number of elements of the column buffer.
    pub fn col_len(&self) -> usize {
        self.channels * self.kernel_h * self.kernel_w * self.height_col() * self.width_col()
    }
}

fn col_extent(size: usize, pad: usize, kernel: usize, stride: usize, dilation: usize) -> usize {
    let dilated = dilation * kernel.saturating_sub(1) + 1;
    match (size + 2 * pad).checked_sub(dilated) {
        Some(span) if kernel > 0 => span / stride + 1,
        _ => 0,
    }
}

/// Maps a column coordinate to its spatial coordinate, `None` when it falls in the padding.
#[inline]
fn source_index(
    col: usize,
    stride: usize,
    offset: usize,
    pad: usize,
    size: usize,
) -> Option<usize> {
    (col * stride + offset)
        .checked_sub(pad)
        .filter(|&pos| pos < size)
}

/// Gather patches of a spatial tensor into a column buffer.
///
/// Every virtual channel `c` is split into its image channel and kernel tap.
/// Each column cell reads the tap at `h * stride + tap * dilation - pad`, or
/// zero when that position lies outside the image. Virtual channels are
/// written in parallel since their rows are disjoint.
///
/// # Arguments
///
/// * `data_im` - The spatial tensor, `geom.im_len()` values.
/// * `geom` - The transform geometry.
/// * `data_col` - The column buffer, `geom.col_len()` values.
///
/// # Panics
///
/// Panics if a buffer length does not match the geometry.
///
/// # Example
///
/// ```rust
/// use lumen_nn::im2col::{im2col, ColumnGeometry};
///
/// let geom = ColumnGeometry::square(1, 2, 2, 2, 0, 1, 1);
/// let mut col = vec![0.0; geom.col_len()];
/// im2col(&[1.0, 2.0, 3.0, 4.0], &geom, &mut col);
/// assert_eq!(col, vec![1.0, 2.0, 3.0, 4.0]);
/// ```
pub fn im2col(data_im: &[f32], geom: &ColumnGeometry, data_col: &mut [f32]) {
    assert_eq!(data_im.len(), geom.im_len(), "Image size mismatch");
    assert_eq!(data_col.len(), geom.col_len(), "Column size mismatch");

    let (height_col, width_col) = (geom.height_col(), geom.width_col());
    let col_plane = height_col * width_col;
    let im_plane = geom.height * geom.width;
    if col_plane == 0 {
        return;
    }

    data_col
        .par_chunks_exact_mut(col_plane)
        .enumerate()
        .for_each(|(c, col_row)| {
            let w_offset = c % geom.kernel_w;
            let h_offset = (c / geom.kernel_w) % geom.kernel_h;
            let c_im = c / geom.kernel_h / geom.kernel_w;
            let src = &data_im[c_im * im_plane..(c_im + 1) * im_plane];

            for (h, dst_row) in col_row.chunks_exact_mut(width_col).enumerate() {
                let Some(h_pad) = source_index(
                    h,
                    geom.stride_h,
                    h_offset * geom.dilation_h,
                    geom.pad_h,
                    geom.height,
                ) else {
                    dst_row.fill(0.0);
                    continue;
                };
                let src_row = &src[h_pad * geom.width..(h_pad + 1) * geom.width];

                for (w, dst) in dst_row.iter_mut().enumerate() {
                    *dst = source_index(
                        w,
                        geom.stride_w,
                        w_offset * geom.dilation_w,
                        geom.pad_w,
                        geom.width,
                    )
                    .map_or(0.0, |w_pad| src_row[w_pad]);
                }
            }
        });
}

/// Fold a column buffer back into a spatial tensor, accumulating overlaps.
///
/// The exact inverse mapping of [`im2col`], except that the destination is
/// cleared first and every in-bounds column value is added to its cell, since
/// several taps can land on the same cell when the stride is smaller than the
/// kernel extent. Destination channels are processed in parallel so each cell
/// is only ever accumulated by one thread.
///
/// # Panics
///
/// Panics if a buffer length does not match the geometry.
///
/// # Example
///
/// ```rust
/// use lumen_nn::im2col::{col2im, ColumnGeometry};
///
/// // a 2x2 kernel sliding over a 3x1 row with stride 1 overlaps in the middle
/// let geom = ColumnGeometry {
///     kernel_h: 1,
///     ..ColumnGeometry::square(1, 1, 3, 2, 0, 1, 1)
/// };
/// let col = vec![1.0, 1.0, 1.0, 1.0];
/// let mut im = vec![9.0; 3];
/// col2im(&col, &geom, &mut im);
/// assert_eq!(im, vec![1.0, 2.0, 1.0]);
/// ```
pub fn col2im(data_col: &[f32], geom: &ColumnGeometry, data_im: &mut [f32]) {
    assert_eq!(data_col.len(), geom.col_len(), "Column size mismatch");
    assert_eq!(data_im.len(), geom.im_len(), "Image size mismatch");

    data_im.fill(0.0);

    let (height_col, width_col) = (geom.height_col(), geom.width_col());
    let col_plane = height_col * width_col;
    let im_plane = geom.height * geom.width;
    let kernel_len = geom.kernel_h * geom.kernel_w;
    if col_plane == 0 || im_plane == 0 {
        return;
    }

    data_im
        .par_chunks_exact_mut(im_plane)
        .zip(data_col.par_chunks_exact(kernel_len * col_plane))
        .for_each(|(im, col)| {
            for (tap, col_row) in col.chunks_exact(col_plane).enumerate() {
                let w_offset = tap % geom.kernel_w;
                let h_offset = tap / geom.kernel_w;

                for (h, src_row) in col_row.chunks_exact(width_col).enumerate() {
                    let Some(h_pad) = source_index(
                        h,
                        geom.stride_h,
                        h_offset * geom.dilation_h,
                        geom.pad_h,
                        geom.height,
                    ) else {
                        continue;
                    };
                    let dst_row = &mut im[h_pad * geom.width..(h_pad + 1) * geom.width];

                    for (w, &v) in src_row.iter().enumerate() {
                        if let Some(w_pad) = source_index(
                            w,
                            geom.stride_w,
                            w_offset * geom.dilation_w,
                            geom.pad_w,
                            geom.width,
                        ) {
                            dst_row[w_pad] += v;
                        }
                    }
                }
            }
        });
}
