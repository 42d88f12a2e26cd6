/// A read-only strided matrix over a slice.
#[derive(Debug, Clone, Copy)]
pub struct MatRef<'a> {
    /// Backing values.
    pub data: &'a [f32],
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub cols: usize,
    /// Distance between two consecutive rows.
    pub row_stride: usize,
    /// Distance between two consecutive columns.
    pub col_stride: usize,
}

impl<'a> MatRef<'a> {
    /// A row-major matrix with packed rows.
    pub fn row_major(data: &'a [f32], rows: usize, cols: usize) -> Self {
        Self {
            data,
            rows,
            cols,
            row_stride: cols,
            col_stride: 1,
        }
    }

    /// Returns true if every element addressed by the strides lies inside `data`.
    fn in_bounds(&self) -> bool {
        if self.rows == 0 || self.cols == 0 {
            return true;
        }
        let last = (self.rows - 1) * self.row_stride + (self.cols - 1) * self.col_stride;
        last < self.data.len()
    }
}

/// Computes `c = a * b` with `matrixmultiply::sgemm`.
///
/// `c` is a packed row-major `a.rows x b.cols` matrix and is overwritten.
///
/// # Panics
///
/// Panics if the inner dimensions differ, if a stride addresses memory
/// outside its slice, or if `c` has the wrong length.
///
/// # Example
///
/// ```rust
/// use lumen_nn::gemm::{gemm, MatRef};
///
/// let a = MatRef::row_major(&[1.0, 2.0, 3.0, 4.0], 2, 2);
/// let b = MatRef::row_major(&[1.0, 0.0, 0.0, 1.0], 2, 2);
/// let mut c = vec![0.0; 4];
/// gemm(a, b, &mut c);
/// assert_eq!(c, vec![1.0, 2.0, 3.0, 4.0]);
/// ```
pub fn gemm(a: MatRef<'_>, b: MatRef<'_>, c: &mut [f32]) {
    assert_eq!(a.cols, b.rows, "Inner dimension mismatch");
    assert!(a.in_bounds(), "Left operand strides exceed its data");
    assert!(b.in_bounds(), "Right operand strides exceed its data");
    assert_eq!(c.len(), a.rows * b.cols, "Output size mismatch");

    let (m, k, n) = (a.rows, a.cols, b.cols);
    if m == 0 || n == 0 {
        return;
    }
    if k == 0 {
        c.fill(0.0);
        return;
    }

    // SAFETY: every element addressed through the strides was checked to lie
    // within its slice, and c holds exactly m * n packed values.
    unsafe {
        matrixmultiply::sgemm(
            m,
            k,
            n,
            1.0,
            a.data.as_ptr(),
            a.row_stride as isize,
            a.col_stride as isize,
            b.data.as_ptr(),
            b.row_stride as isize,
            b.col_stride as isize,
            0.0,
            c.as_mut_ptr(),
            n as isize,
            1,
        );
    }
}
