//! Strided views over caller-owned sample buffers
//!
//! A view maps `(column, row)` to `base + column * col_stride + row * row_stride`
//! in a flat slice. Strides are in elements, not bytes. Every access is
//! bounds-checked against the slice; rectangle checks let the codec
//! validate once and then walk the buffer without per-element failure
//! paths.

/// Read-only strided view
#[derive(Debug, Clone, Copy)]
pub struct StridedView<'a, T> {
    data: &'a [T],
    base: usize,
    col_stride: usize,
    row_stride: usize,
}

/// Writable strided view
#[derive(Debug)]
pub struct StridedViewMut<'a, T> {
    data: &'a mut [T],
    base: usize,
    col_stride: usize,
    row_stride: usize,
}

/// Largest flat index touched by a rectangle whose far corner is `(col, row)`
fn far_index(base: usize, col_stride: usize, row_stride: usize, col: usize, row: usize) -> Option<usize> {
    col.checked_mul(col_stride)?
        .checked_add(row.checked_mul(row_stride)?)?
        .checked_add(base)
}

impl<'a, T: Copy> StridedView<'a, T> {
    pub fn new(data: &'a [T], col_stride: usize, row_stride: usize) -> Self {
        Self::with_base(data, 0, col_stride, row_stride)
    }

    /// View starting `base` elements into `data`
    pub fn with_base(data: &'a [T], base: usize, col_stride: usize, row_stride: usize) -> Self {
        Self {
            data,
            base,
            col_stride,
            row_stride,
        }
    }

    /// Row-major view of a dense `cols`-wide buffer
    pub fn dense(data: &'a [T], cols: usize) -> Self {
        Self::new(data, 1, cols)
    }

    #[inline]
    fn index(&self, col: usize, row: usize) -> Option<usize> {
        far_index(self.base, self.col_stride, self.row_stride, col, row)
            .filter(|&i| i < self.data.len())
    }

    /// Element at `(col, row)`
    #[inline]
    pub fn get(&self, col: usize, row: usize) -> Option<T> {
        self.index(col, row).map(|i| self.data[i])
    }

    /// Whether every cell up to `(max_col, max_row)` is inside the buffer
    pub fn covers(&self, max_col: usize, max_row: usize) -> bool {
        self.index(max_col, max_row).is_some()
    }

    /// Cells `min_col..=max_col` of `row`
    ///
    /// Callers check [`covers`](Self::covers) first; out-of-range cells
    /// end the iterator early.
    pub fn row(&self, row: usize, min_col: usize, max_col: usize) -> impl Iterator<Item = T> + '_ {
        (min_col..=max_col).map_while(move |c| self.get(c, row))
    }

    pub fn col_stride(&self) -> usize {
        self.col_stride
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }
}

impl<'a, T: Copy> StridedViewMut<'a, T> {
    pub fn new(data: &'a mut [T], col_stride: usize, row_stride: usize) -> Self {
        Self::with_base(data, 0, col_stride, row_stride)
    }

    pub fn with_base(data: &'a mut [T], base: usize, col_stride: usize, row_stride: usize) -> Self {
        Self {
            data,
            base,
            col_stride,
            row_stride,
        }
    }

    /// Row-major view of a dense `cols`-wide buffer
    pub fn dense(data: &'a mut [T], cols: usize) -> Self {
        Self::new(data, 1, cols)
    }

    #[inline]
    fn index(&self, col: usize, row: usize) -> Option<usize> {
        far_index(self.base, self.col_stride, self.row_stride, col, row)
            .filter(|&i| i < self.data.len())
    }

    pub fn get(&self, col: usize, row: usize) -> Option<T> {
        self.index(col, row).map(|i| self.data[i])
    }

    /// Store `value` at `(col, row)`; false if outside the buffer
    #[inline]
    pub fn set(&mut self, col: usize, row: usize, value: T) -> bool {
        match self.index(col, row) {
            Some(i) => {
                self.data[i] = value;
                true
            }
            None => false,
        }
    }

    pub fn covers(&self, max_col: usize, max_row: usize) -> bool {
        self.index(max_col, max_row).is_some()
    }
}
