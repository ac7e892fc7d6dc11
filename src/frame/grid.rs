//! Bounds-checked 2D pixel grid with explicit stride
//!
//! Every image-like buffer in the pipeline (color, depth, alpha mask) is a
//! `PixelGrid`, so row walking is uniform and stride handling lives in one
//! place instead of being repeated at every consumer.

/// A row-major 2D grid of pixels with an explicit stride.
///
/// `stride` is measured in elements (not bytes) and is always >= `width`.
/// Rows past `width` up to `stride` are padding and never exposed through
/// the accessors.
#[derive(Clone, PartialEq)]
pub struct PixelGrid<T> {
    data: Vec<T>,
    width: usize,
    height: usize,
    stride: usize,
}

impl<T: Copy + Default> PixelGrid<T> {
    /// Create a grid filled with `T::default()` and a tight stride.
    pub fn new(width: usize, height: usize) -> Self {
        Self::with_stride(width, height, width)
    }

    /// Create a grid with row padding.
    pub fn with_stride(width: usize, height: usize, stride: usize) -> Self {
        assert!(stride >= width, "stride {stride} smaller than width {width}");
        Self {
            data: vec![T::default(); stride * height],
            width,
            height,
            stride,
        }
    }

    /// Wrap an existing buffer. The buffer length must match `width * height`.
    pub fn from_vec(data: Vec<T>, width: usize, height: usize) -> Self {
        assert_eq!(data.len(), width * height, "buffer length mismatch");
        Self {
            data,
            width,
            height,
            stride: width,
        }
    }

    /// Create a grid filled with a single value.
    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Self {
            data: vec![value; width * height],
            width,
            height,
            stride: width,
        }
    }
}

impl<T: Copy> PixelGrid<T> {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn resolution(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Number of addressable pixels (excluding stride padding).
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read a pixel, `None` when out of bounds.
    pub fn get(&self, x: usize, y: usize) -> Option<T> {
        if x < self.width && y < self.height {
            Some(self.data[y * self.stride + x])
        } else {
            None
        }
    }

    /// Write a pixel, ignored when out of bounds.
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        if x < self.width && y < self.height {
            self.data[y * self.stride + x] = value;
        }
    }

    /// One row, padding excluded.
    pub fn row(&self, y: usize) -> &[T] {
        assert!(y < self.height, "row {y} out of bounds");
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [T] {
        assert!(y < self.height, "row {y} out of bounds");
        let start = y * self.stride;
        &mut self.data[start..start + self.width]
    }

    /// Read a pixel by its linear offset (`y * width + x`, padding excluded).
    pub fn get_linear(&self, offset: usize) -> Option<T> {
        if offset < self.len() {
            let (x, y) = (offset % self.width, offset / self.width);
            Some(self.data[y * self.stride + x])
        } else {
            None
        }
    }

    /// Write a pixel by its linear offset.
    pub fn set_linear(&mut self, offset: usize, value: T) {
        if offset < self.len() {
            let (x, y) = (offset % self.width, offset / self.width);
            self.data[y * self.stride + x] = value;
        }
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    /// Raw backing storage including stride padding.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T> std::fmt::Debug for PixelGrid<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelGrid")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .finish()
    }
}
