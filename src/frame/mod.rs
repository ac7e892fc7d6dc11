//! Unified frame representation
//!
//! A single typed pixel-grid abstraction backs color, depth and mask
//! buffers across the whole pipeline; conversions to other image types
//! happen only at the capture-input and render/encode-output edges.

pub mod grid;
pub mod scale;
pub mod types;

pub use grid::PixelGrid;
pub use types::{Bgra, CaptureFrame, ColorGrid, CompositeFrame, DepthGrid, FaceRect, MaskGrid};
