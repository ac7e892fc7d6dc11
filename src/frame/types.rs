//! Core frame types shared by every pipeline stage

use crate::frame::grid::PixelGrid;
use crate::pipeline::types::MediaTime;

/// Packed BGRA pixel, matching the 32BGRA capture format.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bgra {
    pub b: u8,
    pub g: u8,
    pub r: u8,
    pub a: u8,
}

impl Bgra {
    pub const fn new(b: u8, g: u8, r: u8, a: u8) -> Self {
        Self { b, g, r, a }
    }

    pub const BLACK: Bgra = Bgra::new(0, 0, 0, 255);
    pub const TRANSPARENT: Bgra = Bgra::new(0, 0, 0, 0);
}

/// Color frame buffer.
pub type ColorGrid = PixelGrid<Bgra>;

/// Depth map: meters as 32-bit floats, NaN where the sensor had no reading.
pub type DepthGrid = PixelGrid<f32>;

/// Alpha mask: per-pixel foreground weight in [0, 1].
pub type MaskGrid = PixelGrid<f32>;

/// Face bounds in color-frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center point of the rectangle.
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// One synchronized capture tick: color and depth that both succeeded,
/// plus an optional face detection. Immutable once emitted by the
/// synchronizer; owned by the stage currently processing it.
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    pub color: ColorGrid,
    pub depth: DepthGrid,
    pub face: Option<FaceRect>,
    pub pts: MediaTime,
}

impl CaptureFrame {
    /// Ratio between depth and color horizontal resolution, used to map
    /// color-frame coordinates into depth-buffer pixels.
    pub fn depth_scale(&self) -> f32 {
        self.depth.width() as f32 / self.color.width() as f32
    }
}

/// A composited output frame, ready for display or encoding.
#[derive(Debug, Clone)]
pub struct CompositeFrame {
    pub pixels: ColorGrid,
    pub pts: MediaTime,
}
