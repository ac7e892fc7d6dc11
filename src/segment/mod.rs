//! Depth-based foreground segmentation
//!
//! Converts a raw depth map into an alpha matte: a face-relative cutoff
//! binarizes the depth buffer in place, the result is blurred and
//! gamma-biased toward inclusion, then upscaled to the color resolution.

use crate::frame::scale::upscale_bicubic;
use crate::frame::types::{DepthGrid, FaceRect, MaskGrid};

/// Margin added to the depth sampled under the face center, in depth units.
pub const FACE_DEPTH_MARGIN: f32 = 0.25;

/// Cutoff used when no face was detected.
pub const FALLBACK_CUTOFF: f32 = 1.0;

/// Gaussian blur radius applied to the binarized mask.
pub const BLUR_RADIUS: f32 = 3.0;

/// Gamma power applied after the blur; < 1 biases edges toward foreground.
pub const MASK_GAMMA: f32 = 0.5;

/// Depth segmenter owning its blur kernel and scratch buffer.
///
/// Constructed once per pipeline; all per-call parameters are explicit, so
/// there is no hidden cross-call state. The scratch buffer is reused across
/// frames to keep the hot path allocation-free.
pub struct DepthSegmenter {
    kernel: Vec<f32>,
    scratch: Vec<f32>,
}

impl DepthSegmenter {
    pub fn new() -> Self {
        Self {
            kernel: gaussian_kernel(BLUR_RADIUS),
            scratch: Vec::new(),
        }
    }

    /// Derive the foreground/background depth cutoff for one frame.
    ///
    /// With a face rectangle, samples the depth under its center (mapped to
    /// depth-buffer coordinates by the depth/color width ratio, nearest
    /// pixel) and adds [`FACE_DEPTH_MARGIN`]. Without a face, returns
    /// [`FALLBACK_CUTOFF`]. A NaN sample propagates into the cutoff, which
    /// leaves only NaN pixels as foreground in the binarize step.
    pub fn compute_cutoff(
        &self,
        depth: &DepthGrid,
        face: Option<&FaceRect>,
        color_width: usize,
    ) -> f32 {
        let Some(face) = face else {
            return FALLBACK_CUTOFF;
        };

        let scale = depth.width() as f32 / color_width.max(1) as f32;
        let (cx, cy) = face.center();
        let px = (cx * scale).round() as usize;
        let py = (cy * scale).round() as usize;

        match depth.get(px, py) {
            Some(sample) => sample + FACE_DEPTH_MARGIN,
            // Face center outside the depth buffer: treat like no face
            None => FALLBACK_CUTOFF,
        }
    }

    /// Binarize the depth buffer in place against `cutoff`.
    ///
    /// NaN or depth <= cutoff becomes 1.0 (foreground/near), everything
    /// else 0.0 with its linear pixel offset recorded into `cut`. The NaN
    /// convention is deliberate: undefined readings are sensor noise on the
    /// near side, not invalid input. Full O(w*h) scan, no allocation; `cut`
    /// is cleared and refilled, reusing its capacity.
    pub fn binarize(&self, depth: &mut DepthGrid, cutoff: f32, cut: &mut Vec<usize>) {
        cut.clear();
        let width = depth.width();
        for y in 0..depth.height() {
            let base = y * width;
            for (x, value) in depth.row_mut(y).iter_mut().enumerate() {
                if value.is_nan() || *value <= cutoff {
                    *value = 1.0;
                } else {
                    *value = 0.0;
                    cut.push(base + x);
                }
            }
        }
    }

    /// Replace NaN readings with 1.0 (foreground) without thresholding.
    ///
    /// Used when binarization is bypassed and raw depth values flow on as
    /// mask weights: NaN would otherwise poison the blur and blend stages.
    pub fn fill_nan(&self, depth: &mut DepthGrid) {
        for y in 0..depth.height() {
            for value in depth.row_mut(y) {
                if value.is_nan() {
                    *value = 1.0;
                }
            }
        }
    }

    /// Soften mask edges: separable Gaussian blur of radius
    /// [`BLUR_RADIUS`], then gamma [`MASK_GAMMA`].
    pub fn smooth(&mut self, mask: &mut MaskGrid) {
        self.blur_separable(mask);
        for y in 0..mask.height() {
            for value in mask.row_mut(y) {
                *value = value.clamp(0.0, 1.0).powf(MASK_GAMMA);
            }
        }
    }

    /// Upscale the mask to the color resolution by the width ratio.
    pub fn upscale(&self, mask: &MaskGrid, color_width: usize) -> MaskGrid {
        let factor = color_width as f32 / mask.width().max(1) as f32;
        upscale_bicubic(mask, factor)
    }

    fn blur_separable(&mut self, mask: &mut MaskGrid) {
        let (w, h) = mask.resolution();
        let half = self.kernel.len() / 2;
        self.scratch.resize(w.max(h), 0.0);

        // Horizontal pass
        for y in 0..h {
            let row = mask.row(y);
            for x in 0..w {
                let mut acc = 0.0;
                for (k, &weight) in self.kernel.iter().enumerate() {
                    let sx = (x as isize + k as isize - half as isize).clamp(0, w as isize - 1);
                    acc += row[sx as usize] * weight;
                }
                self.scratch[x] = acc;
            }
            mask.row_mut(y).copy_from_slice(&self.scratch[..w]);
        }

        // Vertical pass
        for x in 0..w {
            for y in 0..h {
                let mut acc = 0.0;
                for (k, &weight) in self.kernel.iter().enumerate() {
                    let sy = (y as isize + k as isize - half as isize).clamp(0, h as isize - 1);
                    acc += mask.get(x, sy as usize).unwrap() * weight;
                }
                self.scratch[y] = acc;
            }
            for y in 0..h {
                mask.set(x, y, self.scratch[y]);
            }
        }
    }
}

impl Default for DepthSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalized 1D Gaussian kernel with sigma = radius / 2, truncated at
/// +-radius.
fn gaussian_kernel(radius: f32) -> Vec<f32> {
    let r = radius.ceil() as isize;
    let sigma = (radius / 2.0).max(0.5);
    let mut kernel: Vec<f32> = (-r..=r)
        .map(|i| {
            let x = i as f32;
            (-x * x / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelGrid;

    fn depth_grid(w: usize, h: usize, value: f32) -> DepthGrid {
        PixelGrid::filled(w, h, value)
    }

    #[test]
    fn test_cutoff_without_face_is_fallback() {
        let seg = DepthSegmenter::new();
        let depth = depth_grid(16, 12, 3.7);
        assert_eq!(seg.compute_cutoff(&depth, None, 64), FALLBACK_CUTOFF);
    }

    #[test]
    fn test_cutoff_with_face_samples_center() {
        let seg = DepthSegmenter::new();
        let mut depth = depth_grid(16, 12, 9.0);
        // Face centered at color (32, 24); depth is quarter resolution,
        // so the sampled pixel is (8, 6)
        depth.set(8, 6, 1.5);
        let face = FaceRect::new(24.0, 16.0, 16.0, 16.0);
        let cutoff = seg.compute_cutoff(&depth, Some(&face), 64);
        assert!((cutoff - (1.5 + FACE_DEPTH_MARGIN)).abs() < 1e-6);
    }

    #[test]
    fn test_cutoff_face_outside_depth_falls_back() {
        let seg = DepthSegmenter::new();
        let depth = depth_grid(16, 12, 2.0);
        let face = FaceRect::new(1000.0, 1000.0, 10.0, 10.0);
        assert_eq!(seg.compute_cutoff(&depth, Some(&face), 64), FALLBACK_CUTOFF);
    }

    #[test]
    fn test_binarize_mapping() {
        let seg = DepthSegmenter::new();
        let mut depth = DepthGrid::new(3, 1);
        depth.set(0, 0, 0.5); // near -> foreground
        depth.set(1, 0, 2.0); // far -> background
        depth.set(2, 0, f32::NAN); // undefined -> foreground by convention

        let mut cut = Vec::new();
        seg.binarize(&mut depth, 1.0, &mut cut);

        assert_eq!(depth.get(0, 0), Some(1.0));
        assert_eq!(depth.get(1, 0), Some(0.0));
        assert_eq!(depth.get(2, 0), Some(1.0));
        assert_eq!(cut, vec![1]);
    }

    #[test]
    fn test_binarize_boundary_is_inclusive() {
        let seg = DepthSegmenter::new();
        let mut depth = depth_grid(1, 1, 1.0);
        let mut cut = Vec::new();
        seg.binarize(&mut depth, 1.0, &mut cut);
        assert_eq!(depth.get(0, 0), Some(1.0));
        assert!(cut.is_empty());
    }

    #[test]
    fn test_fill_nan_marks_foreground_only() {
        let seg = DepthSegmenter::new();
        let mut depth = DepthGrid::new(3, 1);
        depth.set(0, 0, 0.5);
        depth.set(1, 0, f32::NAN);
        depth.set(2, 0, 2.0);

        seg.fill_nan(&mut depth);

        // NaN becomes full foreground weight; real readings pass through
        // untouched so they can act as raw mask weights
        assert_eq!(depth.get(0, 0), Some(0.5));
        assert_eq!(depth.get(1, 0), Some(1.0));
        assert_eq!(depth.get(2, 0), Some(2.0));
        assert!(depth.as_slice().iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_binarize_reuses_cut_buffer() {
        let seg = DepthSegmenter::new();
        let mut depth = depth_grid(4, 1, 5.0);
        let mut cut = vec![99, 98, 97];
        seg.binarize(&mut depth, 1.0, &mut cut);
        assert_eq!(cut, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_smooth_keeps_interior_levels() {
        let mut seg = DepthSegmenter::new();
        let mut mask = PixelGrid::filled(16, 16, 1.0);
        seg.smooth(&mut mask);
        // A solid mask stays solid: blur of a constant is the constant,
        // and 1.0^gamma == 1.0
        for y in 0..16 {
            for x in 0..16 {
                assert!((mask.get(x, y).unwrap() - 1.0).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_smooth_biases_edges_toward_foreground() {
        let mut seg = DepthSegmenter::new();
        let mut mask = MaskGrid::new(16, 1);
        for x in 0..8 {
            mask.set(x, 0, 1.0);
        }
        let edge_before = mask.get(8, 0).unwrap();
        seg.smooth(&mut mask);
        let edge_after = mask.get(8, 0).unwrap();
        // gamma 0.5 lifts the blurred edge above its linear value
        assert!(edge_after > edge_before);
        assert!(edge_after > 0.5);
    }

    #[test]
    fn test_upscale_matches_color_width() {
        let seg = DepthSegmenter::new();
        let mask = PixelGrid::filled(16, 12, 1.0);
        let scaled = seg.upscale(&mask, 64);
        assert_eq!(scaled.resolution(), (64, 48));
    }

    #[test]
    fn test_kernel_is_normalized() {
        let kernel = gaussian_kernel(BLUR_RADIUS);
        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert_eq!(kernel.len(), 7);
    }
}
