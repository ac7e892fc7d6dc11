//! Resampling between the sensor resolutions and the composite resolution
//!
//! Two filters are deliberately different: the synchronizer downscales with
//! area averaging (no detail is invented on the hot emission path), while
//! masks are upscaled with a bicubic filter so the matte edge stays smooth
//! after the blur/gamma pass.

use crate::frame::grid::PixelGrid;
use crate::frame::types::Bgra;

/// Area-preserving (box average) rescale of a color buffer.
///
/// Each destination pixel averages the source pixels its footprint covers.
/// Equivalent to the identity copy when the resolutions already match.
pub fn scale_area_bgra(src: &PixelGrid<Bgra>, dst_w: usize, dst_h: usize) -> PixelGrid<Bgra> {
    assert!(dst_w > 0 && dst_h > 0, "zero-sized scale target");
    if src.resolution() == (dst_w, dst_h) && src.stride() == src.width() {
        return src.clone();
    }

    let mut dst = PixelGrid::new(dst_w, dst_h);
    let x_ratio = src.width() as f32 / dst_w as f32;
    let y_ratio = src.height() as f32 / dst_h as f32;

    for dy in 0..dst_h {
        let y0 = (dy as f32 * y_ratio) as usize;
        let y1 = (((dy + 1) as f32 * y_ratio).ceil() as usize).clamp(y0 + 1, src.height());
        let row_out = dst.row_mut(dy);
        for (dx, out) in row_out.iter_mut().enumerate() {
            let x0 = (dx as f32 * x_ratio) as usize;
            let x1 = (((dx + 1) as f32 * x_ratio).ceil() as usize).clamp(x0 + 1, src.width());

            let mut acc = [0u32; 4];
            let mut count = 0u32;
            for sy in y0..y1 {
                for &px in &src.row(sy)[x0..x1] {
                    acc[0] += px.b as u32;
                    acc[1] += px.g as u32;
                    acc[2] += px.r as u32;
                    acc[3] += px.a as u32;
                    count += 1;
                }
            }
            *out = Bgra::new(
                (acc[0] / count) as u8,
                (acc[1] / count) as u8,
                (acc[2] / count) as u8,
                (acc[3] / count) as u8,
            );
        }
    }
    dst
}

/// Bicubic (Catmull-Rom) upscale of a mask by a uniform factor.
pub fn upscale_bicubic(src: &PixelGrid<f32>, factor: f32) -> PixelGrid<f32> {
    assert!(factor > 0.0, "non-positive upscale factor");
    let dst_w = ((src.width() as f32 * factor).round() as usize).max(1);
    let dst_h = ((src.height() as f32 * factor).round() as usize).max(1);
    if (dst_w, dst_h) == src.resolution() {
        return src.clone();
    }

    let mut dst = PixelGrid::new(dst_w, dst_h);
    for dy in 0..dst_h {
        let sy = (dy as f32 + 0.5) / factor - 0.5;
        let row_out = dst.row_mut(dy);
        for (dx, out) in row_out.iter_mut().enumerate() {
            let sx = (dx as f32 + 0.5) / factor - 0.5;
            *out = sample_bicubic(src, sx, sy).clamp(0.0, 1.0);
        }
    }
    dst
}

fn sample_bicubic(src: &PixelGrid<f32>, x: f32, y: f32) -> f32 {
    let xi = x.floor() as isize;
    let yi = y.floor() as isize;
    let fx = x - xi as f32;
    let fy = y - yi as f32;

    let mut col = [0.0f32; 4];
    for (j, c) in col.iter_mut().enumerate() {
        let sy = clamp_index(yi - 1 + j as isize, src.height());
        let row = [
            sample_clamped(src, xi - 1, sy),
            sample_clamped(src, xi, sy),
            sample_clamped(src, xi + 1, sy),
            sample_clamped(src, xi + 2, sy),
        ];
        *c = cubic_hermite(row[0], row[1], row[2], row[3], fx);
    }
    cubic_hermite(col[0], col[1], col[2], col[3], fy)
}

fn sample_clamped(src: &PixelGrid<f32>, x: isize, y: usize) -> f32 {
    let v = src
        .get(clamp_index(x, src.width()), y)
        .unwrap_or(0.0);
    // NaN depth never reaches the mask path, but guard the filter anyway:
    // one undefined tap would otherwise poison a 4x4 neighborhood.
    if v.is_nan() { 1.0 } else { v }
}

fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}

/// Catmull-Rom interpolation between p1 and p2.
fn cubic_hermite(p0: f32, p1: f32, p2: f32, p3: f32, t: f32) -> f32 {
    let a = -0.5 * p0 + 1.5 * p1 - 1.5 * p2 + 0.5 * p3;
    let b = p0 - 2.5 * p1 + 2.0 * p2 - 0.5 * p3;
    let c = -0.5 * p0 + 0.5 * p2;
    a * t * t * t + b * t * t + c * t + p1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_scale_preserves_constant_color() {
        let src = PixelGrid::filled(8, 8, Bgra::new(10, 20, 30, 255));
        let dst = scale_area_bgra(&src, 4, 4);
        assert_eq!(dst.resolution(), (4, 4));
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(dst.get(x, y), Some(Bgra::new(10, 20, 30, 255)));
            }
        }
    }

    #[test]
    fn test_bicubic_upscale_dimensions_and_range() {
        let mut src: PixelGrid<f32> = PixelGrid::new(4, 4);
        for y in 0..4 {
            for x in 0..4 {
                src.set(x, y, if x < 2 { 1.0 } else { 0.0 });
            }
        }
        let dst = upscale_bicubic(&src, 4.0);
        assert_eq!(dst.resolution(), (16, 16));
        for y in 0..16 {
            for x in 0..16 {
                let v = dst.get(x, y).unwrap();
                assert!((0.0..=1.0).contains(&v));
            }
        }
        // Far left stays foreground, far right stays background
        assert!(dst.get(0, 8).unwrap() > 0.9);
        assert!(dst.get(15, 8).unwrap() < 0.1);
    }

    #[test]
    fn test_identity_scale_is_copy() {
        let src = PixelGrid::filled(5, 3, Bgra::new(1, 2, 3, 4));
        let dst = scale_area_bgra(&src, 5, 3);
        assert_eq!(dst, src);
    }
}
