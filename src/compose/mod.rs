//! Compositing: blending the subject over substitute backgrounds
//!
//! The compositor owns the pre-scaled background set and blends the color
//! frame over the current background using the alpha matte. Foreground
//! extraction (photo) and chroma keying (video) both work from the exact
//! pixel offsets recorded during binarization.

use image::RgbaImage;
use image::imageops::FilterType;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::frame::types::{Bgra, ColorGrid, MaskGrid};

/// Chroma key color substituted for background pixels on the video path:
/// pure green, the conventional key for later re-keying.
pub const KEY_COLOR: Bgra = Bgra::new(0, 255, 0, 255);

/// What the composite step outputs when no blending is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Pass the color frame through unchanged
    Original,
    /// Blend foreground over the current background (or black)
    #[default]
    Blended,
}

/// Ordered set of substitute backgrounds, pre-scaled to the capture
/// resolution.
///
/// The index advances round-robin exactly once per composited frame, so
/// after K frames over N images the sequence is `0, 1, .., N-1, 0, ..`
/// (`index = K mod N`).
pub struct BackgroundSet {
    images: Vec<ColorGrid>,
    index: usize,
    resolution: (usize, usize),
}

impl BackgroundSet {
    pub fn new() -> Self {
        Self {
            images: Vec::new(),
            index: 0,
            resolution: (0, 0),
        }
    }

    /// Rescale all source images to the given capture resolution.
    ///
    /// Called whenever the synchronizer reports a resolution change; the
    /// round-robin position resets so the cycle restarts deterministically.
    pub fn rebuild(&mut self, sources: &[RgbaImage], width: usize, height: usize) {
        self.images.clear();
        self.index = 0;
        self.resolution = (width, height);
        for source in sources {
            let resized =
                image::imageops::resize(source, width as u32, height as u32, FilterType::Triangle);
            self.images.push(rgba_to_grid(&resized));
        }
        debug!(
            "background cache rebuilt: {} images at {}x{}",
            self.images.len(),
            width,
            height
        );
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn resolution(&self) -> (usize, usize) {
        self.resolution
    }

    /// Current background for this frame, then advance the cycle.
    pub fn next(&mut self) -> Option<&ColorGrid> {
        if self.images.is_empty() {
            return None;
        }
        let current = self.index;
        self.index = if current == self.images.len() - 1 {
            0
        } else {
            current + 1
        };
        Some(&self.images[current])
    }

    #[cfg(test)]
    fn current_index(&self) -> usize {
        self.index
    }
}

impl Default for BackgroundSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Blends capture frames over the background set.
pub struct Compositor {
    backgrounds: BackgroundSet,
    mode: DisplayMode,
}

impl Compositor {
    pub fn new(mode: DisplayMode) -> Self {
        Self {
            backgrounds: BackgroundSet::new(),
            mode,
        }
    }

    pub fn set_mode(&mut self, mode: DisplayMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn backgrounds_mut(&mut self) -> &mut BackgroundSet {
        &mut self.backgrounds
    }

    /// Blend `color` over the current background using `mask` as the
    /// per-pixel weight. In [`DisplayMode::Original`] the color frame is
    /// returned unchanged and the background cycle does not advance; in
    /// blended mode with no backgrounds configured the blend runs against
    /// black. The cycle advances exactly once per composited frame.
    pub fn composite(&mut self, color: &ColorGrid, mask: &MaskGrid) -> ColorGrid {
        debug_assert_eq!(
            mask.resolution(),
            color.resolution(),
            "mask must be upscaled to the composite resolution"
        );

        if self.mode == DisplayMode::Original {
            return color.clone();
        }

        let (w, h) = color.resolution();
        let mut out = ColorGrid::new(w, h);
        let background = self.backgrounds.next();

        for y in 0..h {
            let fg_row = color.row(y);
            let mask_row = mask.row(y);
            let bg_row = background.map(|bg| bg.row(y));
            let out_row = out.row_mut(y);
            for x in 0..w {
                let weight = mask_row[x].clamp(0.0, 1.0);
                let bg = bg_row.map_or(Bgra::BLACK, |row| row[x]);
                out_row[x] = blend(fg_row[x], bg, weight);
            }
        }
        out
    }
}

/// Produce an alpha-matted image for photo capture: pixels at the offsets
/// recorded by binarize become fully transparent, everything else keeps
/// full opacity.
pub fn extract_foreground(frame: &ColorGrid, cut: &[usize]) -> ColorGrid {
    let mut out = frame.clone();
    for y in 0..out.height() {
        for px in out.row_mut(y) {
            px.a = 255;
        }
    }
    for &offset in cut {
        out.set_linear(offset, Bgra::TRANSPARENT);
    }
    out
}

/// Substitute the key color at the cut offsets for the video path.
///
/// Alpha does not survive H.264, so background pixels are painted with a
/// known key color that can be re-keyed during playback.
pub fn apply_chroma_key(frame: &mut ColorGrid, cut: &[usize]) {
    for &offset in cut {
        frame.set_linear(offset, KEY_COLOR);
    }
}

/// Convert a composited grid to an RGBA image at the photo-output edge.
pub fn grid_to_rgba(frame: &ColorGrid) -> RgbaImage {
    let (w, h) = frame.resolution();
    let mut out = RgbaImage::new(w as u32, h as u32);
    for y in 0..h {
        let row = frame.row(y);
        for (x, px) in row.iter().enumerate() {
            out.put_pixel(x as u32, y as u32, image::Rgba([px.r, px.g, px.b, px.a]));
        }
    }
    out
}

/// Convert an RGBA image into the internal grid at the capture-input edge.
pub fn rgba_to_grid(source: &RgbaImage) -> ColorGrid {
    let (w, h) = (source.width() as usize, source.height() as usize);
    let mut out = ColorGrid::new(w, h);
    for y in 0..h {
        let row = out.row_mut(y);
        for (x, px) in row.iter_mut().enumerate() {
            let p = source.get_pixel(x as u32, y as u32);
            *px = Bgra::new(p[2], p[1], p[0], p[3]);
        }
    }
    out
}

fn blend(fg: Bgra, bg: Bgra, weight: f32) -> Bgra {
    let mix = |f: u8, b: u8| -> u8 {
        (f as f32 * weight + b as f32 * (1.0 - weight)).round() as u8
    };
    Bgra::new(mix(fg.b, bg.b), mix(fg.g, bg.g), mix(fg.r, bg.r), 255)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelGrid;

    fn solid(w: usize, h: usize, px: Bgra) -> ColorGrid {
        PixelGrid::filled(w, h, px)
    }

    fn backgrounds(n: usize) -> Vec<RgbaImage> {
        (0..n)
            .map(|i| RgbaImage::from_pixel(4, 4, image::Rgba([i as u8, 0, 0, 255])))
            .collect()
    }

    #[test]
    fn test_round_robin_index_sequence() {
        let mut set = BackgroundSet::new();
        set.rebuild(&backgrounds(3), 4, 4);

        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(set.current_index());
            set.next();
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_rebuild_resets_cycle() {
        let mut set = BackgroundSet::new();
        set.rebuild(&backgrounds(2), 4, 4);
        set.next();
        assert_eq!(set.current_index(), 1);
        set.rebuild(&backgrounds(2), 8, 8);
        assert_eq!(set.current_index(), 0);
        assert_eq!(set.resolution(), (8, 8));
    }

    #[test]
    fn test_composite_extremes_select_layers() {
        let mut compositor = Compositor::new(DisplayMode::Blended);
        let fg_px = Bgra::new(10, 20, 30, 255);
        let color = solid(2, 1, fg_px);

        let mut mask = MaskGrid::new(2, 1);
        mask.set(0, 0, 1.0);
        mask.set(1, 0, 0.0);

        // No backgrounds: blend against black
        let out = compositor.composite(&color, &mask);
        assert_eq!(out.get(0, 0), Some(Bgra::new(10, 20, 30, 255)));
        assert_eq!(out.get(1, 0), Some(Bgra::BLACK));
    }

    #[test]
    fn test_composite_original_mode_is_passthrough() {
        let mut compositor = Compositor::new(DisplayMode::Original);
        let color = solid(2, 2, Bgra::new(5, 6, 7, 255));
        let mask = MaskGrid::new(2, 2);
        let out = compositor.composite(&color, &mask);
        assert_eq!(out, color);
    }

    #[test]
    fn test_composite_advances_background_once_per_frame() {
        let mut compositor = Compositor::new(DisplayMode::Blended);
        compositor.backgrounds_mut().rebuild(&backgrounds(2), 2, 2);

        let color = solid(2, 2, Bgra::new(0, 0, 0, 255));
        let mask = PixelGrid::filled(2, 2, 0.0f32);

        // Frame 1 shows background 0 (red channel 0), frame 2 shows 1
        let first = compositor.composite(&color, &mask);
        let second = compositor.composite(&color, &mask);
        assert_eq!(first.get(0, 0).unwrap().r, 0);
        assert_eq!(second.get(0, 0).unwrap().r, 1);
    }

    #[test]
    fn test_extract_and_recomposite_round_trip() {
        let fg_px = Bgra::new(40, 80, 120, 255);
        let frame = solid(4, 1, fg_px);
        let cut = vec![1, 3];

        let matte = extract_foreground(&frame, &cut);
        assert_eq!(matte.get(1, 0), Some(Bgra::TRANSPARENT));
        assert_eq!(matte.get(3, 0), Some(Bgra::TRANSPARENT));

        // Re-composite over a known solid background: foreground pixels
        // reproduce exactly, cut pixels expose the background exactly
        let bg_px = Bgra::new(200, 100, 50, 255);
        let mut recomposed = ColorGrid::new(4, 1);
        for offset in 0..4usize {
            let px = matte.get_linear(offset).unwrap();
            recomposed.set_linear(offset, if px.a == 0 { bg_px } else { px });
        }
        assert_eq!(recomposed.get(0, 0), Some(fg_px));
        assert_eq!(recomposed.get(1, 0), Some(bg_px));
        assert_eq!(recomposed.get(2, 0), Some(fg_px));
        assert_eq!(recomposed.get(3, 0), Some(bg_px));
    }

    #[test]
    fn test_chroma_key_substitution() {
        let mut frame = solid(3, 1, Bgra::new(9, 9, 9, 255));
        apply_chroma_key(&mut frame, &[2]);
        assert_eq!(frame.get(2, 0), Some(KEY_COLOR));
        assert_eq!(frame.get(0, 0), Some(Bgra::new(9, 9, 9, 255)));
    }

    #[test]
    fn test_rgba_grid_conversions_swap_channels() {
        let img = RgbaImage::from_pixel(1, 1, image::Rgba([1, 2, 3, 4]));
        let grid = rgba_to_grid(&img);
        assert_eq!(grid.get(0, 0), Some(Bgra::new(3, 2, 1, 4)));
        let back = grid_to_rgba(&grid);
        assert_eq!(back.get_pixel(0, 0).0, [1, 2, 3, 4]);
    }
}
