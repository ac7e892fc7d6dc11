//! Still-photo export
//!
//! Foreground extractions keep their alpha channel, so photos are written
//! as PNG. The BGRA grid is swizzled into the RGBA layout `image` expects.

use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use log::info;
use std::path::Path;

use crate::frame::types::ColorGrid;

/// Write a color grid to a PNG file, preserving transparency.
pub fn save_png(pixels: &ColorGrid, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create output directory {}", parent.display()))?;
    }

    let (width, height) = pixels.resolution();
    let mut image = RgbaImage::new(width as u32, height as u32);
    for y in 0..height {
        for x in 0..width {
            let p = pixels.get(x, y).unwrap_or_default();
            image.put_pixel(x as u32, y as u32, Rgba([p.r, p.g, p.b, p.a]));
        }
    }

    image
        .save(path)
        .with_context(|| format!("Cannot write photo to {}", path.display()))?;
    info!("Photo saved to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::types::Bgra;

    #[test]
    fn test_save_png_round_trips_channels() {
        let mut grid = ColorGrid::new(2, 2);
        grid.set(0, 0, Bgra::new(10, 20, 30, 255));
        grid.set(1, 0, Bgra::TRANSPARENT);
        grid.set(0, 1, Bgra::new(0, 255, 0, 255));
        grid.set(1, 1, Bgra::new(255, 0, 0, 128));

        let dir = std::env::temp_dir().join("depthcast-photo-test");
        let path = dir.join("shot.png");
        save_png(&grid, &path).unwrap();

        let loaded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(loaded.dimensions(), (2, 2));
        // BGRA input lands as RGBA on disk
        assert_eq!(loaded.get_pixel(0, 0), &Rgba([30, 20, 10, 255]));
        assert_eq!(loaded.get_pixel(1, 0).0[3], 0);
        assert_eq!(loaded.get_pixel(1, 1).0[3], 128);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
