use crate::error::WatermarkError;
use crate::glyph::is_blank;
use crate::raster::RasterEngine;
use image::{DynamicImage, RgbaImage};

/// Smallest square side that still covers a `width` x `height` image after any
/// rotation about its center.
pub fn bounding_diagonal(width: u32, height: u32) -> u32 {
    let w = width as f64;
    let h = height as f64;
    (w * w + h * h).sqrt().ceil() as u32
}

/// Result of one watermark composite.
#[derive(Debug, Clone)]
pub struct Composited {
    pub image: DynamicImage,
    pub tiles_placed: usize,
}

pub struct TileCompositor<'e, E: RasterEngine> {
    engine: &'e E,
}

impl<'e, E: RasterEngine> TileCompositor<'e, E> {
    pub fn new(engine: &'e E) -> Self {
        Self { engine }
    }

    /// Repeats `tile` over a mask covering the rotated source, rotates it by
    /// `angle` degrees and blends it centered onto `source`.
    ///
    /// A blank tile leaves `source` untouched, including its pixel format.
    /// Otherwise the result is RGBA with the source dimensions.
    pub fn composite(
        &self,
        source: DynamicImage,
        tile: &RgbaImage,
        angle: f32,
        spacing: u32,
    ) -> Result<Composited, WatermarkError> {
        if is_blank(tile) {
            log::debug!("blank glyph tile; skipping composite");
            return Ok(Composited {
                image: source,
                tiles_placed: 0,
            });
        }

        let (width, height) = (source.width(), source.height());
        let diagonal = bounding_diagonal(width, height);
        let (mask, tiles_placed) = tile_mask(tile, diagonal, spacing);
        let mask = self.engine.rotate(&mask, angle)?;

        let mut base = match source {
            DynamicImage::ImageRgba8(rgba) => rgba,
            other => other.to_rgba8(),
        };
        let offset_x = (width as i64 - diagonal as i64) / 2;
        let offset_y = (height as i64 - diagonal as i64) / 2;
        self.engine.composite(&mut base, &mask, offset_x, offset_y)?;
        log::debug!(
            "composited {} tiles on {}x{} (mask {}, angle {}, offset {},{})",
            tiles_placed,
            width,
            height,
            diagonal,
            angle,
            offset_x,
            offset_y
        );

        Ok(Composited {
            image: DynamicImage::ImageRgba8(base),
            tiles_placed,
        })
    }
}

/// Fills a transparent `side` x `side` mask with copies of `tile`.
///
/// Rows step by tile height plus spacing. Every other row starts shifted left by
/// half a tile-plus-spacing so the columns do not line up. Later copies
/// overwrite earlier ones where they touch.
pub fn tile_mask(tile: &RgbaImage, side: u32, spacing: u32) -> (RgbaImage, usize) {
    let mut mask = RgbaImage::new(side, side);
    let step_x = tile.width() as i64 + spacing as i64;
    let step_y = tile.height() as i64 + spacing as i64;
    if step_x <= 0 || step_y <= 0 {
        return (mask, 0);
    }

    let limit = side as i64;
    let mut placed = 0usize;
    let mut parity = 0i64;
    let mut y = 0i64;
    while y < limit {
        let mut x = -((step_x as f64 * 0.5 * parity as f64).floor() as i64);
        parity = (parity + 1) % 2;
        while x < limit {
            image::imageops::replace(&mut mask, tile, x, y);
            placed += 1;
            x += step_x;
        }
        y += step_y;
    }
    (mask, placed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::SkiaRaster;
    use image::{Rgb, RgbImage, Rgba};

    #[test]
    fn diagonal_rounds_up() {
        assert_eq!(bounding_diagonal(3, 4), 5);
        assert_eq!(bounding_diagonal(1000, 1000), 1415);
        assert_eq!(bounding_diagonal(1, 1), 2);
    }

    #[test]
    fn unit_tile_without_spacing_covers_everything() {
        let tile = RgbaImage::from_pixel(1, 1, Rgba([9, 9, 9, 255]));
        let (mask, placed) = tile_mask(&tile, 17, 0);
        assert_eq!(placed, 17 * 17);
        assert!(mask.pixels().all(|p| p.0 == [9, 9, 9, 255]));
    }

    #[test]
    fn odd_rows_are_offset_by_half_a_step() {
        let tile = RgbaImage::from_pixel(4, 2, Rgba([255, 0, 0, 255]));
        let (mask, _) = tile_mask(&tile, 20, 2);
        // Row 0 starts at x = 0; row 1 (y = 4) starts at x = -3.
        assert_eq!(mask.get_pixel(0, 0).0[3], 255);
        assert_eq!(mask.get_pixel(4, 0).0[3], 0);
        assert_eq!(mask.get_pixel(0, 4).0[3], 255);
        assert_eq!(mask.get_pixel(1, 4).0[3], 0);
        assert_eq!(mask.get_pixel(3, 4).0[3], 255);
        // Spacing rows stay transparent.
        assert!((0..20).all(|x| mask.get_pixel(x, 2).0[3] == 0));
    }

    #[test]
    fn blank_tile_returns_source_untouched() {
        let source = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 6, Rgb([1, 2, 3])));
        let tile = RgbaImage::new(5, 5);
        let engine = SkiaRaster;
        let out = TileCompositor::new(&engine)
            .composite(source.clone(), &tile, 30.0, 10)
            .unwrap();
        assert_eq!(out.tiles_placed, 0);
        assert_eq!(out.image, source);
    }

    #[test]
    fn composite_keeps_dimensions_and_promotes_to_rgba() {
        let source = DynamicImage::ImageRgb8(RgbImage::from_pixel(120, 80, Rgb([0, 0, 0])));
        let tile = RgbaImage::from_pixel(10, 4, Rgba([255, 255, 255, 255]));
        let engine = SkiaRaster;
        let out = TileCompositor::new(&engine)
            .composite(source, &tile, 30.0, 6)
            .unwrap();
        assert!(out.tiles_placed > 0);
        let rgba = out.image.as_rgba8().expect("rgba output");
        assert_eq!(rgba.dimensions(), (120, 80));
        assert!(rgba.pixels().all(|p| p.0[3] == 255));
        assert!(rgba.pixels().any(|p| p.0[0] > 0));
        assert!(rgba.pixels().any(|p| p.0[0] == 0));
    }

    #[test]
    fn zero_angle_composite_matches_unrotated_mask() {
        let source = DynamicImage::ImageRgba8(RgbaImage::from_pixel(30, 40, Rgba([0, 0, 0, 255])));
        let tile = RgbaImage::from_pixel(3, 3, Rgba([200, 100, 50, 255]));
        let engine = SkiaRaster;
        let out = TileCompositor::new(&engine)
            .composite(source, &tile, 0.0, 2)
            .unwrap();

        let diagonal = bounding_diagonal(30, 40);
        let (mask, _) = tile_mask(&tile, diagonal, 2);
        let offset_x = (30 - diagonal as i64) / 2;
        let offset_y = (40 - diagonal as i64) / 2;
        let rgba = out.image.as_rgba8().expect("rgba output");
        for (x, y, px) in rgba.enumerate_pixels() {
            let mx = (x as i64 - offset_x) as u32;
            let my = (y as i64 - offset_y) as u32;
            let expected = if mask.get_pixel(mx, my).0[3] == 255 {
                [200, 100, 50, 255]
            } else {
                [0, 0, 0, 255]
            };
            assert_eq!(px.0, expected, "pixel ({x},{y})");
        }
    }

    #[test]
    fn translucent_source_survives_outside_the_ink() {
        let source = RgbaImage::from_fn(40, 40, |x, y| match (x + y) % 3 {
            0 => Rgba([200, 100, 50, 0]),
            1 => Rgba([201, 99, 51, 3]),
            _ => Rgba([17, 34, 51, 128]),
        });
        let tile = RgbaImage::from_pixel(2, 2, Rgba([0, 255, 0, 255]));
        let engine = SkiaRaster;
        let out = TileCompositor::new(&engine)
            .composite(DynamicImage::ImageRgba8(source.clone()), &tile, 0.0, 20)
            .unwrap();

        let diagonal = bounding_diagonal(40, 40);
        let (mask, _) = tile_mask(&tile, diagonal, 20);
        let offset = (40 - diagonal as i64) / 2;
        let rgba = out.image.as_rgba8().expect("rgba output");
        let mut inked = 0;
        for (x, y, px) in rgba.enumerate_pixels() {
            let mx = (x as i64 - offset) as u32;
            let my = (y as i64 - offset) as u32;
            if mask.get_pixel(mx, my).0[3] == 0 {
                assert_eq!(px, source.get_pixel(x, y), "pixel ({x},{y})");
            } else {
                inked += 1;
                assert_eq!(px.0, [0, 255, 0, 255], "pixel ({x},{y})");
            }
        }
        assert!(inked > 0);
    }
}
