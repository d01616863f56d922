use crate::error::WatermarkError;
use crate::types::OutputFormat;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;
use tiny_skia::{FilterQuality, Pixmap, PixmapPaint, Transform};

/// Raster primitives the watermark pipeline is built on.
///
/// Layers passed to `rotate` and `composite` are straight (non-premultiplied)
/// RGBA.
pub trait RasterEngine {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, WatermarkError>;

    fn encode(&self, image: &DynamicImage, format: OutputFormat)
    -> Result<Vec<u8>, WatermarkError>;

    /// Rotates counter-clockwise about the center, keeping the canvas size.
    fn rotate(&self, layer: &RgbaImage, degrees: f32) -> Result<RgbaImage, WatermarkError>;

    /// Alpha-over `layer` onto `base` with its top-left corner at `(x, y)`.
    /// Parts of the layer outside `base` are clipped.
    fn composite(
        &self,
        base: &mut RgbaImage,
        layer: &RgbaImage,
        x: i64,
        y: i64,
    ) -> Result<(), WatermarkError>;

    fn resize(&self, image: &DynamicImage, width: u32, height: u32) -> DynamicImage;
}

/// `image` codecs plus tiny-skia transforms and blending.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkiaRaster;

impl RasterEngine for SkiaRaster {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, WatermarkError> {
        let decoded = match image::guess_format(bytes) {
            Ok(format) => image::load_from_memory_with_format(bytes, format),
            Err(_) => image::load_from_memory(bytes),
        };
        decoded.map_err(|err| WatermarkError::ImageDecode(err.to_string()))
    }

    fn encode(
        &self,
        image: &DynamicImage,
        format: OutputFormat,
    ) -> Result<Vec<u8>, WatermarkError> {
        let mut bytes = Vec::new();
        match format {
            OutputFormat::Png => image
                .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
                .map_err(|err| WatermarkError::Encode(format!("png encode failed: {err}")))?,
            OutputFormat::Jpeg { quality } => {
                let encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
                // The JPEG encoder takes 8-bit gray or RGB only.
                let result = match image {
                    DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => {
                        image.write_with_encoder(encoder)
                    }
                    other => DynamicImage::ImageRgb8(other.to_rgb8()).write_with_encoder(encoder),
                };
                result.map_err(|err| WatermarkError::Encode(format!("jpeg encode failed: {err}")))?
            }
        }
        Ok(bytes)
    }

    fn rotate(&self, layer: &RgbaImage, degrees: f32) -> Result<RgbaImage, WatermarkError> {
        if degrees.rem_euclid(360.0) == 0.0 {
            return Ok(layer.clone());
        }
        let src = rgba_to_pixmap(layer)?;
        let mut dst = new_pixmap(layer.width(), layer.height())?;
        let cx = layer.width() as f32 / 2.0;
        let cy = layer.height() as f32 / 2.0;
        // Device space is y-down, so a positive tiny-skia angle turns clockwise.
        let transform = Transform::from_rotate_at(-degrees, cx, cy);
        let mut paint = PixmapPaint::default();
        paint.quality = FilterQuality::Bilinear;
        dst.draw_pixmap(0, 0, src.as_ref(), &paint, transform, None);
        Ok(pixmap_to_rgba(&dst))
    }

    fn composite(
        &self,
        base: &mut RgbaImage,
        layer: &RgbaImage,
        x: i64,
        y: i64,
    ) -> Result<(), WatermarkError> {
        let Some(window) = Overlap::between(base, layer, x, y) else {
            return Ok(());
        };
        let under = imageops::crop_imm(
            &*base,
            window.base_x,
            window.base_y,
            window.width,
            window.height,
        )
        .to_image();
        let over = imageops::crop_imm(
            layer,
            window.layer_x,
            window.layer_y,
            window.width,
            window.height,
        )
        .to_image();

        let mut target = rgba_to_pixmap(&under)?;
        let top = rgba_to_pixmap(&over)?;
        target.draw_pixmap(
            0,
            0,
            top.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
        let blended = pixmap_to_rgba(&target);

        // Base pixels under fully transparent layer pixels are never written.
        for (lx, ly, px) in over.enumerate_pixels() {
            if px.0[3] == 0 {
                continue;
            }
            base.put_pixel(
                window.base_x + lx,
                window.base_y + ly,
                *blended.get_pixel(lx, ly),
            );
        }
        Ok(())
    }

    fn resize(&self, image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
        image.resize_exact(width, height, FilterType::Lanczos3)
    }
}

/// Rectangle shared by `base` and a layer placed at `(x, y)`, in both
/// coordinate systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Overlap {
    base_x: u32,
    base_y: u32,
    layer_x: u32,
    layer_y: u32,
    width: u32,
    height: u32,
}

impl Overlap {
    fn between(base: &RgbaImage, layer: &RgbaImage, x: i64, y: i64) -> Option<Self> {
        let left = x.max(0);
        let top = y.max(0);
        let right = x
            .saturating_add(i64::from(layer.width()))
            .min(i64::from(base.width()));
        let bottom = y
            .saturating_add(i64::from(layer.height()))
            .min(i64::from(base.height()));
        if left >= right || top >= bottom {
            return None;
        }
        // Every value below lies within one of the two images, so it fits u32.
        Some(Self {
            base_x: left as u32,
            base_y: top as u32,
            layer_x: (left - x) as u32,
            layer_y: (top - y) as u32,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        })
    }
}

pub(crate) fn new_pixmap(width: u32, height: u32) -> Result<Pixmap, WatermarkError> {
    Pixmap::new(width, height).ok_or_else(|| {
        WatermarkError::Raster(format!("cannot allocate {width}x{height} pixmap"))
    })
}

pub(crate) fn rgba_to_pixmap(image: &RgbaImage) -> Result<Pixmap, WatermarkError> {
    let (width, height) = image.dimensions();
    let mut pixmap = new_pixmap(width, height)?;
    let src = image.as_raw();
    let dst = pixmap.data_mut();
    for (src_px, dst_px) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        let a = src_px[3];
        dst_px[0] = premul_u8(src_px[0], a);
        dst_px[1] = premul_u8(src_px[1], a);
        dst_px[2] = premul_u8(src_px[2], a);
        dst_px[3] = a;
    }
    Ok(pixmap)
}

pub(crate) fn pixmap_to_rgba(pixmap: &Pixmap) -> RgbaImage {
    let mut out = RgbaImage::new(pixmap.width(), pixmap.height());
    for (src, dst) in pixmap.pixels().iter().zip(out.pixels_mut()) {
        let c = src.demultiply();
        dst.0 = [c.red(), c.green(), c.blue(), c.alpha()];
    }
    out
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbImage};

    fn checker(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([200, 10, 10, 255])
            } else {
                Rgba([10, 10, 200, 128])
            }
        })
    }

    #[test]
    fn premultiply_round_trip_keeps_opaque_pixels() {
        let src = RgbaImage::from_pixel(3, 2, Rgba([12, 34, 56, 255]));
        let back = pixmap_to_rgba(&rgba_to_pixmap(&src).unwrap());
        assert_eq!(back, src);
    }

    #[test]
    fn rotate_by_zero_is_identity() {
        let layer = checker(9, 7);
        let engine = SkiaRaster;
        assert_eq!(engine.rotate(&layer, 0.0).unwrap(), layer);
        assert_eq!(engine.rotate(&layer, 360.0).unwrap(), layer);
    }

    #[test]
    fn rotate_quarter_turn_is_counter_clockwise() {
        // Opaque marker in the top-right quadrant lands in the top-left one.
        let mut layer = RgbaImage::new(40, 40);
        for y in 2..12 {
            for x in 28..38 {
                layer.put_pixel(x, y, Rgba([255, 0, 0, 255]));
            }
        }
        let rotated = SkiaRaster.rotate(&layer, 90.0).unwrap();
        assert_eq!(rotated.dimensions(), (40, 40));
        assert_eq!(rotated.get_pixel(7, 7).0[3], 255);
        assert_eq!(rotated.get_pixel(33, 7).0[3], 0);
    }

    #[test]
    fn composite_blends_and_clips() {
        let mut base = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        let mut layer = RgbaImage::new(4, 4);
        layer.put_pixel(0, 0, Rgba([255, 255, 255, 255]));
        layer.put_pixel(1, 0, Rgba([255, 255, 255, 0]));
        layer.put_pixel(3, 3, Rgba([255, 255, 255, 255]));

        SkiaRaster.composite(&mut base, &layer, -1, 2).unwrap();

        // layer (1,0) is transparent, layer (3,3) clips off the bottom edge.
        assert_eq!(base.get_pixel(0, 2).0, [0, 0, 0, 255]);
        assert_eq!(base.get_pixel(2, 3).0, [0, 0, 0, 255]);
        for (_, _, px) in base.enumerate_pixels() {
            assert_eq!(px.0[3], 255);
        }

        SkiaRaster.composite(&mut base, &layer, 0, 0).unwrap();
        assert_eq!(base.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(base.get_pixel(3, 3).0, [255, 255, 255, 255]);
        assert_eq!(base.get_pixel(1, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn composite_partial_alpha_mixes_channels() {
        let mut base = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]));
        let layer = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 128]));
        SkiaRaster.composite(&mut base, &layer, 0, 0).unwrap();
        let px = base.get_pixel(0, 0).0;
        assert!((126..=130).contains(&px[0]), "got {px:?}");
        assert_eq!(px[3], 255);
    }

    #[test]
    fn composite_leaves_translucent_base_alone_outside_ink() {
        let mut base = RgbaImage::from_pixel(6, 6, Rgba([10, 20, 30, 255]));
        base.put_pixel(5, 5, Rgba([200, 100, 50, 0]));
        base.put_pixel(4, 5, Rgba([201, 99, 51, 3]));
        base.put_pixel(0, 0, Rgba([7, 8, 9, 0]));
        let before = base.clone();
        let mut layer = RgbaImage::new(6, 6);
        layer.put_pixel(2, 2, Rgba([255, 255, 255, 255]));

        SkiaRaster.composite(&mut base, &layer, 0, 0).unwrap();

        for (x, y, px) in base.enumerate_pixels() {
            if (x, y) == (2, 2) {
                assert_eq!(px.0, [255, 255, 255, 255]);
            } else {
                assert_eq!(px, before.get_pixel(x, y), "pixel ({x}, {y}) changed");
            }
        }
    }

    #[test]
    fn composite_with_transparent_layer_is_a_no_op() {
        let mut base = RgbaImage::from_fn(5, 4, |x, y| {
            Rgba([x as u8 * 40, y as u8 * 50, 77, (x * 60) as u8])
        });
        let before = base.clone();
        let layer = RgbaImage::new(9, 9);
        SkiaRaster.composite(&mut base, &layer, -2, -3).unwrap();
        assert_eq!(base, before);
    }

    #[test]
    fn composite_outside_base_touches_nothing() {
        let mut base = checker(4, 4);
        let before = base.clone();
        let layer = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255]));
        SkiaRaster.composite(&mut base, &layer, 4, 0).unwrap();
        SkiaRaster.composite(&mut base, &layer, -2, -2).unwrap();
        SkiaRaster.composite(&mut base, &layer, i64::MAX, i64::MIN).unwrap();
        assert_eq!(base, before);
    }

    #[test]
    fn empty_pixmap_is_a_raster_error() {
        let err = new_pixmap(0, 7).unwrap_err();
        assert!(matches!(err, WatermarkError::Raster(_)), "{err}");
    }

    #[test]
    fn jpeg_encode_accepts_alpha_input() {
        let image = DynamicImage::ImageRgba8(checker(16, 16));
        let bytes = SkiaRaster
            .encode(&image, OutputFormat::Jpeg { quality: 75 })
            .unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
        let decoded = SkiaRaster.decode(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (16, 16));
    }

    #[test]
    fn png_encode_round_trips_pixels() {
        let src = RgbImage::from_pixel(5, 3, image::Rgb([1, 2, 3]));
        let image = DynamicImage::ImageRgb8(src.clone());
        let bytes = SkiaRaster.encode(&image, OutputFormat::Png).unwrap();
        let decoded = SkiaRaster.decode(&bytes).unwrap();
        assert_eq!(decoded.to_rgb8(), src);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = SkiaRaster.decode(b"not an image").unwrap_err();
        assert!(matches!(err, WatermarkError::ImageDecode(_)));
    }

    #[test]
    fn resize_uses_exact_dimensions() {
        let image = DynamicImage::ImageRgba8(checker(10, 6));
        let resized = SkiaRaster.resize(&image, 5, 3);
        assert_eq!(resized.dimensions(), (5, 3));
    }
}
