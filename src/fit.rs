use crate::error::WatermarkError;
use crate::raster::RasterEngine;
use crate::types::OutputFormat;
use image::DynamicImage;

pub const MAX_FIT_ITERATIONS: usize = 24;

/// Final candidate of a size fit.
///
/// `encoded` holds the exact bytes that were measured, in `format`.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub image: DynamicImage,
    pub format: OutputFormat,
    pub encoded: Vec<u8>,
    pub ratio: f64,
    pub iterations: usize,
}

/// Everything a fit measured, minus the pixels.
#[derive(Debug, Clone)]
pub struct FittedEncoding {
    pub format: OutputFormat,
    pub encoded: Vec<u8>,
    pub ratio: f64,
    pub iterations: usize,
}

impl FittedEncoding {
    pub fn switched_to_lossy(&self) -> bool {
        self.format.is_lossy()
    }
}

impl FitOutcome {
    pub fn into_parts(self) -> (DynamicImage, FittedEncoding) {
        (
            self.image,
            FittedEncoding {
                format: self.format,
                encoded: self.encoded,
                ratio: self.ratio,
                iterations: self.iterations,
            },
        )
    }
}

pub struct SizeFitter<'e, E: RasterEngine> {
    engine: &'e E,
    lossy: OutputFormat,
    max_iterations: usize,
}

impl<'e, E: RasterEngine> SizeFitter<'e, E> {
    pub fn new(engine: &'e E, lossy: OutputFormat) -> Self {
        Self {
            engine,
            lossy,
            max_iterations: MAX_FIT_ITERATIONS,
        }
    }

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Re-encodes `image` until it fits in `ceiling` bytes.
    ///
    /// PNG is tried first. Past that, alpha is dropped (channels kept as is, no
    /// background blend), the lossy format takes over and both sides shrink by a
    /// ratio refined from the latest measured size. Each downscale starts from
    /// the full-size image.
    pub fn fit(&self, image: DynamicImage, ceiling: u64) -> Result<FitOutcome, WatermarkError> {
        let encoded = self.engine.encode(&image, OutputFormat::Png)?;
        if encoded.len() as u64 <= ceiling {
            log::debug!("png is {} bytes, within limit {}", encoded.len(), ceiling);
            return Ok(FitOutcome {
                image,
                format: OutputFormat::Png,
                encoded,
                ratio: 1.0,
                iterations: 0,
            });
        }

        let base = if image.color().has_alpha() {
            log::info!("Change file type to JPEG.");
            DynamicImage::ImageRgb8(image.to_rgb8())
        } else {
            log::info!("Change file type to JPEG (png was {} bytes).", encoded.len());
            image
        };
        let (width, height) = (base.width(), base.height());

        let mut encoded = self.engine.encode(&base, self.lossy)?;
        let mut candidate: Option<DynamicImage> = None;
        let mut ratio = 1.0f64;
        let mut iterations = 0usize;
        while encoded.len() as u64 > ceiling {
            let current = candidate.as_ref().unwrap_or(&base);
            let (cur_w, cur_h) = (current.width(), current.height());
            if iterations >= self.max_iterations || (cur_w == 1 && cur_h == 1) {
                return Err(WatermarkError::ResizeConvergence {
                    limit: ceiling,
                    smallest: encoded.len() as u64,
                    width: cur_w,
                    height: cur_h,
                });
            }
            iterations += 1;
            ratio *= (ceiling as f64 / encoded.len() as f64).sqrt();
            let next_w = scaled_dimension(width, ratio);
            let next_h = scaled_dimension(height, ratio);
            let resized = self.engine.resize(&base, next_w, next_h);
            encoded = self.engine.encode(&resized, self.lossy)?;
            log::debug!(
                "fit iteration {}: {}x{} ratio {:.4} -> {} bytes",
                iterations,
                next_w,
                next_h,
                ratio,
                encoded.len()
            );
            candidate = Some(resized);
        }

        let image = candidate.unwrap_or(base);
        if iterations > 0 {
            log::info!(
                "Resize from ({}, {}) to ({}, {}), ratio: {:.2}.",
                width,
                height,
                image.width(),
                image.height(),
                ratio
            );
        }
        Ok(FitOutcome {
            image,
            format: self.lossy,
            encoded,
            ratio,
            iterations,
        })
    }
}

fn scaled_dimension(value: u32, ratio: f64) -> u32 {
    ((value as f64 * ratio).floor() as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::SkiaRaster;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    const JPEG: OutputFormat = OutputFormat::Jpeg { quality: 75 };

    fn noise_rgba(width: u32, height: u32) -> RgbaImage {
        let mut state = 0x2545_f491_u32;
        RgbaImage::from_fn(width, height, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let [r, g, b, _] = state.to_le_bytes();
            Rgba([r, g, b, 255])
        })
    }

    #[test]
    fn under_limit_is_returned_unchanged() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([7, 7, 7])));
        let engine = SkiaRaster;
        let outcome = SizeFitter::new(&engine, JPEG)
            .fit(image.clone(), 1_000_000)
            .unwrap();
        assert_eq!(outcome.format, OutputFormat::Png);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.image, image);
        assert!(!outcome.format.is_lossy());
    }

    #[test]
    fn shrinks_noise_under_ceiling_as_jpeg() {
        let image = DynamicImage::ImageRgba8(noise_rgba(400, 300));
        let engine = SkiaRaster;
        let outcome = SizeFitter::new(&engine, JPEG).fit(image, 5_000).unwrap();
        assert!(outcome.format.is_lossy());
        assert!(outcome.encoded.len() <= 5_000);
        assert!(outcome.iterations > 0);
        assert!(outcome.image.width() < 400 && outcome.image.height() < 300);
        assert!(!outcome.image.color().has_alpha());
        assert_eq!(
            engine.encode(&outcome.image, JPEG).unwrap(),
            outcome.encoded
        );
    }

    #[test]
    fn fit_is_idempotent_once_met() {
        let engine = SkiaRaster;
        let fitter = SizeFitter::new(&engine, JPEG);
        let first = fitter
            .fit(DynamicImage::ImageRgba8(noise_rgba(200, 200)), 4_000)
            .unwrap();
        let second = fitter.fit(first.image.clone(), 4_000).unwrap();
        assert_eq!(second.iterations, 0);
        assert_eq!(second.image, first.image);
    }

    #[test]
    fn alpha_is_dropped_without_blending() {
        let mut src = noise_rgba(96, 96);
        src.put_pixel(0, 0, Rgba([200, 100, 50, 0]));
        let engine = SkiaRaster;
        // Too big as PNG, small enough as a low-quality JPEG at full size.
        let outcome = SizeFitter::new(&engine, OutputFormat::Jpeg { quality: 10 })
            .fit(DynamicImage::ImageRgba8(src), 20_000)
            .unwrap();
        assert_eq!(outcome.iterations, 0);
        let (image, fitted) = outcome.into_parts();
        assert!(fitted.switched_to_lossy());
        assert_eq!(fitted.ratio, 1.0);
        let rgb = image.as_rgb8().expect("rgb candidate");
        assert_eq!(rgb.get_pixel(0, 0).0, [200, 100, 50]);
    }

    #[test]
    fn unreachable_ceiling_fails() {
        let engine = SkiaRaster;
        let err = SizeFitter::new(&engine, JPEG)
            .fit(DynamicImage::ImageRgba8(noise_rgba(64, 64)), 1)
            .unwrap_err();
        assert!(matches!(
            err,
            WatermarkError::ResizeConvergence {
                limit: 1,
                width: 1,
                height: 1,
                ..
            }
        ));
    }

    #[test]
    fn iteration_cap_reports_smallest_candidate() {
        let engine = SkiaRaster;
        let err = SizeFitter::new(&engine, JPEG)
            .max_iterations(0)
            .fit(DynamicImage::ImageRgba8(noise_rgba(64, 64)), 100)
            .unwrap_err();
        match err {
            WatermarkError::ResizeConvergence {
                limit,
                smallest,
                width,
                height,
            } => {
                assert_eq!(limit, 100);
                assert!(smallest > 100);
                assert_eq!((width, height), (64, 64));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn scaled_dimension_never_reaches_zero() {
        assert_eq!(scaled_dimension(1000, 0.5), 500);
        assert_eq!(scaled_dimension(1000, 0.00001), 1);
        assert_eq!(scaled_dimension(3, 0.999), 2);
    }
}
