//! Tiled text watermarking for raster images.
//!
//! A [`Watermarker`] renders the mark text once per image, repeats it in a
//! brick pattern over a mask that covers the image at any rotation, rotates the
//! mask, and blends it onto the image. An optional byte ceiling then re-encodes
//! the result, falling back to JPEG and downscaling until it fits.

mod autofit;
mod config;
mod error;
mod fit;
mod font;
mod glyph;
mod perf;
mod raster;
mod tile;
mod types;

pub use autofit::derive as derive_sizing;
pub use config::{
    DEFAULT_ANGLE, DEFAULT_COLOR, DEFAULT_FONT_SIZE, DEFAULT_JPEG_QUALITY, DEFAULT_OPACITY,
    DEFAULT_OUT_DIR, DEFAULT_SPACING, Sizing, WatermarkConfig,
};
pub use error::{Result, WatermarkError};
pub use fit::{FitOutcome, FittedEncoding, MAX_FIT_ITERATIONS, SizeFitter};
pub use font::FontSource;
pub use glyph::{GlyphStamp, apply_opacity, crop_to_content, is_blank};
pub use perf::{FileTrace, PerfLogger, Stage};
pub use raster::{RasterEngine, SkiaRaster};
pub use tile::{Composited, TileCompositor, bounding_diagonal, tile_mask};
pub use types::{Color, OutputFormat};

use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};

pub struct Watermarker<E: RasterEngine = SkiaRaster> {
    config: WatermarkConfig,
    font: Option<FontSource>,
    engine: E,
    perf: Option<PerfLogger>,
}

#[derive(Clone)]
pub struct WatermarkerBuilder {
    config: WatermarkConfig,
    font: Option<FontSource>,
    perf_path: Option<PathBuf>,
}

/// In-memory result of stamping and size-fitting one image.
#[derive(Debug, Clone)]
pub struct Stamped {
    pub image: DynamicImage,
    pub sizing: Option<Sizing>,
    pub tiles_placed: usize,
    pub fit: Option<FittedEncoding>,
}

impl Stamped {
    /// Format the final save must use. JPEG once size fitting switched to it.
    pub fn output_format(&self) -> OutputFormat {
        self.fit
            .as_ref()
            .map(|fit| fit.format)
            .unwrap_or(OutputFormat::Png)
    }
}

/// Outcome of one successfully processed file.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub source: PathBuf,
    pub output: PathBuf,
    pub mark: Option<String>,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub bytes: u64,
    pub tiles_placed: usize,
    pub fit_iterations: usize,
}

impl ProcessReport {
    pub fn status_line(&self) -> String {
        format!(
            "Add mark \"{}\" to {} successfully, save to {} .",
            self.mark.as_deref().unwrap_or(""),
            self.source.display(),
            self.output.display()
        )
    }
}

impl Watermarker<SkiaRaster> {
    pub fn builder() -> WatermarkerBuilder {
        WatermarkerBuilder::new()
    }
}

impl<E: RasterEngine> Watermarker<E> {
    pub fn config(&self) -> &WatermarkConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Loads, stamps, fits and saves one file under the output directory.
    pub fn process_file(&self, path: impl AsRef<Path>) -> Result<ProcessReport> {
        let path = path.as_ref();
        let label = path.display().to_string();
        let mut trace = FileTrace::new(label.as_str());
        let image = trace.time(Stage::Load, || {
            let bytes = fs::read(path)
                .map_err(|err| WatermarkError::ImageDecode(format!("{label}: {err}")))?;
            self.engine.decode(&bytes)
        })?;
        log::debug!(
            "loaded {} ({}x{}, {:?})",
            label,
            image.width(),
            image.height(),
            image.color()
        );

        let stamped = self.stamp_and_fit(image, &mut trace)?;
        let format = stamped.output_format();
        let output = self.output_path_for(path, format);
        let (width, height) = (stamped.image.width(), stamped.image.height());
        let fit_iterations = trace.fit_iterations;
        let tiles_placed = stamped.tiles_placed;

        let bytes = trace.time(Stage::Save, || self.save(stamped, &output))?;
        trace.bytes = Some(bytes);
        trace.format = Some(format);
        if let Some(perf) = &self.perf {
            perf.record(&trace);
        }

        Ok(ProcessReport {
            source: path.to_path_buf(),
            output,
            mark: self.config.mark_text().map(str::to_string),
            format,
            width,
            height,
            bytes,
            tiles_placed,
            fit_iterations,
        })
    }

    /// Stamps and size-fits an already decoded image without touching disk.
    pub fn process_image(&self, image: DynamicImage) -> Result<Stamped> {
        let mut trace = FileTrace::new("<memory>");
        let stamped = self.stamp_and_fit(image, &mut trace)?;
        if let Some(perf) = &self.perf {
            perf.record(&trace);
        }
        Ok(stamped)
    }

    /// Bytes the final save writes for `stamped`.
    ///
    /// A lossy fit is written as measured. Everything else becomes an RGB PNG.
    pub fn encode_for_save(&self, stamped: Stamped) -> Result<(Vec<u8>, OutputFormat)> {
        match stamped.fit {
            Some(fit) if fit.switched_to_lossy() => Ok((fit.encoded, fit.format)),
            _ => {
                let flattened = match stamped.image {
                    rgb @ DynamicImage::ImageRgb8(_) => rgb,
                    other => DynamicImage::ImageRgb8(other.to_rgb8()),
                };
                let bytes = self.engine.encode(&flattened, OutputFormat::Png)?;
                Ok((bytes, OutputFormat::Png))
            }
        }
    }

    pub fn output_path_for(&self, source: &Path, format: OutputFormat) -> PathBuf {
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("image");
        self.config
            .out_dir
            .join(format!("{stem}.{}", format.extension()))
    }

    fn stamp_and_fit(&self, image: DynamicImage, trace: &mut FileTrace) -> Result<Stamped> {
        let mut stamped = Stamped {
            image,
            sizing: None,
            tiles_placed: 0,
            fit: None,
        };

        if let Some(mark) = self.config.mark_text() {
            let sizing = self.config.sizing_for(stamped.image.height());
            stamped.sizing = Some(sizing);
            match trace.time(Stage::Glyph, || self.render_tile(mark, sizing)) {
                Ok(tile) => {
                    let compositor = TileCompositor::new(&self.engine);
                    let composited = trace.time(Stage::Composite, || {
                        compositor.composite(stamped.image, &tile, self.config.angle, sizing.spacing)
                    })?;
                    stamped.image = composited.image;
                    stamped.tiles_placed = composited.tiles_placed;
                    trace.tiles_placed = composited.tiles_placed;
                }
                Err(err) if err.is_skip() => {
                    log::debug!("{}: {err}; leaving image unmarked", trace.file);
                }
                Err(err) => return Err(err),
            }
        }

        if let Some(limit) = self.config.limit_size {
            let fitter = SizeFitter::new(&self.engine, self.config.lossy_format());
            let outcome = trace.time(Stage::Fit, || fitter.fit(stamped.image, limit))?;
            let (image, fitted) = outcome.into_parts();
            trace.fit_iterations = fitted.iterations;
            stamped.image = image;
            stamped.fit = Some(fitted);
        }

        Ok(stamped)
    }

    fn render_tile(&self, mark: &str, sizing: Sizing) -> Result<image::RgbaImage> {
        let font = self.font.as_ref().ok_or_else(|| {
            WatermarkError::FontLoad("no font loaded for watermark text".to_string())
        })?;
        let stamp = if self.config.shape_text {
            GlyphStamp::new(font)
        } else {
            GlyphStamp::new(font).unshaped()
        };
        stamp.render(
            mark,
            sizing.font_size,
            self.config.color,
            self.config.opacity,
        )
    }

    fn save(&self, stamped: Stamped, output: &Path) -> Result<u64> {
        let (bytes, _) = self.encode_for_save(stamped)?;
        if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| WatermarkError::OutputWrite {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        fs::write(output, &bytes).map_err(|source| WatermarkError::OutputWrite {
            path: output.to_path_buf(),
            source,
        })?;
        Ok(bytes.len() as u64)
    }
}

impl Default for WatermarkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WatermarkerBuilder {
    pub fn new() -> Self {
        Self {
            config: WatermarkConfig::default(),
            font: None,
            perf_path: None,
        }
    }

    pub fn config(mut self, config: WatermarkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn mark(mut self, mark: impl Into<String>) -> Self {
        self.config.mark = Some(mark.into());
        self
    }

    pub fn font_size(mut self, size: u32) -> Self {
        self.config.font_size = Some(size);
        self
    }

    pub fn opacity(mut self, opacity: f32) -> Self {
        self.config.opacity = opacity;
        self
    }

    pub fn color(mut self, color: Color) -> Self {
        self.config.color = color;
        self
    }

    pub fn angle(mut self, degrees: f32) -> Self {
        self.config.angle = degrees;
        self
    }

    pub fn spacing(mut self, spacing: u32) -> Self {
        self.config.spacing = Some(spacing);
        self
    }

    pub fn limit_size(mut self, bytes: u64) -> Self {
        self.config.limit_size = Some(bytes);
        self
    }

    // Explicit font_size / spacing still win over derived values.
    pub fn autofit(mut self, enabled: bool) -> Self {
        self.config.autofit = enabled;
        self
    }

    pub fn out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.out_dir = dir.into();
        self
    }

    pub fn font_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.font_file = Some(path.into());
        self
    }

    pub fn font(mut self, font: FontSource) -> Self {
        self.font = Some(font);
        self
    }

    /// Turns rustybuzz shaping off and lays glyphs out from cmap advances.
    pub fn shaping(mut self, enabled: bool) -> Self {
        self.config.shape_text = enabled;
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality;
        self
    }

    pub fn perf_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.perf_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Watermarker<SkiaRaster>> {
        self.build_with_engine(SkiaRaster)
    }

    /// Validates the settings and loads the font when there is text to stamp.
    pub fn build_with_engine<E: RasterEngine>(self, engine: E) -> Result<Watermarker<E>> {
        self.config.validate()?;
        let font = match (self.font, self.config.mark_text()) {
            (Some(font), _) => Some(font),
            (None, Some(_)) => Some(FontSource::resolve(self.config.font_file.as_deref())?),
            (None, None) => None,
        };
        if let Some(font) = font.as_ref() {
            log::debug!("watermark font: {}", font.name());
        }
        let perf = match self.perf_path {
            Some(path) => Some(PerfLogger::new(path)?),
            None => None,
        };
        Ok(Watermarker {
            config: self.config,
            font,
            engine,
            perf,
        })
    }
}
