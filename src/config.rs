use crate::autofit;
use crate::error::WatermarkError;
use crate::types::{Color, OutputFormat};
use std::path::PathBuf;

pub const DEFAULT_FONT_SIZE: u32 = 50;
pub const DEFAULT_OPACITY: f32 = 0.15;
pub const DEFAULT_COLOR: Color = Color {
    r: 0x8b,
    g: 0x8b,
    b: 0x1b,
};
pub const DEFAULT_ANGLE: f32 = 30.0;
pub const DEFAULT_SPACING: u32 = 75;
pub const DEFAULT_JPEG_QUALITY: u8 = 75;
pub const DEFAULT_OUT_DIR: &str = "./output";

/// Per-run watermark settings. Immutable once built.
///
/// `font_size` and `spacing` are `None` when the caller did not set them. Sizing
/// resolves as: explicit value, then the auto-fit derivation (when `autofit` is
/// on), then the defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkConfig {
    pub mark: Option<String>,
    pub font_size: Option<u32>,
    pub opacity: f32,
    pub color: Color,
    pub angle: f32,
    pub spacing: Option<u32>,
    pub limit_size: Option<u64>,
    pub autofit: bool,
    pub out_dir: PathBuf,
    pub font_file: Option<PathBuf>,
    pub jpeg_quality: u8,
    /// Shape text with rustybuzz; off lays glyphs out from cmap advances only.
    pub shape_text: bool,
}

/// Font size and inter-tile spacing resolved for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sizing {
    pub font_size: u32,
    pub spacing: u32,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            mark: None,
            font_size: None,
            opacity: DEFAULT_OPACITY,
            color: DEFAULT_COLOR,
            angle: DEFAULT_ANGLE,
            spacing: None,
            limit_size: None,
            autofit: false,
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            font_file: None,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            shape_text: true,
        }
    }
}

impl WatermarkConfig {
    pub fn validate(&self) -> Result<(), WatermarkError> {
        if !self.opacity.is_finite() || !(0.0..=1.0).contains(&self.opacity) {
            return Err(WatermarkError::InvalidConfiguration(format!(
                "opacity must be within 0..=1, got {}",
                self.opacity
            )));
        }
        if self.font_size == Some(0) {
            return Err(WatermarkError::InvalidConfiguration(
                "font size must be > 0".to_string(),
            ));
        }
        if !self.angle.is_finite() {
            return Err(WatermarkError::InvalidConfiguration(
                "angle must be finite".to_string(),
            ));
        }
        if self.limit_size == Some(0) {
            return Err(WatermarkError::InvalidConfiguration(
                "limit size must be > 0 bytes".to_string(),
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(WatermarkError::InvalidConfiguration(format!(
                "jpeg quality must be within 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        Ok(())
    }

    /// The text to stamp, or `None` when watermarking should be skipped.
    pub fn mark_text(&self) -> Option<&str> {
        self.mark.as_deref().filter(|m| !m.is_empty())
    }

    pub fn lossy_format(&self) -> OutputFormat {
        OutputFormat::Jpeg {
            quality: self.jpeg_quality,
        }
    }

    pub fn sizing_for(&self, image_height: u32) -> Sizing {
        let derived = if self.autofit {
            Some(autofit::derive(image_height, self.angle))
        } else {
            None
        };
        let font_size = self
            .font_size
            .or(derived.map(|d| d.font_size))
            .unwrap_or(DEFAULT_FONT_SIZE);
        let spacing = self
            .spacing
            .or(derived.map(|d| d.spacing))
            .unwrap_or(DEFAULT_SPACING);
        Sizing { font_size, spacing }
    }
}
