//! Renders the mark text into a tightly cropped, semi-transparent RGBA tile.

use crate::error::WatermarkError;
use crate::font::FontSource;
use crate::raster::{new_pixmap, pixmap_to_rgba};
use crate::types::Color;
use image::RgbaImage;
use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use tiny_skia::{FillRule, Paint, Path, PathBuilder, Transform};
use ttf_parser::{GlyphId, OutlineBuilder};

/// Text stamp renderer bound to one font program.
#[derive(Debug, Clone)]
pub struct GlyphStamp<'a> {
    font: &'a FontSource,
    shape_text: bool,
}

impl<'a> GlyphStamp<'a> {
    pub fn new(font: &'a FontSource) -> Self {
        Self {
            font,
            shape_text: true,
        }
    }

    /// Disables rustybuzz shaping and lays glyphs out from cmap advances only.
    pub fn unshaped(mut self) -> Self {
        self.shape_text = false;
        self
    }

    /// Rasterizes `text` at `font_size` pixels, crops to the inked area and
    /// scales alpha by `opacity`.
    pub fn render(
        &self,
        text: &str,
        font_size: u32,
        color: Color,
        opacity: f32,
    ) -> Result<RgbaImage, WatermarkError> {
        if text.is_empty() {
            return Err(WatermarkError::EmptyText);
        }
        if font_size == 0 {
            return Err(WatermarkError::InvalidConfiguration(
                "font size must be > 0".to_string(),
            ));
        }

        // Upper bound; real advances are usually narrower and the crop trims the rest.
        let char_count = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
        let width = char_count.saturating_mul(font_size);
        let canvas = self.rasterize(text, width, font_size, color)?;
        let mut tile = crop_to_content(&canvas);
        apply_opacity(&mut tile, opacity);
        log::debug!(
            "glyph tile '{}' size={} -> {}x{}",
            truncate_debug_text(text),
            font_size,
            tile.width(),
            tile.height()
        );
        Ok(tile)
    }

    fn rasterize(
        &self,
        text: &str,
        width: u32,
        height: u32,
        color: Color,
    ) -> Result<RgbaImage, WatermarkError> {
        let font_data = self.font.data();
        let face = ttf_parser::Face::parse(font_data, 0).map_err(|err| {
            WatermarkError::FontLoad(format!("cannot parse {}: {err}", self.font.name()))
        })?;
        let font_size = height as f32;
        let units_per_em = face.units_per_em().max(1) as f32;
        // Text hangs from the top edge: the ascender line sits at y = 0.
        let baseline_y = face.ascender() as f32 / units_per_em * font_size;

        let mut pixmap = new_pixmap(width, height)?;
        let mut paint = Paint::default();
        paint.set_color(color.to_sk_color());
        paint.anti_alias = true;

        let placements =
            layout_text_glyphs(font_data, text, font_size, 0.0, baseline_y, self.shape_text);
        let mut drawn = 0usize;
        for placement in placements {
            let mut builder =
                GlyphPathBuilder::new(placement.origin_x, placement.origin_y, placement.scale);
            if face
                .outline_glyph(GlyphId(placement.glyph_id), &mut builder)
                .is_none()
            {
                continue;
            }
            let Some(path) = builder.finish() else {
                continue;
            };
            pixmap.fill_path(
                &path,
                &paint,
                FillRule::Winding,
                Transform::identity(),
                None,
            );
            drawn += 1;
        }
        if drawn == 0 {
            log::debug!(
                "no outlines drawn for '{}' with font {}",
                truncate_debug_text(text),
                self.font.name()
            );
        }
        Ok(pixmap_to_rgba(&pixmap))
    }
}

/// Crops to the bounding box of pixels that are not fully transparent black.
/// An image with no such pixels is returned as is.
pub fn crop_to_content(image: &RgbaImage) -> RgbaImage {
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0u32;
    let mut max_y = 0u32;
    let mut found = false;
    for (x, y, px) in image.enumerate_pixels() {
        if px.0 == [0, 0, 0, 0] {
            continue;
        }
        found = true;
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    if !found {
        return image.clone();
    }
    image::imageops::crop_imm(image, min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
        .to_image()
}

/// Scales the alpha plane by `opacity`; RGB is left untouched.
pub fn apply_opacity(image: &mut RgbaImage, opacity: f32) {
    let factor = opacity.clamp(0.0, 1.0);
    for px in image.pixels_mut() {
        px.0[3] = (px.0[3] as f32 * factor).round().clamp(0.0, 255.0) as u8;
    }
}

/// True when the tile would paint nothing.
pub fn is_blank(tile: &RgbaImage) -> bool {
    tile.width() == 0 || tile.height() == 0 || tile.pixels().all(|px| px.0[3] == 0)
}

#[derive(Clone, Copy)]
struct GlyphPlacement {
    glyph_id: u16,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

fn layout_text_glyphs(
    font_data: &[u8],
    text: &str,
    font_size: f32,
    baseline_x: f32,
    baseline_y: f32,
    shape_text: bool,
) -> Vec<GlyphPlacement> {
    if !shape_text {
        return layout_text_glyphs_unshaped(font_data, text, font_size, baseline_x, baseline_y);
    }

    let Some(face) = HbFace::from_slice(font_data, 0) else {
        return layout_text_glyphs_unshaped(font_data, text, font_size, baseline_x, baseline_y);
    };
    let hb_units = face.units_per_em().max(1) as f32;
    let scale = font_size / hb_units;
    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(detect_direction(text));
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let infos = output.glyph_infos();
    let positions = output.glyph_positions();
    if infos.is_empty() || infos.len() != positions.len() {
        return layout_text_glyphs_unshaped(font_data, text, font_size, baseline_x, baseline_y);
    }

    let mut out = Vec::with_capacity(infos.len());
    let mut pen_x = 0.0f32;
    for (info, pos) in infos.iter().zip(positions.iter()) {
        let gid = info.glyph_id as u16;
        if gid != 0 {
            // Font units are y-up; the canvas is y-down.
            out.push(GlyphPlacement {
                glyph_id: gid,
                origin_x: baseline_x + pen_x + pos.x_offset as f32 * scale,
                origin_y: baseline_y - pos.y_offset as f32 * scale,
                scale,
            });
        }
        pen_x += pos.x_advance as f32 * scale;
    }
    out
}

fn layout_text_glyphs_unshaped(
    font_data: &[u8],
    text: &str,
    font_size: f32,
    baseline_x: f32,
    baseline_y: f32,
) -> Vec<GlyphPlacement> {
    let Ok(face) = ttf_parser::Face::parse(font_data, 0) else {
        return Vec::new();
    };
    let units_per_em = face.units_per_em().max(1) as f32;
    let scale = font_size / units_per_em;

    let mut out = Vec::new();
    let mut pen_x = 0.0f32;
    for ch in text.chars() {
        let gid = face.glyph_index(ch).map(|id| id.0).unwrap_or(0);
        if gid == 0 {
            pen_x += font_size * 0.5;
            continue;
        }
        out.push(GlyphPlacement {
            glyph_id: gid,
            origin_x: baseline_x + pen_x,
            origin_y: baseline_y,
            scale,
        });
        let advance_units = face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0) as f32;
        let mut adv = advance_units * scale;
        if adv <= 0.0 {
            adv = font_size * 0.5;
        }
        pen_x += adv;
    }
    out
}

fn detect_direction(text: &str) -> HbDirection {
    for ch in text.chars() {
        let code = ch as u32;
        let rtl = matches!(
            code,
            0x0590..=0x08FF | 0xFB1D..=0xFDFF | 0xFE70..=0xFEFF | 0x1EE00..=0x1EEFF
        );
        if rtl {
            return HbDirection::RightToLeft;
        }
    }
    HbDirection::LeftToRight
}

fn truncate_debug_text(text: &str) -> String {
    const MAX_CHARS: usize = 48;
    let mut out = String::new();
    for (idx, ch) in text.chars().enumerate() {
        if idx >= MAX_CHARS {
            out.push_str("...");
            break;
        }
        out.push(if ch.is_control() { ' ' } else { ch });
    }
    out
}

/// Emits outline segments into canvas space, flipping font y-up to y-down.
struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    fn new(origin_x: f32, origin_y: f32, scale: f32) -> Self {
        Self {
            builder: PathBuilder::new(),
            origin_x,
            origin_y,
            scale,
        }
    }

    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.origin_y - y * self.scale)
    }

    fn finish(self) -> Option<Path> {
        self.builder.finish()
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}
