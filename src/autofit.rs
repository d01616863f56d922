use crate::config::Sizing;

// Five text rows and four blank rows, text:blank = 1:2.
const BLANK_ROWS: u32 = 4;
const UNITS_PER_BLANK_ROW: u32 = 3;

/// Derives font size and spacing from the image height.
///
/// The cosine term compensates for rotation shrinking the vertical pitch of the
/// tiled rows. Spacing is always twice the font size. The font size never drops
/// below one pixel, which only matters for tiny images or angles near 90°.
pub fn derive(image_height: u32, angle_deg: f32) -> Sizing {
    let units = (BLANK_ROWS * UNITS_PER_BLANK_ROW + 1) as f64;
    let radians = (angle_deg as f64).to_radians();
    let raw = (image_height as f64 / units * radians.cos()).floor();
    let font_size = if raw.is_finite() && raw >= 1.0 {
        raw.min(u32::MAX as f64) as u32
    } else {
        log::debug!(
            "auto-fit derived font size {raw} for height={image_height} angle={angle_deg}; clamping to 1"
        );
        1
    };
    let sizing = Sizing {
        font_size,
        spacing: font_size.saturating_mul(2),
    };
    log::debug!(
        "auto-fit: height={} angle={} -> size={} space={}",
        image_height,
        angle_deg,
        sizing.font_size,
        sizing.spacing
    );
    sizing
}
