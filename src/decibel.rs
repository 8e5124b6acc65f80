//! Mapping between decibel values and the normalized `[0, 1]` visual range.
//!
//! The linear rescale from `[MIN_DB, MAX_DB]` is followed by an ease-in-sine
//! curve, which keeps very low levels small on screen while the top of the
//! range stays close to linear.

use std::f32::consts::FRAC_PI_2;

/// Bottom of the displayed range. Anything quieter renders as the floor.
pub const MIN_DB: f32 = -72.0;
/// Top of the displayed range.
pub const MAX_DB: f32 = 6.0;

/// Graduations drawn with the strong marker color, every 12 dB.
pub const BOLD_MARKERS: [f32; 6] = [-60.0, -48.0, -36.0, -24.0, -12.0, 0.0];
/// Graduations drawn in between the bold ones.
pub const MEDIUM_MARKERS: [f32; 7] = [-66.0, -54.0, -42.0, -30.0, -18.0, -6.0, 6.0];

/// Clamp a decibel value into the displayed range. NaN maps to the floor.
pub fn clamp_db(db: f32) -> f32 {
    if db.is_nan() {
        MIN_DB
    } else {
        db.clamp(MIN_DB, MAX_DB)
    }
}

/// Normalize a decibel value to `[0, 1]` with perceptual compression.
pub fn normalize(db: f32) -> f32 {
    let x = (clamp_db(db) - MIN_DB) / (MAX_DB - MIN_DB);
    ease_in_sine(x).clamp(0.0, 1.0)
}

fn ease_in_sine(x: f32) -> f32 {
    1.0 - (x * FRAC_PI_2).cos()
}

/// Scale a normalized level to a pixel extent, rounded to the nearest pixel.
pub fn scale(normal: f32, extent: u32) -> u32 {
    let normal = if normal.is_nan() { 0.0 } else { normal.clamp(0.0, 1.0) };
    (normal * extent as f32).round() as u32
}

/// Distance of a graduation from the bottom edge of a surface `extent` pixels tall.
///
/// A one pixel mark is centered on the returned position, so the usable
/// extent is one pixel short and the result is offset by half a pixel.
/// `MIN_DB` lands at `0.5` and `MAX_DB` at `extent - 0.5`.
pub fn marker_position(db: f32, extent: u32) -> f32 {
    let usable = extent.saturating_sub(1);
    scale(normalize(db), usable) as f32 + 0.5
}

/// Pixel row, counted from the top, that a graduation occupies.
pub fn marker_row(db: f32, extent: u32) -> u32 {
    let position = marker_position(db, extent);
    (extent as f32 - position).floor().max(0.0) as u32
}

/// Convert linear amplitude to dBFS, flooring near-zero input at -120 dB.
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 1e-6 {
        -120.0
    } else {
        20.0 * linear.log10()
    }
}

pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_hits_both_ends_of_the_range() {
        assert_eq!(normalize(MIN_DB), 0.0);
        assert!((normalize(MAX_DB) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_is_monotonic() {
        let mut previous = normalize(MIN_DB);
        let mut db = MIN_DB;
        while db <= MAX_DB {
            let n = normalize(db);
            assert!(n >= previous, "normalize({db}) = {n} < {previous}");
            previous = n;
            db += 0.25;
        }
    }

    #[test]
    fn out_of_range_input_is_clamped_not_extrapolated() {
        assert_eq!(normalize(-200.0), 0.0);
        assert_eq!(normalize(f32::NEG_INFINITY), 0.0);
        assert_eq!(normalize(f32::NAN), 0.0);
        assert!((normalize(40.0) - 1.0).abs() < 1e-6);
        assert_eq!(scale(normalize(-500.0), 400), 0);
    }

    #[test]
    fn low_end_is_compressed() {
        // Halfway through the dB range sits well below half height.
        let mid = normalize((MIN_DB + MAX_DB) / 2.0);
        assert!(mid < 0.35, "{mid}");
    }

    #[test]
    fn scale_rounds_to_nearest_pixel() {
        assert_eq!(scale(0.0, 400), 0);
        assert_eq!(scale(1.0, 400), 400);
        assert_eq!(scale(0.50124, 400), 200);
        assert_eq!(scale(0.5013, 400), 201);
    }

    #[test]
    fn markers_are_inset_by_half_a_pixel() {
        assert_eq!(marker_position(MIN_DB, 400), 0.5);
        assert_eq!(marker_position(MAX_DB, 400), 399.5);
        assert_eq!(marker_row(MAX_DB, 400), 0);
        assert_eq!(marker_row(MIN_DB, 400), 399);
    }

    #[test]
    fn gain_conversions_agree() {
        assert!((linear_to_db(1.0)).abs() < 1e-6);
        assert!((db_to_linear(-6.0) - 0.501_187).abs() < 1e-4);
        assert!((linear_to_db(db_to_linear(-18.0)) + 18.0).abs() < 1e-4);
        assert_eq!(linear_to_db(0.0), -120.0);
    }
}
