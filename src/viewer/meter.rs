//! Drawing the level bars and the graduation strip.

use crate::color::{ColorScheme, Gradient, MeterColors};
use crate::decibel::{marker_row, normalize, scale, BOLD_MARKERS, MEDIUM_MARKERS};
use crate::levels::LevelSummary;
use crate::renderer::Canvas;

/// Medium graduations that would crowd the edge labels.
const UNLABELLED_MEDIUM: [f32; 2] = [-66.0, 6.0];

/// Pixel heights of one frame, measured from the bottom of the meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarHeights {
    pub instant: u32,
    pub rms: u32,
    /// `None` when the peak-hold mark would sit on the 0 dB line or the floor.
    pub peak_hold: Option<u32>,
    pub unity: u32,
}

impl BarHeights {
    pub fn compute(levels: LevelSummary, height: u32) -> Self {
        let unity = scale(normalize(0.0), height);
        let peak = scale(normalize(levels.peak_hold()), height);
        Self {
            instant: scale(normalize(levels.instant()), height),
            rms: scale(normalize(levels.rms()), height),
            peak_hold: (peak != unity && peak > 0).then_some(peak),
            unity,
        }
    }
}

pub struct MeterPainter {
    colors: MeterColors,
    instant_gradient: Gradient,
    rms_gradient: Gradient,
}

impl MeterPainter {
    pub fn new(scheme: ColorScheme) -> Self {
        let colors = scheme.colors();
        // Gradients run top to bottom and step from hot to cool at 0 dB.
        let unity_stop = 1.0 - normalize(0.0);
        let stepped = |top, floor| {
            Gradient::new(vec![
                (0.0, colors.clip),
                ((unity_stop - 0.001).max(0.0), colors.hot),
                (unity_stop, top),
                (1.0, floor),
            ])
        };

        Self {
            colors,
            instant_gradient: stepped(colors.instant_top, colors.instant_floor),
            rms_gradient: stepped(colors.rms_top, colors.rms_floor),
        }
    }

    pub fn colors(&self) -> &MeterColors {
        &self.colors
    }

    /// Draw one frame of the meter.
    pub fn draw_levels(&self, canvas: &mut Canvas, levels: LevelSummary) {
        let (width, height) = (canvas.width(), canvas.height());
        if width == 0 || height == 0 {
            return;
        }
        let bars = BarHeights::compute(levels, height);

        canvas.clear(self.colors.background);
        canvas.fill_rect_gradient(0, height - bars.instant, width, bars.instant, &self.instant_gradient);
        canvas.fill_rect_gradient(0, height - bars.rms, width, bars.rms, &self.rms_gradient);
        if let Some(peak) = bars.peak_hold {
            canvas.fill_rect_gradient(0, height - peak, width, 1, &self.rms_gradient);
        }

        canvas.hline(unity_row(bars.unity, height), self.colors.reference);
        canvas.vline(width.saturating_sub(1) / 2, self.colors.reference);
    }

    /// Draw the static graduation strip. Only needed once per size or theme.
    pub fn draw_markers(&self, canvas: &mut Canvas) {
        let height = canvas.height();
        canvas.clear(self.colors.marker_background);
        for db in BOLD_MARKERS {
            canvas.hline(marker_row(db, height), self.colors.bold_marker);
        }
        for db in MEDIUM_MARKERS {
            canvas.hline(marker_row(db, height), self.colors.medium_marker);
        }
    }
}

fn unity_row(unity: u32, height: u32) -> u32 {
    (height - unity.min(height)).min(height.saturating_sub(1))
}

/// Text labels for the graduation strip: `(pixel row, label, bold)`.
pub fn marker_labels(height: u32) -> Vec<(u32, String, bool)> {
    let bold = BOLD_MARKERS.iter().map(|&db| (db, true));
    let medium = MEDIUM_MARKERS
        .iter()
        .filter(|db| !UNLABELLED_MEDIUM.contains(db))
        .map(|&db| (db, false));

    bold.chain(medium)
        .map(|(db, is_bold)| (marker_row(db, height), format!("{}", db.abs()), is_bold))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decibel::{MAX_DB, MIN_DB};

    const HEIGHT: u32 = 400;

    #[test]
    fn silence_draws_empty_bars() {
        let bars = BarHeights::compute(LevelSummary::SILENCE, HEIGHT);
        assert_eq!(bars.instant, 0);
        assert_eq!(bars.rms, 0);
        assert_eq!(bars.peak_hold, None);
    }

    #[test]
    fn values_below_the_floor_render_as_the_floor() {
        let bars = BarHeights::compute(LevelSummary::new(-300.0, f32::NEG_INFINITY, -90.0), HEIGHT);
        assert_eq!(bars.instant, 0);
        assert_eq!(bars.rms, 0);
    }

    #[test]
    fn full_scale_fills_the_meter() {
        let bars = BarHeights::compute(LevelSummary::new(MAX_DB, MAX_DB, MAX_DB), HEIGHT);
        assert_eq!(bars.instant, HEIGHT);
        assert_eq!(bars.peak_hold, Some(HEIGHT));
    }

    #[test]
    fn peak_hold_on_the_unity_line_is_suppressed() {
        let bars = BarHeights::compute(LevelSummary::new(-20.0, -24.0, 0.0), HEIGHT);
        assert_eq!(bars.peak_hold, None);
        let bars = BarHeights::compute(LevelSummary::new(-20.0, -24.0, -3.0), HEIGHT);
        assert!(bars.peak_hold.is_some());
    }

    #[test]
    fn bars_use_the_hot_color_above_zero_db() {
        let painter = MeterPainter::new(ColorScheme::Classic);
        let colors = *painter.colors();
        let mut canvas = Canvas::new(4, HEIGHT);
        painter.draw_levels(&mut canvas, LevelSummary::new(MAX_DB, MIN_DB, MIN_DB));

        let close = |a: crate::color::Rgb8, b: crate::color::Rgb8| {
            a.red.abs_diff(b.red) <= 8 && a.green.abs_diff(b.green) <= 8 && a.blue.abs_diff(b.blue) <= 8
        };
        assert!(close(canvas.pixel(0, 0).unwrap(), colors.clip));
        assert!(close(canvas.pixel(0, HEIGHT - 1).unwrap(), colors.instant_floor));
        // Just above the unity line is hot, just below it is cool.
        let unity = BarHeights::compute(LevelSummary::SILENCE, HEIGHT).unity;
        let row = HEIGHT - unity;
        assert_eq!(canvas.pixel(0, row), Some(colors.reference));
        let above = canvas.pixel(0, row - 2).unwrap();
        let below = canvas.pixel(0, row + 2).unwrap();
        assert_ne!(above, below);
        assert!(above.red > below.red);
    }

    #[test]
    fn silent_frame_is_background_plus_reference_lines() {
        let painter = MeterPainter::new(ColorScheme::Classic);
        let colors = *painter.colors();
        let mut canvas = Canvas::new(30, HEIGHT);
        painter.draw_levels(&mut canvas, LevelSummary::SILENCE);

        assert_eq!(canvas.pixel(0, HEIGHT - 1), Some(colors.background));
        assert_eq!(canvas.pixel(14, HEIGHT - 1), Some(colors.reference));
        assert_eq!(canvas.pixel(29, 5), Some(colors.background));
    }

    #[test]
    fn markers_are_drawn_at_their_rows() {
        let painter = MeterPainter::new(ColorScheme::Classic);
        let colors = *painter.colors();
        let mut canvas = Canvas::new(6, HEIGHT);
        painter.draw_markers(&mut canvas);

        assert_eq!(canvas.pixel(0, marker_row(0.0, HEIGHT)), Some(colors.bold_marker));
        assert_eq!(canvas.pixel(3, marker_row(-6.0, HEIGHT)), Some(colors.medium_marker));
        assert_eq!(canvas.pixel(0, marker_row(6.0, HEIGHT)), Some(colors.medium_marker));
    }

    #[test]
    fn edge_medium_markers_have_no_label() {
        let labels = marker_labels(HEIGHT);
        assert_eq!(labels.len(), BOLD_MARKERS.len() + MEDIUM_MARKERS.len() - 2);
        assert!(labels.iter().any(|(_, text, bold)| text == "0" && *bold));
        assert!(!labels.iter().any(|(_, text, _)| text == "66"));
    }
}
