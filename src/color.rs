use clap::ValueEnum;
use palette::{LinSrgb, Mix, Srgb};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 8-bit sRGB pixel color.
pub type Rgb8 = Srgb<u8>;

/// Vertical multi-stop gradient, positions in `[0, 1]` from top to bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradient {
    stops: Vec<(f32, Rgb8)>,
}

impl Gradient {
    /// Stops must be given in ascending position order.
    pub fn new(stops: Vec<(f32, Rgb8)>) -> Self {
        debug_assert!(stops.windows(2).all(|w| w[0].0 <= w[1].0));
        Self { stops }
    }

    /// Color at `t`, interpolated in linear light between the nearest stops.
    pub fn color_at(&self, t: f32) -> Rgb8 {
        let Some(&(first_pos, first)) = self.stops.first() else {
            return Rgb8::new(0, 0, 0);
        };
        if t <= first_pos {
            return first;
        }
        for pair in self.stops.windows(2) {
            let (p0, c0) = pair[0];
            let (p1, c1) = pair[1];
            if t <= p1 {
                let span = p1 - p0;
                if span <= f32::EPSILON {
                    return c1;
                }
                return lerp_color(c0, c1, (t - p0) / span);
            }
        }
        self.stops[self.stops.len() - 1].1
    }
}

/// Interpolate between two colors
pub fn lerp_color(a: Rgb8, b: Rgb8, t: f32) -> Rgb8 {
    if a == b || t <= 0.0 {
        return a;
    }
    if t >= 1.0 {
        return b;
    }
    let a: LinSrgb = a.into_format::<f32>().into_linear();
    let b: LinSrgb = b.into_format::<f32>().into_linear();
    let mixed: Srgb<f32> = Srgb::from_linear(a.mix(b, t));
    mixed.into_format()
}

/// The colors one meter theme is made of.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterColors {
    pub background: Rgb8,
    /// Top of the range (+6 dB).
    pub clip: Rgb8,
    /// Just above 0 dB.
    pub hot: Rgb8,
    /// Instantaneous bar at 0 dB and at the floor.
    pub instant_top: Rgb8,
    pub instant_floor: Rgb8,
    /// RMS bar at 0 dB and at the floor.
    pub rms_top: Rgb8,
    pub rms_floor: Rgb8,
    pub reference: Rgb8,
    pub marker_background: Rgb8,
    pub bold_marker: Rgb8,
    pub medium_marker: Rgb8,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    #[default]
    Classic,
    Ocean,
    Monochrome,
}

impl FromStr for ColorScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "classic" => Ok(Self::Classic),
            "ocean" => Ok(Self::Ocean),
            "mono" | "monochrome" => Ok(Self::Monochrome),
            _ => Err(format!("Unknown color scheme: {}", s)),
        }
    }
}

impl ColorScheme {
    pub fn colors(&self) -> MeterColors {
        match self {
            ColorScheme::Classic => MeterColors {
                background: Rgb8::new(0x11, 0x11, 0x11),
                clip: Rgb8::new(0xF4, 0x25, 0x42),
                hot: Rgb8::new(0xFF, 0xB2, 0x27),
                instant_top: Rgb8::new(0x53, 0xBE, 0x00),
                instant_floor: Rgb8::new(0x00, 0x90, 0x5D),
                rms_top: Rgb8::new(0x89, 0xFA, 0x32),
                rms_floor: Rgb8::new(0x30, 0xF0, 0xAC),
                reference: Rgb8::new(0xFF, 0xFF, 0xFF),
                marker_background: Rgb8::new(0xFF, 0xFF, 0xFF),
                bold_marker: Rgb8::new(0x00, 0x00, 0x00),
                medium_marker: Rgb8::new(0x88, 0x88, 0x88),
            },
            ColorScheme::Ocean => MeterColors {
                background: Rgb8::new(0x0B, 0x13, 0x1E),
                clip: Rgb8::new(0xFF, 0x4D, 0x6D),
                hot: Rgb8::new(0xFF, 0xC8, 0x57),
                instant_top: Rgb8::new(0x1E, 0x90, 0xC8),
                instant_floor: Rgb8::new(0x0A, 0x3D, 0x73),
                rms_top: Rgb8::new(0x6F, 0xE3, 0xFF),
                rms_floor: Rgb8::new(0x2B, 0x8C, 0xD9),
                reference: Rgb8::new(0xE8, 0xF4, 0xFF),
                marker_background: Rgb8::new(0x0B, 0x13, 0x1E),
                bold_marker: Rgb8::new(0xE8, 0xF4, 0xFF),
                medium_marker: Rgb8::new(0x70, 0x85, 0x99),
            },
            ColorScheme::Monochrome => MeterColors {
                background: Rgb8::new(0x10, 0x10, 0x10),
                clip: Rgb8::new(0xFF, 0xFF, 0xFF),
                hot: Rgb8::new(0xD0, 0xD0, 0xD0),
                instant_top: Rgb8::new(0x90, 0x90, 0x90),
                instant_floor: Rgb8::new(0x50, 0x50, 0x50),
                rms_top: Rgb8::new(0xB8, 0xB8, 0xB8),
                rms_floor: Rgb8::new(0x78, 0x78, 0x78),
                reference: Rgb8::new(0xFF, 0xFF, 0xFF),
                marker_background: Rgb8::new(0x10, 0x10, 0x10),
                bold_marker: Rgb8::new(0xFF, 0xFF, 0xFF),
                medium_marker: Rgb8::new(0x80, 0x80, 0x80),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColorScheme::Classic => "classic",
            ColorScheme::Ocean => "ocean",
            ColorScheme::Monochrome => "monochrome",
        }
    }

    pub fn all() -> &'static [ColorScheme] {
        &[ColorScheme::Classic, ColorScheme::Ocean, ColorScheme::Monochrome]
    }

    pub fn next(&self) -> Self {
        let all = Self::all();
        let current = all.iter().position(|c| c == self).unwrap_or(0);
        all[(current + 1) % all.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_returns_exact_stop_colors() {
        let red = Rgb8::new(255, 0, 0);
        let blue = Rgb8::new(0, 0, 255);
        let gradient = Gradient::new(vec![(0.0, red), (1.0, blue)]);
        assert_eq!(gradient.color_at(0.0), red);
        assert_eq!(gradient.color_at(1.0), blue);
        assert_eq!(gradient.color_at(-3.0), red);
        assert_eq!(gradient.color_at(7.0), blue);
    }

    #[test]
    fn gradient_steps_at_coincident_stops() {
        let hot = Rgb8::new(255, 178, 39);
        let cool = Rgb8::new(83, 190, 0);
        let gradient = Gradient::new(vec![(0.0, hot), (0.5, hot), (0.5, cool), (1.0, cool)]);
        assert_eq!(gradient.color_at(0.49), hot);
        assert_eq!(gradient.color_at(0.51), cool);
    }

    #[test]
    fn schemes_cycle() {
        let mut scheme = ColorScheme::default();
        for _ in 0..ColorScheme::all().len() {
            scheme = scheme.next();
        }
        assert_eq!(scheme, ColorScheme::default());
        assert_eq!("mono".parse::<ColorScheme>(), Ok(ColorScheme::Monochrome));
    }
}
