//! Owned RGB raster the meter is drawn into.
//!
//! Presentation backends convert the raster to their native format when a
//! frame is submitted. All drawing primitives clip to the raster bounds.

use crate::color::{Gradient, Rgb8};

pub struct Canvas {
    pixels: Vec<Rgb8>,
    width: u32,
    height: u32,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: vec![Rgb8::new(0, 0, 0); (width * height) as usize],
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn clear(&mut self, color: Rgb8) {
        self.pixels.fill(color);
    }

    #[cfg(test)]
    pub(crate) fn put_pixel(&mut self, x: u32, y: u32, color: Rgb8) {
        if x < self.width && y < self.height {
            self.pixels[(y * self.width + x) as usize] = color;
        }
    }

    /// Pixel at (x, y), or `None` outside the raster.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb8> {
        if x < self.width && y < self.height {
            Some(self.pixels[(y * self.width + x) as usize])
        } else {
            None
        }
    }

    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: Rgb8) {
        let x_end = x.saturating_add(w).min(self.width);
        let y_end = y.saturating_add(h).min(self.height);
        for py in y.min(y_end)..y_end {
            let row = (py * self.width) as usize;
            self.pixels[row + x.min(x_end) as usize..row + x_end as usize].fill(color);
        }
    }

    /// Fill a rectangle with a vertical gradient spanning the whole raster
    /// height, so a short bar shows the part of the gradient it covers.
    pub fn fill_rect_gradient(&mut self, x: u32, y: u32, w: u32, h: u32, gradient: &Gradient) {
        let y_end = y.saturating_add(h).min(self.height);
        for py in y.min(y_end)..y_end {
            let t = (py as f32 + 0.5) / self.height as f32;
            self.fill_rect(x, py, w, 1, gradient.color_at(t));
        }
    }

    pub fn hline(&mut self, y: u32, color: Rgb8) {
        self.fill_rect(0, y, self.width, 1, color);
    }

    pub fn vline(&mut self, x: u32, color: Rgb8) {
        self.fill_rect(x, 0, 1, self.height, color);
    }
}
