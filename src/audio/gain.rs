//! Smoothed input gain applied ahead of the level processor.

/// Default duration of a gain change.
pub const DEFAULT_RAMP_SECONDS: f32 = 0.03;

/// Linear gain ramped over a short interval to avoid zipper noise.
#[derive(Debug, Clone)]
pub struct GainRamp {
    current: f32,
    target: f32,
    step: f32,
    remaining: usize,
}

impl GainRamp {
    pub fn new(initial: f32) -> Self {
        Self {
            current: initial,
            target: initial,
            step: 0.0,
            remaining: 0,
        }
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    /// Cancel any ramp in progress and head for `target` from wherever the
    /// gain is now, arriving after `ramp_samples` samples.
    pub fn set(&mut self, target: f32, ramp_samples: usize) {
        self.target = target;
        if ramp_samples == 0 {
            self.current = target;
            self.remaining = 0;
            self.step = 0.0;
        } else {
            self.step = (target - self.current) / ramp_samples as f32;
            self.remaining = ramp_samples;
        }
    }

    pub fn apply(&mut self, block: &mut [f32]) {
        for sample in block.iter_mut() {
            if self.remaining > 0 {
                self.current += self.step;
                self.remaining -= 1;
                if self.remaining == 0 {
                    self.current = self.target;
                }
            }
            *sample *= self.current;
        }
    }
}

pub fn ramp_samples(ramp_seconds: f32, sample_rate: u32) -> usize {
    (ramp_seconds.max(0.0) * sample_rate as f32).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramps_linearly_to_the_target() {
        let mut gain = GainRamp::new(1.0);
        gain.set(0.0, 4);
        let mut block = [1.0f32; 6];
        gain.apply(&mut block);
        assert_eq!(block, [0.75, 0.5, 0.25, 0.0, 0.0, 0.0]);
        assert_eq!(gain.current(), 0.0);
    }

    #[test]
    fn retargeting_starts_from_the_current_value() {
        let mut gain = GainRamp::new(0.0);
        gain.set(1.0, 4);
        let mut block = [1.0f32; 2];
        gain.apply(&mut block);
        assert_eq!(gain.current(), 0.5);

        gain.set(0.0, 2);
        let mut block = [1.0f32; 2];
        gain.apply(&mut block);
        assert_eq!(block, [0.25, 0.0]);
    }

    #[test]
    fn zero_length_ramp_jumps() {
        let mut gain = GainRamp::new(1.0);
        gain.set(0.5, 0);
        let mut block = [2.0f32; 2];
        gain.apply(&mut block);
        assert_eq!(block, [1.0, 1.0]);
    }

    #[test]
    fn ramp_length_follows_the_sample_rate() {
        assert_eq!(ramp_samples(DEFAULT_RAMP_SECONDS, 48_000), 1440);
        assert_eq!(ramp_samples(-1.0, 48_000), 0);
    }
}
