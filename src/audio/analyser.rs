//! The level analyser: turns one block of samples into a [`LevelSummary`].
//!
//! The rest of the crate only sees the [`Analyser`] and [`AnalyserModule`]
//! traits. [`EnvelopeModule`] is the bundled implementation: a circular RMS
//! window plus three envelope followers whose coefficients are derived from
//! the block refresh rate, since the block size is only known per call.

use serde::{Deserialize, Serialize};
use std::f32::consts::E;
use thiserror::Error;

use crate::decibel::clamp_db;
use crate::levels::LevelSummary;

/// A running analyser instance. Must not allocate in `process`.
pub trait Analyser: Send {
    fn process(&mut self, block: &[f32]) -> LevelSummary;
}

/// A loaded analyser implementation, ready to be instantiated at a sample rate.
pub trait AnalyserModule: Send {
    type Handle: Analyser;

    fn instantiate(&self, sample_rate: f32) -> Self::Handle;
}

#[derive(Debug, Error, PartialEq)]
pub enum AnalyserError {
    #[error("RMS window must hold at least one sample")]
    EmptyWindow,
    #[error("{follower} follower {field} must be a finite, non-negative number of milliseconds (got {value})")]
    InvalidTiming {
        follower: &'static str,
        field: &'static str,
        value: f32,
    },
}

/// Attack, release and hold times of one envelope follower, in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FollowerSettings {
    pub attack_ms: f32,
    pub release_ms: f32,
    #[serde(default)]
    pub hold_ms: f32,
}

impl FollowerSettings {
    fn validate(&self, follower: &'static str) -> Result<(), AnalyserError> {
        for (field, value) in [
            ("attack_ms", self.attack_ms),
            ("release_ms", self.release_ms),
            ("hold_ms", self.hold_ms),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AnalyserError::InvalidTiming {
                    follower,
                    field,
                    value,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalyserSettings {
    /// Number of samples in the RMS window.
    pub window: usize,
    pub instant: FollowerSettings,
    pub rms: FollowerSettings,
    pub peak_hold: FollowerSettings,
}

impl Default for AnalyserSettings {
    fn default() -> Self {
        Self {
            window: 1025,
            instant: FollowerSettings {
                attack_ms: 0.0,
                release_ms: 500.0,
                hold_ms: 0.0,
            },
            rms: FollowerSettings {
                attack_ms: 3.0,
                release_ms: 500.0,
                hold_ms: 0.0,
            },
            peak_hold: FollowerSettings {
                attack_ms: 0.0,
                release_ms: 500.0,
                hold_ms: 1000.0,
            },
        }
    }
}

/// The bundled analyser module.
#[derive(Debug, Clone)]
pub struct EnvelopeModule {
    settings: AnalyserSettings,
}

impl EnvelopeModule {
    /// Validate the settings. Invalid settings leave the analyser unusable.
    pub fn load(settings: AnalyserSettings) -> Result<Self, AnalyserError> {
        if settings.window == 0 {
            return Err(AnalyserError::EmptyWindow);
        }
        settings.instant.validate("instant")?;
        settings.rms.validate("rms")?;
        settings.peak_hold.validate("peak hold")?;
        Ok(Self { settings })
    }
}

impl AnalyserModule for EnvelopeModule {
    type Handle = LevelAnalyser;

    fn instantiate(&self, sample_rate: f32) -> LevelAnalyser {
        LevelAnalyser {
            window: RmsWindow::new(self.settings.window),
            sample_rate,
            instant: EnvelopeFollower::new(self.settings.instant),
            rms: EnvelopeFollower::new(self.settings.rms),
            peak_hold: EnvelopeFollower::new(self.settings.peak_hold),
            last: LevelSummary::SILENCE,
        }
    }
}

pub struct LevelAnalyser {
    window: RmsWindow,
    sample_rate: f32,
    instant: EnvelopeFollower,
    rms: EnvelopeFollower,
    peak_hold: EnvelopeFollower,
    last: LevelSummary,
}

impl Analyser for LevelAnalyser {
    fn process(&mut self, block: &[f32]) -> LevelSummary {
        if block.is_empty() {
            return self.last;
        }

        self.window.extend(block);
        let refresh_rate = self.sample_rate / block.len() as f32;

        let block_peak = block.iter().fold(0.0_f32, |peak, s| peak.max(s.abs()));
        let instant = self.instant.process(block_peak, refresh_rate);
        let peak_hold = self.peak_hold.process(block_peak, refresh_rate);
        let rms = self.rms.process(self.window.rms(), refresh_rate);

        self.last = LevelSummary::new(to_db(instant), to_db(rms), to_db(peak_hold));
        self.last
    }
}

fn to_db(amplitude: f32) -> f32 {
    clamp_db(20.0 * amplitude.log10())
}

/// Fixed-size ring of the most recent samples.
struct RmsWindow {
    samples: Vec<f32>,
    write: usize,
}

impl RmsWindow {
    fn new(len: usize) -> Self {
        Self {
            samples: vec![0.0; len],
            write: 0,
        }
    }

    fn extend(&mut self, block: &[f32]) {
        for &sample in block {
            self.samples[self.write] = sample;
            self.write = (self.write + 1) % self.samples.len();
        }
    }

    fn rms(&self) -> f32 {
        let sum: f32 = self.samples.iter().map(|x| x * x).sum();
        (sum / self.samples.len() as f32).sqrt()
    }
}

struct EnvelopeFollower {
    settings: FollowerSettings,
    envelope: f32,
    held: f32,
    hold_remaining: usize,
}

impl EnvelopeFollower {
    fn new(settings: FollowerSettings) -> Self {
        Self {
            settings,
            envelope: 0.0,
            held: 0.0,
            hold_remaining: 0,
        }
    }

    /// `refresh_rate` is how many times per second this is called.
    fn process(&mut self, input: f32, refresh_rate: f32) -> f32 {
        let attack = coefficient(self.settings.attack_ms, refresh_rate);
        let release = coefficient(self.settings.release_ms, refresh_rate);
        let hold_blocks = (self.settings.hold_ms / 1000.0 * refresh_rate) as usize;

        if input > self.held {
            self.held = input;
            self.hold_remaining = hold_blocks;
        } else if self.hold_remaining > 0 {
            self.hold_remaining -= 1;
        }

        if self.hold_remaining > 0 {
            self.envelope = self.held;
        } else {
            let coeff = if input > self.envelope { attack } else { release };
            self.envelope += (input - self.envelope) * coeff;
            self.held = self.envelope;
        }

        self.envelope
    }
}

/// One-pole smoothing coefficient. A zero time constant follows instantly.
fn coefficient(time_ms: f32, refresh_rate: f32) -> f32 {
    let steps = time_ms / 1000.0 * refresh_rate * 0.5;
    if steps <= 0.0 {
        1.0
    } else {
        1.0 - E.powf(-1.0 / steps)
    }
}
