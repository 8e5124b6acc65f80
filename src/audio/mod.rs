pub mod analyser;
mod gain;
mod graph;
pub mod processor;
mod source;

pub use gain::{GainRamp, DEFAULT_RAMP_SECONDS};
pub use graph::{AudioGraph, GraphSettings};
pub use processor::{LevelProcessor, BROADCAST_RATE};
pub use source::{list_sources, PulseSource, SampleSource, ToneSource};

use anyhow::{bail, Context, Result};

use crate::config::AudioConfig;

/// Open the configured input: a test tone if one is set, else the microphone.
pub fn open_source(config: &AudioConfig) -> Result<Box<dyn SampleSource>> {
    if config.sample_rate == 0 {
        bail!("sample_rate must be greater than zero");
    }
    if config.block_size == 0 {
        bail!("block_size must be greater than zero");
    }

    match config.tone {
        Some(frequency) => Ok(Box::new(ToneSource::new(
            frequency,
            config.tone_amplitude,
            config.sample_rate,
        ))),
        None => {
            let source = PulseSource::open(config.device.as_deref(), config.sample_rate, config.block_size)
                .context("Capture device unavailable")?;
            Ok(Box::new(source))
        }
    }
}

impl SampleSource for Box<dyn SampleSource> {
    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn read_block(&mut self, block: &mut [f32]) -> Result<()> {
        (**self).read_block(block)
    }
}
