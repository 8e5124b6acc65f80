use anyhow::{anyhow, Result};
use libpulse_binding as pulse;
use libpulse_simple_binding as psimple;
use pulse::sample::{Format, Spec};
use pulse::stream::Direction;
use std::f32::consts::TAU;
use std::time::{Duration, Instant};
use tracing::info;

/// Something that delivers blocks of mono samples at a steady cadence.
///
/// `read_block` is called from the capture thread and may block until the
/// next block is available, the way a hardware callback would be paced.
pub trait SampleSource: Send {
    fn sample_rate(&self) -> u32;

    fn read_block(&mut self, block: &mut [f32]) -> Result<()>;
}

/// List available PulseAudio/PipeWire sources.
///
/// Returns a list of `(name, state)` tuples parsed from `pactl list short sources`.
pub fn list_sources() -> Result<Vec<(String, String)>> {
    let output = std::process::Command::new("pactl")
        .args(["list", "short", "sources"])
        .output()
        .map_err(|e| anyhow!("Failed to run pactl: {}", e))?;

    if !output.status.success() {
        return Err(anyhow!("pactl list short sources failed"));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let mut sources = Vec::new();
    for line in text.lines() {
        // Format: <id>\t<name>\t<module>\t<sample_spec>\t<state>
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() >= 5 {
            sources.push((cols[1].to_string(), cols[4].to_string()));
        }
    }
    Ok(sources)
}

/// Mono microphone capture through a PulseAudio simple record stream.
pub struct PulseSource {
    pulse: psimple::Simple,
    sample_rate: u32,
    bytes: Vec<u8>,
}

impl PulseSource {
    /// Open a record stream on `device`, or the default source when `None`.
    pub fn open(device: Option<&str>, sample_rate: u32, block_size: usize) -> Result<Self> {
        let spec = Spec {
            format: Format::F32le,
            channels: 1,
            rate: sample_rate,
        };

        if !spec.is_valid() {
            return Err(anyhow!("Invalid PulseAudio sample spec at {} Hz", sample_rate));
        }

        info!("Using capture device: {}", device.unwrap_or("default"));

        let pulse = psimple::Simple::new(
            None,              // Use default server
            "levelcast",       // Application name
            Direction::Record, // Recording stream
            device,            // Device name (None = default)
            "level-meter",     // Stream description
            &spec,             // Sample format
            None,              // Default channel map
            None,              // Default buffering attributes
        )
        .map_err(|e| anyhow!("Failed to open capture device: {:?}", e))?;

        Ok(Self {
            pulse,
            sample_rate,
            bytes: vec![0u8; block_size * std::mem::size_of::<f32>()],
        })
    }
}

impl SampleSource for PulseSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_block(&mut self, block: &mut [f32]) -> Result<()> {
        let len = block.len() * std::mem::size_of::<f32>();
        if self.bytes.len() < len {
            self.bytes.resize(len, 0);
        }
        let bytes = &mut self.bytes[..len];

        self.pulse
            .read(bytes)
            .map_err(|e| anyhow!("PulseAudio read error: {:?}", e))?;

        for (sample, raw) in block.iter_mut().zip(bytes.chunks_exact(4)) {
            *sample = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        }
        Ok(())
    }
}

/// Synthetic sine input, paced to wall-clock time like a real device.
pub struct ToneSource {
    frequency: f32,
    amplitude: f32,
    sample_rate: u32,
    phase: f32,
    paced: bool,
    next_deadline: Option<Instant>,
}

impl ToneSource {
    pub fn new(frequency: f32, amplitude: f32, sample_rate: u32) -> Self {
        Self {
            frequency,
            amplitude,
            sample_rate,
            phase: 0.0,
            paced: true,
            next_deadline: None,
        }
    }

    /// Produce blocks as fast as they are requested.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    fn wait_for_deadline(&mut self, block_len: usize) {
        let period = Duration::from_secs_f64(block_len as f64 / self.sample_rate as f64);
        let deadline = self.next_deadline.unwrap_or_else(Instant::now) + period;
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
            self.next_deadline = Some(deadline);
        } else {
            // Fell behind; resynchronize instead of bursting.
            self.next_deadline = Some(now);
        }
    }
}

impl SampleSource for ToneSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_block(&mut self, block: &mut [f32]) -> Result<()> {
        if self.paced {
            self.wait_for_deadline(block.len());
        }

        let step = TAU * self.frequency / self.sample_rate as f32;
        for sample in block.iter_mut() {
            *sample = self.amplitude * self.phase.sin();
            self.phase = (self.phase + step) % TAU;
        }
        Ok(())
    }
}
