//! The audio graph controller: source → gain → level processor → relay.
//!
//! The capture thread plays the role of the real-time render path. It owns
//! the gain ramp and the level processor, and only talks to the outside
//! world through non-blocking channels.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::analyser::{AnalyserSettings, EnvelopeModule};
use super::gain::{ramp_samples, GainRamp};
use super::processor::LevelProcessor;
use super::source::SampleSource;
use crate::levels::{LevelSummary, Payload};
use crate::relay::Publisher;

/// Summaries queued between the capture thread and the forwarding task.
const OUTLET_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct GraphSettings {
    pub block_size: usize,
    pub broadcast_rate: usize,
    pub initial_gain: f32,
    pub analyser: AnalyserSettings,
}

enum GraphCommand {
    SetGain { linear: f32, ramp_seconds: f32 },
}

pub struct AudioGraph {
    capture_thread: Option<thread::JoinHandle<()>>,
    forward_task: JoinHandle<()>,
    stop_flag: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<GraphCommand>,
    publisher: Publisher,
    gain: f32,
}

impl AudioGraph {
    /// Build the graph and start capturing.
    ///
    /// Fails if the analyser cannot be loaded. Must be called from within a
    /// tokio runtime.
    pub fn start<S>(source: S, settings: GraphSettings, publisher: Publisher) -> Result<Self>
    where
        S: SampleSource + 'static,
    {
        let sample_rate = source.sample_rate();
        let (outlet, mut summaries) = mpsc::channel::<LevelSummary>(OUTLET_CAPACITY);

        let mut processor = LevelProcessor::new(sample_rate as f32, settings.broadcast_rate, outlet);
        let analyser = settings.analyser.clone();
        processor
            .load(|| EnvelopeModule::load(analyser))
            .context("Level processor could not be set up")?;
        processor.start()?;

        let forward_publisher = publisher.clone();
        let forward_task = tokio::spawn(async move {
            while let Some(summary) = summaries.recv().await {
                if forward_publisher.publish(Payload::Levels(summary)).is_err() {
                    debug!("Relay closed, stopping level forwarding");
                    break;
                }
            }
        });

        let (commands, command_rx) = mpsc::unbounded_channel();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag_clone = stop_flag.clone();
        let block_size = settings.block_size.max(1);
        let initial_gain = settings.initial_gain;

        let capture_thread = thread::Builder::new()
            .name("levelcast-capture".into())
            .spawn(move || {
                capture_loop(
                    source,
                    processor,
                    block_size,
                    initial_gain,
                    command_rx,
                    stop_flag_clone,
                )
            })
            .context("Failed to spawn capture thread")?;

        info!(
            "Audio graph running: {} Hz, {} sample blocks, broadcast every {} samples",
            sample_rate, block_size, settings.broadcast_rate
        );

        Ok(Self {
            capture_thread: Some(capture_thread),
            forward_task,
            stop_flag,
            commands,
            publisher,
            gain: initial_gain,
        })
    }

    /// Ramp the input gain to `linear` over `ramp_seconds`.
    pub fn set_gain(&mut self, linear: f32, ramp_seconds: f32) {
        self.gain = linear;
        let _ = self.commands.send(GraphCommand::SetGain {
            linear,
            ramp_seconds,
        });
    }

    /// The most recently requested gain.
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Broadcast the silence marker right away, independent of the audio path.
    pub fn silence(&self) {
        if self.publisher.publish(Payload::Silence).is_err() {
            warn!("Could not broadcast silence: relay closed");
        }
    }

    /// Stop capturing and wait for the capture thread to exit.
    pub fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.capture_thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for AudioGraph {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.forward_task.abort();
    }
}

fn capture_loop<S: SampleSource>(
    mut source: S,
    mut processor: LevelProcessor<EnvelopeModule>,
    block_size: usize,
    initial_gain: f32,
    mut commands: mpsc::UnboundedReceiver<GraphCommand>,
    stop_flag: Arc<AtomicBool>,
) {
    let sample_rate = source.sample_rate();
    let mut gain = GainRamp::new(initial_gain);
    let mut block = vec![0.0f32; block_size];
    let mut reported_drops = 0;

    while !stop_flag.load(Ordering::Relaxed) {
        while let Ok(command) = commands.try_recv() {
            match command {
                GraphCommand::SetGain {
                    linear,
                    ramp_seconds,
                } => gain.set(linear, ramp_samples(ramp_seconds, sample_rate)),
            }
        }

        if let Err(e) = source.read_block(&mut block) {
            warn!("{:#}", e);
            continue;
        }

        gain.apply(&mut block);
        processor.process(&block);

        let dropped = processor.dropped();
        if dropped >= reported_drops + 100 {
            debug!("{} level summaries dropped so far", dropped);
            reported_drops = dropped;
        }
    }

    debug!("Stop flag set, ending capture loop");
}
