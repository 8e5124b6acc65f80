//! The level processing unit that lives on the real-time capture thread.
//!
//! Each block goes through the analyser, and a summary is handed off to the
//! outlet at most once per `broadcast_rate` samples. Nothing here blocks or
//! allocates once the unit is ready.

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

use super::analyser::{Analyser, AnalyserError, AnalyserModule};
use crate::levels::LevelSummary;

/// Emission threshold in samples. At 48 kHz this is roughly 94 summaries per
/// second, a little above a 60 Hz display refresh.
pub const BROADCAST_RATE: usize = 512;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("failed to load the level analyser module: {0}")]
    AnalyserLoad(#[source] AnalyserError),
    #[error("start signal received before the analyser module was loaded")]
    NotLoaded,
}

enum State<M: AnalyserModule> {
    Uninitialized,
    AwaitingStart(M),
    Ready(M::Handle),
}

#[cfg(test)]
impl<M: AnalyserModule> State<M> {
    fn name(&self) -> &'static str {
        match self {
            State::Uninitialized => "uninitialized",
            State::AwaitingStart(_) => "awaiting start",
            State::Ready(_) => "ready",
        }
    }
}

pub struct LevelProcessor<M: AnalyserModule> {
    state: State<M>,
    sample_rate: f32,
    broadcast_rate: usize,
    accumulated: usize,
    outlet: mpsc::Sender<LevelSummary>,
    dropped: u64,
}

impl<M: AnalyserModule> LevelProcessor<M> {
    pub fn new(sample_rate: f32, broadcast_rate: usize, outlet: mpsc::Sender<LevelSummary>) -> Self {
        Self {
            state: State::Uninitialized,
            sample_rate,
            broadcast_rate: broadcast_rate.max(1),
            accumulated: 0,
            outlet,
            dropped: 0,
        }
    }

    /// Install the analyser module produced by `loader`.
    ///
    /// A failed load is fatal for this unit: it stays uninitialized and the
    /// error is returned to the host. Nothing is retried.
    pub fn load<F>(&mut self, loader: F) -> Result<(), ProcessorError>
    where
        F: FnOnce() -> Result<M, AnalyserError>,
    {
        let module = loader().map_err(ProcessorError::AnalyserLoad)?;
        self.state = State::AwaitingStart(module);
        debug!("Level analyser module loaded");
        Ok(())
    }

    /// Instantiate the analyser and begin processing blocks.
    pub fn start(&mut self) -> Result<(), ProcessorError> {
        match std::mem::replace(&mut self.state, State::Uninitialized) {
            State::Uninitialized => Err(ProcessorError::NotLoaded),
            State::AwaitingStart(module) => {
                self.state = State::Ready(module.instantiate(self.sample_rate));
                info!("Level processor ready at {} Hz", self.sample_rate);
                Ok(())
            }
            ready @ State::Ready(_) => {
                self.state = ready;
                Ok(())
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    #[cfg(test)]
    pub(crate) fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Summaries that could not be handed off because the outlet was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Process one block. Returns true when a summary was emitted.
    ///
    /// Blocks that arrive before the unit is ready are ignored.
    pub fn process(&mut self, block: &[f32]) -> bool {
        let State::Ready(analyser) = &mut self.state else {
            return false;
        };

        let summary = analyser.process(block);
        if !self.should_emit(block.len()) {
            return false;
        }

        match self.outlet.try_send(summary) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.dropped += 1;
                false
            }
        }
    }

    fn should_emit(&mut self, block_len: usize) -> bool {
        if block_len >= self.broadcast_rate {
            return true;
        }
        self.accumulated += block_len;
        if self.accumulated >= self.broadcast_rate {
            self.accumulated %= self.broadcast_rate;
            true
        } else {
            false
        }
    }
}
