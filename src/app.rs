//! Front ends: wiring capture, relay and viewers together per subcommand.

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::audio::{self, AudioGraph};
use crate::config::{Config, GAIN_MAX_DB, GAIN_MIN_DB};
use crate::decibel::db_to_linear;
use crate::display::{spawn_key_reader, KeyAction, RawModeGuard, TerminalSurface};
use crate::ipc;
use crate::relay::{Publisher, Relay, Subscription};
use crate::viewer::{RenderLoop, Viewer};

/// Gain step for one key press, in dB.
const GAIN_STEP_DB: f32 = 1.0;

/// Input gain as driven by the keyboard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainControl {
    db: f32,
    muted: bool,
}

impl GainControl {
    pub fn new(db: f32) -> Self {
        Self {
            db: db.clamp(GAIN_MIN_DB, GAIN_MAX_DB),
            muted: false,
        }
    }

    /// Move the gain by `delta_db`. Unmutes.
    pub fn step(&mut self, delta_db: f32) -> f32 {
        self.db = (self.db + delta_db).clamp(GAIN_MIN_DB, GAIN_MAX_DB);
        self.muted = false;
        self.linear()
    }

    pub fn toggle_mute(&mut self) -> f32 {
        self.muted = !self.muted;
        self.linear()
    }

    pub fn linear(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            db_to_linear(self.db)
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn status(&self) -> String {
        if self.muted {
            "muted".to_string()
        } else {
            format!("gain {:+.0} dB", self.db)
        }
    }
}

/// Capture, relay and a terminal viewer in one process.
pub async fn run(config: Config) -> Result<()> {
    let relay = Relay::spawn();
    let server = tokio::spawn(ipc::serve(ipc::bind(&config.socket_path())?, relay.handle()));

    let (publisher, _) = relay.handle().attach()?.split();
    let (_, subscription) = relay.handle().attach()?.split();
    let result = capture_and_view(&config, publisher, Some(subscription)).await;

    server.abort();
    relay.shutdown().await;
    let _ = std::fs::remove_file(config.socket_path());
    result
}

/// Relay and socket listener only, until interrupted.
pub async fn relay(config: Config) -> Result<()> {
    let path = config.socket_path();
    let relay = Relay::spawn();
    let server = tokio::spawn(ipc::serve(ipc::bind(&path)?, relay.handle()));

    tokio::select! {
        result = server => result??,
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    relay.shutdown().await;
    let _ = std::fs::remove_file(&path);
    Ok(())
}

/// Capture into a relay running in another process.
pub async fn capture(config: Config) -> Result<()> {
    let (publisher, _) = ipc::connect(&config.socket_path()).await?.split();
    capture_and_view(&config, publisher, None).await
}

/// Show a meter fed by a relay running in another process.
pub async fn view(config: Config) -> Result<()> {
    let (_, subscription) = ipc::connect(&config.socket_path()).await?.split();
    let (_status_tx, status) = watch::channel("[c]olor [q]uit".to_string());
    let mut render = start_viewer(&config, subscription, status)?;
    let mut keys = spawn_key_reader()?;

    loop {
        tokio::select! {
            key = keys.recv() => match key {
                Some(KeyAction::NextColor) => render.set_scheme(render.scheme().next()),
                Some(KeyAction::Quit) | None => break,
                Some(_) => {}
            },
            _ = render.finished() => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    render.stop().await
}

fn start_viewer(config: &Config, subscription: Subscription, status: watch::Receiver<String>) -> Result<RenderLoop> {
    let settings = config.viewer.settings();
    let surface = TerminalSurface::new(status).context("Could not set up the terminal")?;
    Ok(RenderLoop::spawn(
        Viewer::new(&settings),
        subscription,
        surface,
        settings.frame_interval,
    ))
}

/// Run the capture graph with keyboard gain controls, optionally with a
/// local meter.
async fn capture_and_view(config: &Config, publisher: Publisher, meter: Option<Subscription>) -> Result<()> {
    let source = audio::open_source(&config.audio)?;
    let mut graph = AudioGraph::start(source, config.graph_settings(), publisher)?;
    let mut gain = GainControl::new(config.gain_db());
    let ramp = config.audio.ramp_seconds;

    let (status_tx, status) = watch::channel(controls_line(&gain));
    let mut raw_mode = None;
    let mut render = match meter {
        Some(subscription) => Some(start_viewer(config, subscription, status)?),
        None => {
            info!("Capturing; press q to stop");
            raw_mode = RawModeGuard::enable()
                .map_err(|e| warn!("Keyboard controls unavailable: {:#}", e))
                .ok();
            None
        }
    };

    // Keeps the fallback channel open so a missing keyboard does not read as quit.
    let (_no_keys, idle) = mpsc::unbounded_channel();
    let mut keys = match spawn_key_reader() {
        Ok(keys) => keys,
        Err(e) => {
            warn!("Keyboard controls unavailable: {:#}", e);
            idle
        }
    };

    loop {
        tokio::select! {
            key = keys.recv() => match key {
                Some(KeyAction::Quit) | None => break,
                Some(KeyAction::GainUp) => graph.set_gain(gain.step(GAIN_STEP_DB), ramp),
                Some(KeyAction::GainDown) => graph.set_gain(gain.step(-GAIN_STEP_DB), ramp),
                Some(KeyAction::Mute) => {
                    graph.set_gain(gain.toggle_mute(), ramp);
                    if gain.is_muted() {
                        graph.silence();
                    }
                }
                Some(KeyAction::NextColor) => {
                    if let Some(render) = render.as_mut() {
                        render.set_scheme(render.scheme().next());
                    }
                }
            },
            _ = render_finished(&mut render) => break,
            _ = tokio::signal::ctrl_c() => break,
        }
        let _ = status_tx.send(controls_line(&gain));
    }

    graph.silence();
    graph.stop();
    drop(raw_mode);
    match render {
        Some(render) => render.stop().await,
        None => Ok(()),
    }
}

/// Resolves when the local meter has failed. Never resolves without one.
async fn render_finished(render: &mut Option<RenderLoop>) {
    match render {
        Some(render) => render.finished().await,
        None => std::future::pending().await,
    }
}

fn controls_line(gain: &GainControl) -> String {
    format!("{} | [+/-] gain [m]ute [c]olor [q]uit", gain.status())
}
