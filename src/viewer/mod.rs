//! The viewer side: decoding level summaries, staleness, and the render loop.

mod meter;

pub use meter::{marker_labels, BarHeights, MeterPainter};

use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::color::ColorScheme;
use crate::levels::{Envelope, LevelSummary, Payload};
use crate::relay::Subscription;
use crate::renderer::Canvas;

/// What the viewer currently displays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualState {
    levels: LevelSummary,
    last_update: Option<Instant>,
}

impl Default for VisualState {
    fn default() -> Self {
        Self {
            levels: LevelSummary::SILENCE,
            last_update: None,
        }
    }
}

impl VisualState {
    pub fn receive(&mut self, payload: &Payload, now: Instant) {
        self.levels = payload.levels();
        self.last_update = Some(now);
    }

    /// Fall back to silence once nothing has arrived for longer than `window`.
    /// Returns true when the levels were reset.
    pub fn expire_if_stale(&mut self, now: Instant, window: Duration) -> bool {
        match self.last_update {
            Some(at) if now.saturating_duration_since(at) > window => {
                self.levels = LevelSummary::SILENCE;
                true
            }
            _ => false,
        }
    }

    pub fn levels(&self) -> LevelSummary {
        self.levels
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }
}

#[derive(Debug, Clone)]
pub struct ViewerSettings {
    pub frame_interval: Duration,
    pub meter_width: u32,
    pub meter_height: u32,
    pub marker_width: u32,
    pub color_scheme: ColorScheme,
}

impl ViewerSettings {
    /// Two refresh intervals without an update means the sender went quiet.
    pub fn staleness_window(&self) -> Duration {
        self.frame_interval * 2
    }
}

/// A meter viewer: visual state plus the rasters it is drawn into.
pub struct Viewer {
    state: VisualState,
    painter: MeterPainter,
    scheme: ColorScheme,
    meter: Canvas,
    markers: Canvas,
    staleness: Duration,
}

impl Viewer {
    pub fn new(settings: &ViewerSettings) -> Self {
        let painter = MeterPainter::new(settings.color_scheme);
        let mut markers = Canvas::new(settings.marker_width, settings.meter_height);
        painter.draw_markers(&mut markers);

        let mut meter = Canvas::new(settings.meter_width, settings.meter_height);
        painter.draw_levels(&mut meter, LevelSummary::SILENCE);

        Self {
            state: VisualState::default(),
            painter,
            scheme: settings.color_scheme,
            meter,
            markers,
            staleness: settings.staleness_window(),
        }
    }

    pub fn receive(&mut self, envelope: &Envelope, now: Instant) {
        self.state.receive(&envelope.payload, now);
    }

    /// One render tick: staleness check, then redraw the meter.
    pub fn tick(&mut self, now: Instant) {
        self.state.expire_if_stale(now, self.staleness);
        self.painter.draw_levels(&mut self.meter, self.state.levels());
    }

    pub fn set_scheme(&mut self, scheme: ColorScheme) {
        self.scheme = scheme;
        self.painter = MeterPainter::new(scheme);
        self.painter.draw_markers(&mut self.markers);
    }

    /// Reallocate both rasters. The meter is redrawn on the next tick.
    pub fn resize(&mut self, meter_width: u32, marker_width: u32, height: u32) {
        if (meter_width, marker_width, height) == (self.meter.width(), self.markers.width(), self.meter.height()) {
            return;
        }
        self.meter = Canvas::new(meter_width, height);
        self.markers = Canvas::new(marker_width, height);
        self.painter.draw_markers(&mut self.markers);
    }

    pub fn scheme(&self) -> ColorScheme {
        self.scheme
    }

    pub fn state(&self) -> &VisualState {
        &self.state
    }

    pub fn meter(&self) -> &Canvas {
        &self.meter
    }

    pub fn markers(&self) -> &Canvas {
        &self.markers
    }
}

/// Where rendered frames end up.
pub trait Surface: Send {
    /// Raster size `(meter width, marker width, height)` the surface wants,
    /// if it differs from the configured one.
    fn raster_size(&mut self) -> Option<(u32, u32, u32)> {
        None
    }

    fn present(&mut self, viewer: &Viewer) -> Result<()>;
}

enum RenderControl {
    SetScheme(ColorScheme),
    Stop,
}

/// Handle to a running render loop. Dropping it stops the loop.
pub struct RenderLoop {
    control: mpsc::UnboundedSender<RenderControl>,
    task: JoinHandle<Result<()>>,
    scheme: ColorScheme,
    outcome: Option<Result<()>>,
}

impl RenderLoop {
    /// Start drawing `viewer` onto `surface` every `frame_interval`, fed by
    /// `subscription`. Must be called from within a tokio runtime.
    pub fn spawn<S>(viewer: Viewer, subscription: Subscription, surface: S, frame_interval: Duration) -> Self
    where
        S: Surface + 'static,
    {
        let scheme = viewer.scheme();
        let (control, controls) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(viewer, subscription, surface, frame_interval, controls));
        Self {
            control,
            task,
            scheme,
            outcome: None,
        }
    }

    pub fn set_scheme(&mut self, scheme: ColorScheme) {
        self.scheme = scheme;
        let _ = self.control.send(RenderControl::SetScheme(scheme));
    }

    /// The scheme most recently requested.
    pub fn scheme(&self) -> ColorScheme {
        self.scheme
    }

    /// Resolves once the loop has ended on its own, which happens when the
    /// surface fails. Cancel safe, so it can sit in a `select!`.
    pub async fn finished(&mut self) {
        if self.outcome.is_none() {
            let outcome = match (&mut self.task).await {
                Ok(result) => result,
                Err(e) => Err(e.into()),
            };
            self.outcome = Some(outcome);
        }
    }

    /// Stop the loop and wait for it. Returns the surface error, if any
    /// ended the loop early.
    pub async fn stop(self) -> Result<()> {
        if let Some(outcome) = self.outcome {
            return outcome;
        }
        let _ = self.control.send(RenderControl::Stop);
        self.task.await?
    }
}

async fn run<S: Surface>(
    mut viewer: Viewer,
    mut subscription: Subscription,
    mut surface: S,
    frame_interval: Duration,
    mut controls: mpsc::UnboundedReceiver<RenderControl>,
) -> Result<()> {
    let mut ticker = tokio::time::interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut inbound_open = true;

    info!("Render loop started for endpoint {}", subscription.id());

    loop {
        tokio::select! {
            biased;

            control = controls.recv() => match control {
                Some(RenderControl::SetScheme(scheme)) => viewer.set_scheme(scheme),
                Some(RenderControl::Stop) | None => break,
            },
            envelope = subscription.recv(), if inbound_open => match envelope {
                Some(envelope) => viewer.receive(&envelope, Instant::now()),
                None => {
                    debug!("Relay stream ended; meter will fall back to silence");
                    inbound_open = false;
                }
            },
            _ = ticker.tick() => {
                if let Some((meter_width, marker_width, height)) = surface.raster_size() {
                    viewer.resize(meter_width, marker_width, height);
                }
                viewer.tick(Instant::now());
                surface.present(&viewer)?;
            }
        }
    }

    info!("Render loop stopped");
    Ok(())
}
