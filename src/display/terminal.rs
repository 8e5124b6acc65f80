use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;
use std::io::{self, stdout};
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::color::Rgb8;
use crate::renderer::Canvas;
use crate::viewer::{marker_labels, Surface, Viewer};

/// Cells reserved for the dB labels left of the marker strip.
const LABEL_WIDTH: u16 = 3;
const MARKER_CELLS: u16 = 2;
const MAX_METER_CELLS: u16 = 12;

/// Keyboard commands understood by the terminal front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Quit,
    GainUp,
    GainDown,
    Mute,
    NextColor,
}

fn key_action(key: KeyEvent) -> Option<KeyAction> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    match key {
        KeyEvent {
            code: KeyCode::Char('q') | KeyCode::Esc,
            ..
        }
        | KeyEvent {
            code: KeyCode::Char('c'),
            modifiers: KeyModifiers::CONTROL,
            ..
        } => Some(KeyAction::Quit),
        KeyEvent {
            code: KeyCode::Char('+') | KeyCode::Char('=') | KeyCode::Up,
            ..
        } => Some(KeyAction::GainUp),
        KeyEvent {
            code: KeyCode::Char('-') | KeyCode::Down,
            ..
        } => Some(KeyAction::GainDown),
        KeyEvent {
            code: KeyCode::Char('m'),
            ..
        } => Some(KeyAction::Mute),
        KeyEvent {
            code: KeyCode::Char('c'),
            ..
        } => Some(KeyAction::NextColor),
        _ => None,
    }
}

/// Read keys on a plain thread, since crossterm polling blocks. The thread
/// exits once the receiver is dropped.
pub fn spawn_key_reader() -> Result<mpsc::UnboundedReceiver<KeyAction>> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::Builder::new()
        .name("levelcast-keys".into())
        .spawn(move || {
            while !tx.is_closed() {
                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        debug!("Key polling failed: {}", e);
                        break;
                    }
                }
                if let Ok(Event::Key(key)) = event::read() {
                    if let Some(action) = key_action(key) {
                        if tx.send(action).is_err() {
                            break;
                        }
                    }
                }
            }
        })?;
    Ok(rx)
}

/// Raw mode for single-key controls without a full-screen surface.
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn enable() -> Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// Full-screen meter drawn with upper-half-block cells, two pixels per cell.
pub struct TerminalSurface {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    status: watch::Receiver<String>,
}

impl TerminalSurface {
    /// Switch the terminal to raw mode and the alternate screen. Both are
    /// restored when the surface is dropped.
    pub fn new(status: watch::Receiver<String>) -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = stdout();
        execute!(stdout, EnterAlternateScreen)?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;
        terminal.hide_cursor()?;

        Ok(Self { terminal, status })
    }
}

impl Drop for TerminalSurface {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

/// Where the pieces of the meter go within `area`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct MeterLayout {
    labels: Rect,
    markers: Rect,
    meter: Rect,
    status: Rect,
    readout: Rect,
}

impl MeterLayout {
    fn new(area: Rect) -> Self {
        let body_height = area.height.saturating_sub(2);
        let meter_cells = (area.width / 4).clamp(1, MAX_METER_CELLS);
        let total = LABEL_WIDTH + MARKER_CELLS + 1 + meter_cells;
        let left = area.x + area.width.saturating_sub(total) / 2;
        let top = area.y + 1;

        Self {
            status: Rect::new(area.x, area.y, area.width, area.height.min(1)),
            labels: Rect::new(left, top, LABEL_WIDTH, body_height),
            markers: Rect::new(left + LABEL_WIDTH, top, MARKER_CELLS, body_height),
            meter: Rect::new(left + LABEL_WIDTH + MARKER_CELLS + 1, top, meter_cells, body_height),
            readout: Rect::new(area.x, top + body_height, area.width, area.height.saturating_sub(1).min(1)),
        }
    }
}

impl Surface for TerminalSurface {
    fn raster_size(&mut self) -> Option<(u32, u32, u32)> {
        let area = self.terminal.size().ok()?;
        let layout = MeterLayout::new(Rect::new(0, 0, area.width, area.height));
        Some((
            layout.meter.width as u32,
            layout.markers.width as u32,
            layout.meter.height as u32 * 2,
        ))
    }

    fn present(&mut self, viewer: &Viewer) -> Result<()> {
        let status = self.status.borrow().clone();
        self.terminal.draw(|frame| {
            let area = frame.area();
            let layout = MeterLayout::new(area);
            let buf = frame.buffer_mut();

            blit_half_blocks(buf, layout.markers, viewer.markers());
            blit_half_blocks(buf, layout.meter, viewer.meter());
            draw_labels(buf, layout.labels, viewer.markers().height());

            let levels = viewer.state().levels();
            let readout = format!(
                " inst {:>6.1}  rms {:>6.1}  peak {:>6.1} dB ",
                levels.instant(),
                levels.rms(),
                levels.peak_hold()
            );
            draw_text(buf, layout.readout, &readout, Style::default().fg(Color::Gray));

            let line = format!(" levelcast | {} | {} ", viewer.scheme().name(), status);
            draw_text(buf, layout.status, &line, Style::default().fg(Color::DarkGray));
        })?;
        Ok(())
    }
}

fn to_color(c: Rgb8) -> Color {
    Color::Rgb(c.red, c.green, c.blue)
}

/// Copy a raster into `area`, one cell per column and two rows per cell.
fn blit_half_blocks(buf: &mut Buffer, area: Rect, canvas: &Canvas) {
    for cy in 0..area.height {
        for cx in 0..area.width {
            let (x, y) = (cx as u32, cy as u32 * 2);
            let (Some(top), Some(bottom)) = (canvas.pixel(x, y), canvas.pixel(x, y + 1)) else {
                continue;
            };
            if let Some(cell) = buf.cell_mut((area.x + cx, area.y + cy)) {
                cell.set_char('▀');
                cell.set_fg(to_color(top));
                cell.set_bg(to_color(bottom));
            }
        }
    }
}

fn draw_labels(buf: &mut Buffer, area: Rect, pixel_height: u32) {
    for (row, text, bold) in marker_labels(pixel_height) {
        let cy = (row / 2) as u16;
        if cy >= area.height {
            continue;
        }
        let style = if bold {
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let pad = area.width.saturating_sub(text.len() as u16);
        let line = Rect::new(area.x + pad, area.y + cy, area.width - pad, 1);
        draw_text(buf, line, &text, style);
    }
}

fn draw_text(buf: &mut Buffer, area: Rect, text: &str, style: Style) {
    if area.height == 0 {
        return;
    }
    for (i, ch) in text.chars().enumerate() {
        if i >= area.width as usize {
            break;
        }
        if let Some(cell) = buf.cell_mut((area.x + i as u16, area.y)) {
            cell.set_char(ch);
            cell.set_style(style);
        }
    }
}
