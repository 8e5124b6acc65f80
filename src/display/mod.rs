pub mod terminal;

pub use terminal::{spawn_key_reader, KeyAction, RawModeGuard, TerminalSurface};
