use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::color::ColorScheme;

#[derive(Parser, Debug)]
#[command(name = "levelcast")]
#[command(author, version, about = "Live microphone level meter with a fan-out relay")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Relay socket path
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    /// Capture device (see `levelcast list-sources`)
    #[arg(short, long, global = true)]
    pub device: Option<String>,

    /// Capture sample rate in Hz
    #[arg(long, global = true)]
    pub sample_rate: Option<u32>,

    /// Samples per capture block
    #[arg(long, global = true)]
    pub block_size: Option<usize>,

    /// Use a sine test tone of this frequency instead of the microphone
    #[arg(long, global = true, value_name = "HZ")]
    pub tone: Option<f32>,

    /// Initial input gain in dB
    #[arg(long, global = true, value_name = "DB", allow_hyphen_values = true)]
    pub gain: Option<f32>,

    /// Viewer refresh rate
    #[arg(long, global = true)]
    pub fps: Option<u32>,

    /// Color scheme: classic, ocean, monochrome
    #[arg(long, global = true)]
    pub colors: Option<ColorScheme>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Capture, relay and view in one process (default)
    Run,
    /// Run only the relay and its socket listener
    Relay,
    /// Capture into a running relay, with gain and mute keys
    Capture,
    /// Show a meter fed by a running relay
    View,
    /// List capture devices
    ListSources,
    /// Write the default config file
    InitConfig,
    /// Print shell completions
    Completions { shell: Shell },
}

impl Args {
    pub fn subcommand(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}
