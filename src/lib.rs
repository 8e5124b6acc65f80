//! Live microphone level meter: a real-time level processor, a fan-out
//! relay, and viewers that render the levels into a terminal meter.

pub mod app;
pub mod audio;
pub mod cli;
pub mod color;
pub mod config;
pub mod decibel;
pub mod display;
pub mod ipc;
pub mod levels;
pub mod relay;
pub mod renderer;
pub mod viewer;
