//! Core library for the video player.
//!
//! The crate drives a small presentation device: a pre-sliced frame sequence
//! is paced to a display at a fixed rate while an ambient light timeline and
//! an optional soundtrack run alongside, all controlled over a line-based TCP
//! protocol. Hardware access stays behind the [`DisplaySink`], [`LedSink`] and
//! [`AudioOutput`] traits so the binary decides what is actually driven.

pub mod audio;
pub mod clock;
pub mod config;
pub mod error;
pub mod frames;
pub mod library;
pub mod playback;
pub mod protocol;
pub mod render;
pub mod server;
pub mod timeline;

pub use audio::{AudioChannel, AudioOutput, Sound};
pub use clock::{Clock, ManualClock, StopSignal, SystemClock};
pub use config::{
    AppConfig, AudioConfig, DisplayConfig, LedConfig, LibraryConfig, PlaybackConfig, ServerConfig,
};
pub use error::{PlayerError, Result};
pub use frames::{CachedFrameSource, DirectoryFrameSource, Frame, FrameSequence, FrameSource};
pub use library::{VideoEntry, VideoLibrary};
pub use playback::{
    Devices, FrameRateCounter, PlaybackCoordinator, PlaybackSettings, PlaybackState,
};
pub use protocol::{Command, CommandKind, Reply, Request};
pub use render::DisplaySink;
pub use server::{CommandServer, Controller};
pub use timeline::{Color, LedSink, LedTarget, LightState, LightTimeline, Timeline};
