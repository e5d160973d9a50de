//! Windows Audio Mixer - Library
//!
//! Per-application volume mixer engine for Windows playback devices.
//!
//! ## Features
//!
//! - One channel per application playing audio, plus the device master volume
//! - Re-scans for applications the audio subsystem fails to report
//! - Browser sessions named after their window title
//! - Configurable mute policies for applications that ignore the mute flag
//! - Periodic reconciliation with the live audio state
//! - Automatic detection of device hot-plug events

pub mod app;
pub mod audio;
pub mod config;
pub mod mixer;
pub mod platform;
pub mod process;

pub use app::MixerApp;
pub use audio::{
    default_backend, AudioBackend, AudioError, ChannelKind, ControlIntent, ControlOutcome,
    DeviceEvent, LogicalChannel,
};
pub use config::{ConfigError, MixerConfig, MutePolicy, MuteRule, RescanHint};
pub use mixer::{CancelToken, ChannelSnapshot, EndpointReport, MixerSnapshot, TickKind};
pub use process::{ProcessInfo, ProcessTable, SystemProcessTable};
