//! Audio module for platform audio subsystem interactions.
//!
//! This module defines the capability surface the mixer needs (endpoint
//! enumeration, session volume/mute, device notifications), the Windows
//! Core Audio implementation of it, and an in-memory simulation for tests
//! (`simulated` feature).

pub mod backend;
pub mod device;
#[cfg(any(test, feature = "simulated"))]
pub mod simulated;

#[cfg(windows)]
pub mod enumerator;
#[cfg(windows)]
pub mod notifications;
#[cfg(windows)]
pub mod session;
#[cfg(windows)]
pub mod volume;

pub use backend::{
    default_backend, AudioBackend, AudioEndpoint, AudioSession, BackendCapabilities,
    Subscription, VolumeControl,
};
pub use device::{
    AudioError, ChannelControl, ChannelKind, ControlIntent, ControlOutcome, DeviceEvent,
    EndpointState, LogicalChannel, SessionState, StateFilter,
};
#[cfg(windows)]
pub use enumerator::{ComGuard, WasapiBackend};
