//! Audio data models.
//!
//! Defines the core data structures for representing playback endpoints,
//! application sessions, logical mixer channels and related events.

use super::backend::{AudioSession, VolumeControl};
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Endpoint activity state (maps to the Windows DEVICE_STATE flags).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointState {
    /// Device is active and available for use
    Active,

    /// Device is disabled in Windows Sound settings
    Disabled,

    /// Device is not present (driver issue)
    NotPresent,

    /// Device is unplugged (for pluggable devices)
    Unplugged,
}

impl EndpointState {
    /// Whether the endpoint can currently render audio.
    pub fn is_active(self) -> bool {
        self == EndpointState::Active
    }
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndpointState::Active => "active",
            EndpointState::Disabled => "disabled",
            EndpointState::NotPresent => "not present",
            EndpointState::Unplugged => "unplugged",
        };
        f.write_str(s)
    }
}

/// Which endpoints an enumeration should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFilter {
    /// Only endpoints in the active state
    Active,

    /// Endpoints in every state (diagnostics only)
    All,
}

/// Audio session state (maps to AudioSessionState).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Inactive,
    Active,
    Expired,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Inactive => "inactive",
            SessionState::Active => "active",
            SessionState::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Kind of a logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Endpoint-wide volume and mute
    Master,

    /// A single application's audio session
    Application,
}

/// Live control handle behind a logical channel.
#[derive(Clone)]
pub enum ChannelControl {
    /// Endpoint master volume (IAudioEndpointVolume)
    Master(Rc<dyn VolumeControl>),

    /// Application session volume (ISimpleAudioVolume)
    Session(Rc<dyn AudioSession>),
}

impl ChannelControl {
    /// The volume/mute primitive for this handle.
    pub fn volume_control(&self) -> &dyn VolumeControl {
        match self {
            ChannelControl::Master(control) => control.as_ref(),
            ChannelControl::Session(session) => session.as_volume_control(),
        }
    }
}

impl fmt::Debug for ChannelControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelControl::Master(_) => f.write_str("Master(..)"),
            ChannelControl::Session(_) => f.write_str("Session(..)"),
        }
    }
}

/// A channel presented to the user.
///
/// Rebuilt wholesale on every session match; only the name survives across
/// passes (through the pending-restore table).
#[derive(Debug, Clone)]
pub struct LogicalChannel {
    /// Resolved display name, unique within one endpoint's channel set
    pub name: String,

    pub kind: ChannelKind,

    /// Owning process id (0 for the master channel)
    pub process_id: u32,

    /// Process name, when the owning process could be resolved
    pub process_name: Option<String>,

    /// Live handle; absent for placeholder channels
    pub control: Option<ChannelControl>,
}

impl LogicalChannel {
    /// Create the master channel for an endpoint.
    pub fn master(name: impl Into<String>, control: Option<Rc<dyn VolumeControl>>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Master,
            process_id: 0,
            process_name: None,
            control: control.map(ChannelControl::Master),
        }
    }

    /// Create an application channel backed by a session.
    pub fn application(
        name: impl Into<String>,
        process_id: u32,
        process_name: Option<String>,
        session: Rc<dyn AudioSession>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Application,
            process_id,
            process_name,
            control: Some(ChannelControl::Session(session)),
        }
    }

    pub fn is_master(&self) -> bool {
        self.kind == ChannelKind::Master
    }
}

/// A one-shot command from the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlIntent {
    /// Set volume as a percentage (0-100)
    SetVolume { channel: String, level: u8 },

    SetMute { channel: String, muted: bool },

    /// Move an application's stream to another endpoint (not supported)
    Redirect { channel: String, endpoint: String },
}

/// Result of a control operation that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// The write reached the live handle
    Applied,

    /// No channel with that name exists; nothing was changed
    UnknownChannel,
}

/// Events from the Windows audio system.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// A new audio device was connected
    DeviceAdded { device_id: String },

    /// An audio device was disconnected
    DeviceRemoved { device_id: String },

    /// Device state changed (active, disabled, not present, unplugged)
    DeviceStateChanged {
        device_id: String,
        new_state: EndpointState,
    },

    /// Default render device changed
    DefaultDeviceChanged { device_id: Option<String> },

    /// A device property changed
    PropertyChanged { device_id: String },
}

impl DeviceEvent {
    /// Whether this event should cause the endpoint catalog to be re-enumerated.
    ///
    /// Property changes carry no name or state semantics and are ignored.
    pub fn triggers_refresh(&self) -> bool {
        !matches!(self, DeviceEvent::PropertyChanged { .. })
    }
}

/// Audio service error types.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AudioError {
    #[error("Endpoint not found: {name}")]
    EndpointNotFound { name: String },

    #[error("Channel has no control handle: {name}")]
    NoControl { name: String },

    #[error("COM initialization failed: {0}")]
    ComInitFailed(String),

    #[error("Failed to enumerate devices: {0}")]
    EnumerationFailed(String),

    #[error("Audio subsystem error {code:#010x}: {message}")]
    Platform { code: i32, message: String },

    #[error("Control handle is no longer valid")]
    StaleHandle,

    #[error("Process {pid} is not available: {reason}")]
    ProcessUnavailable { pid: u32, reason: String },

    #[error("Failed to {action} {channel}: {source}")]
    MutationFailed {
        channel: String,
        action: &'static str,
        #[source]
        source: Box<AudioError>,
    },

    #[error("{0} is not supported")]
    Unsupported(&'static str),

    #[error("No audio backend is available on this platform")]
    BackendUnavailable,

    #[error("String conversion error: {0}")]
    StringConversion(String),
}

impl AudioError {
    /// Faults that may clear after the session handles are rebuilt.
    pub fn is_transient(&self) -> bool {
        matches!(self, AudioError::Platform { .. } | AudioError::StaleHandle)
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for AudioError {
    fn from(err: windows::core::Error) -> Self {
        AudioError::Platform {
            code: err.code().0,
            message: err.message().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_change_does_not_refresh() {
        let event = DeviceEvent::PropertyChanged {
            device_id: "dev".to_string(),
        };
        assert!(!event.triggers_refresh());

        let event = DeviceEvent::DeviceStateChanged {
            device_id: "dev".to_string(),
            new_state: EndpointState::Unplugged,
        };
        assert!(event.triggers_refresh());
        assert!(DeviceEvent::DefaultDeviceChanged { device_id: None }.triggers_refresh());
    }

    #[test]
    fn test_transient_classification() {
        assert!(AudioError::StaleHandle.is_transient());
        assert!(AudioError::Platform {
            code: -2004287484,
            message: "device invalidated".to_string(),
        }
        .is_transient());
        assert!(!AudioError::Unsupported("Redirect").is_transient());
        assert!(!AudioError::NoControl {
            name: "x".to_string()
        }
        .is_transient());
    }
}
