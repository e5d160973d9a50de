//! Capability surface required from the platform audio layer.
//!
//! The mixer core only talks to these traits. `WasapiBackend` implements them
//! on Windows and `SimulatedBackend` implements them in memory.

use super::device::{AudioError, DeviceEvent, EndpointState, SessionState, StateFilter};
use std::rc::Rc;
use std::sync::mpsc::Sender;

/// Volume and mute primitives shared by endpoints and sessions.
pub trait VolumeControl {
    /// Current volume level (0.0 to 1.0).
    fn volume(&self) -> Result<f32, AudioError>;

    /// Set the volume level (0.0 to 1.0).
    fn set_volume(&self, level: f32) -> Result<(), AudioError>;

    fn is_muted(&self) -> Result<bool, AudioError>;

    fn set_mute(&self, muted: bool) -> Result<(), AudioError>;
}

/// A per-application audio session on an endpoint.
pub trait AudioSession: VolumeControl {
    /// Opaque session identifier reported by the subsystem.
    fn identifier(&self) -> Result<String, AudioError>;

    fn process_id(&self) -> Result<u32, AudioError>;

    /// Display name set by the application; frequently empty.
    fn display_name(&self) -> Result<String, AudioError>;

    fn state(&self) -> Result<SessionState, AudioError>;

    fn as_volume_control(&self) -> &dyn VolumeControl;
}

/// A playback endpoint.
pub trait AudioEndpoint {
    /// Opaque platform device id.
    fn id(&self) -> &str;

    /// Friendly name, used as the catalog key.
    fn name(&self) -> &str;

    fn state(&self) -> EndpointState;

    /// Endpoint master volume handle.
    fn master(&self) -> Result<Rc<dyn VolumeControl>, AudioError>;

    /// Sessions currently reported on this endpoint.
    fn sessions(&self) -> Result<Vec<Rc<dyn AudioSession>>, AudioError>;

    /// Ask the subsystem to rebuild its session list.
    ///
    /// Only called when [`BackendCapabilities::session_refresh`] is set.
    fn refresh_sessions(&self) -> Result<(), AudioError> {
        Err(AudioError::Unsupported("Session refresh"))
    }
}

/// Optional features a backend may offer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Endpoints support [`AudioEndpoint::refresh_sessions`]
    pub session_refresh: bool,
}

/// Registration for device-change notifications.
///
/// Dropping the value unregisters the callback.
pub trait Subscription {}

/// Entry point into a platform audio subsystem.
pub trait AudioBackend {
    /// Enumerate render endpoints matching the filter.
    fn endpoints(&self, filter: StateFilter) -> Result<Vec<Rc<dyn AudioEndpoint>>, AudioError>;

    /// Register for device-change notifications delivered to `sender`.
    ///
    /// Notifications may be sent from another thread.
    fn subscribe(&self, sender: Sender<DeviceEvent>) -> Result<Box<dyn Subscription>, AudioError>;

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }
}

/// Create the native backend for this platform.
#[cfg(windows)]
pub fn default_backend() -> Result<Rc<dyn AudioBackend>, AudioError> {
    Ok(Rc::new(super::enumerator::WasapiBackend::new()?))
}

/// Create the native backend for this platform.
#[cfg(not(windows))]
pub fn default_backend() -> Result<Rc<dyn AudioBackend>, AudioError> {
    Err(AudioError::BackendUnavailable)
}
