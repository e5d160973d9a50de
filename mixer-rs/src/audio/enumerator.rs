//! Endpoint and session enumeration using the Windows MMDevice API.
//!
//! Provides COM initialization and the [`WasapiBackend`] implementation of
//! the backend traits.

use super::backend::{AudioBackend, AudioEndpoint, AudioSession, Subscription, VolumeControl};
use super::device::{AudioError, DeviceEvent, EndpointState, StateFilter};
use super::notifications::DeviceNotificationClient;
use super::session::WasapiSession;
use super::volume::EndpointVolume;
use std::rc::Rc;
use std::sync::mpsc::Sender;
use tracing::warn;
use windows::core::Interface;
use windows::Win32::Devices::Properties::DEVPKEY_Device_FriendlyName;
use windows::Win32::Media::Audio::{
    eRender, IAudioSessionControl2, IAudioSessionManager2, IMMDevice, IMMDeviceEnumerator,
    IMMNotificationClient, ISimpleAudioVolume, MMDeviceEnumerator, DEVICE_STATE,
    DEVICE_STATEMASK_ALL, DEVICE_STATE_ACTIVE,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoUninitialize, CLSCTX_ALL, COINIT_APARTMENTTHREADED, STGM,
};
use windows::Win32::UI::Shell::PropertiesSystem::{IPropertyStore, PROPERTYKEY};

/// COM initialization guard that uninitializes COM on drop.
pub struct ComGuard {
    initialized: bool,
}

impl ComGuard {
    /// Initialize COM for the current thread.
    pub fn new() -> Result<Self, AudioError> {
        unsafe {
            // Use apartment-threaded for UI compatibility
            CoInitializeEx(None, COINIT_APARTMENTTHREADED)
                .ok()
                .map_err(|e| AudioError::ComInitFailed(e.message().to_string()))?;
        }
        Ok(Self { initialized: true })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.initialized {
            unsafe {
                CoUninitialize();
            }
        }
    }
}

/// Convert a DEVICE_STATE value to an [`EndpointState`].
pub(crate) fn convert_state(state: DEVICE_STATE) -> EndpointState {
    match state.0 {
        1 => EndpointState::Active,
        2 => EndpointState::Disabled,
        4 => EndpointState::NotPresent,
        8 => EndpointState::Unplugged,
        _ => EndpointState::NotPresent,
    }
}

/// Playback backend using the Windows Core Audio APIs.
pub struct WasapiBackend {
    enumerator: IMMDeviceEnumerator,
    // Declared last so COM outlives the enumerator.
    _com: ComGuard,
}

impl WasapiBackend {
    /// Initialize COM on the calling thread and create the device enumerator.
    ///
    /// The backend and every handle obtained from it must stay on this thread.
    pub fn new() -> Result<Self, AudioError> {
        let com = ComGuard::new()?;
        unsafe {
            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                    .map_err(|e| AudioError::EnumerationFailed(e.message().to_string()))?;

            Ok(Self {
                enumerator,
                _com: com,
            })
        }
    }
}

impl AudioBackend for WasapiBackend {
    fn endpoints(&self, filter: StateFilter) -> Result<Vec<Rc<dyn AudioEndpoint>>, AudioError> {
        let mask = match filter {
            StateFilter::Active => DEVICE_STATE_ACTIVE,
            StateFilter::All => DEVICE_STATEMASK_ALL,
        };

        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(eRender, mask)
                .map_err(|e| AudioError::EnumerationFailed(e.message().to_string()))?;

            let count = collection
                .GetCount()
                .map_err(|e| AudioError::EnumerationFailed(e.message().to_string()))?;

            let mut endpoints: Vec<Rc<dyn AudioEndpoint>> = Vec::with_capacity(count as usize);

            for i in 0..count {
                let endpoint = collection
                    .Item(i)
                    .map_err(AudioError::from)
                    .and_then(WasapiEndpoint::from_device);

                match endpoint {
                    Ok(endpoint) => endpoints.push(Rc::new(endpoint)),
                    Err(e) => warn!(index = i, error = %e, "Skipping endpoint"),
                }
            }

            Ok(endpoints)
        }
    }

    fn subscribe(&self, sender: Sender<DeviceEvent>) -> Result<Box<dyn Subscription>, AudioError> {
        let client = DeviceNotificationClient::new(sender).register(&self.enumerator)?;
        Ok(Box::new(NotificationRegistration {
            enumerator: self.enumerator.clone(),
            client,
        }))
    }
}

/// Registered notification client; unregisters on drop.
struct NotificationRegistration {
    enumerator: IMMDeviceEnumerator,
    client: IMMNotificationClient,
}

impl Subscription for NotificationRegistration {}

impl Drop for NotificationRegistration {
    fn drop(&mut self) {
        unsafe {
            let _ = self
                .enumerator
                .UnregisterEndpointNotificationCallback(&self.client);
        }
    }
}

/// A render endpoint backed by an IMMDevice.
pub struct WasapiEndpoint {
    device: IMMDevice,
    id: String,
    name: String,
    state: EndpointState,
}

impl WasapiEndpoint {
    fn from_device(device: IMMDevice) -> Result<Self, AudioError> {
        unsafe {
            let id = device.GetId()?;
            let id_string = id
                .to_string()
                .map_err(|e| AudioError::StringConversion(e.to_string()))?;
            windows::Win32::System::Com::CoTaskMemFree(Some(id.0 as *const _));

            let props: IPropertyStore = device.OpenPropertyStore(STGM(0))?;
            let name = get_device_name(&props).unwrap_or_else(|| "Unknown".to_string());
            let state = convert_state(device.GetState()?);

            Ok(Self {
                device,
                id: id_string,
                name,
                state,
            })
        }
    }
}

impl AudioEndpoint for WasapiEndpoint {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> EndpointState {
        self.state
    }

    fn master(&self) -> Result<Rc<dyn VolumeControl>, AudioError> {
        Ok(Rc::new(EndpointVolume::new(&self.device)?))
    }

    fn sessions(&self) -> Result<Vec<Rc<dyn AudioSession>>, AudioError> {
        unsafe {
            let manager: IAudioSessionManager2 = self.device.Activate(CLSCTX_ALL, None)?;
            let enumerator = manager.GetSessionEnumerator()?;
            let count = enumerator.GetCount()?;

            let mut sessions: Vec<Rc<dyn AudioSession>> = Vec::with_capacity(count as usize);
            for i in 0..count {
                let session = enumerator.GetSession(i).and_then(|control| {
                    let control2: IAudioSessionControl2 = control.cast()?;
                    let volume: ISimpleAudioVolume = control.cast()?;
                    Ok(WasapiSession::new(control2, volume))
                });

                match session {
                    Ok(session) => sessions.push(Rc::new(session)),
                    Err(e) => warn!(endpoint = %self.name, index = i, error = %e, "Skipping session"),
                }
            }

            Ok(sessions)
        }
    }
}

/// Get the friendly name of a device from its property store.
fn get_device_name(props: &IPropertyStore) -> Option<String> {
    unsafe {
        // Convert DEVPROPKEY to PROPERTYKEY
        let key = PROPERTYKEY {
            fmtid: DEVPKEY_Device_FriendlyName.fmtid,
            pid: DEVPKEY_Device_FriendlyName.pid,
        };

        let prop = props.GetValue(&key).ok()?;

        let s = prop.to_string();
        if s.is_empty() {
            None
        } else {
            Some(s)
        }
    }
}
