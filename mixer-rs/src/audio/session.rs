//! Application session handles using IAudioSessionControl2 and ISimpleAudioVolume.

use super::backend::{AudioSession, VolumeControl};
use super::device::{AudioError, SessionState};
use windows::core::PWSTR;
use windows::Win32::Media::Audio::{
    AudioSessionStateActive, AudioSessionStateExpired, IAudioSessionControl2,
    ISimpleAudioVolume,
};
use windows::Win32::System::Com::CoTaskMemFree;

/// A session reported by an endpoint's session manager.
pub struct WasapiSession {
    control: IAudioSessionControl2,
    volume: ISimpleAudioVolume,
}

impl WasapiSession {
    pub(crate) fn new(control: IAudioSessionControl2, volume: ISimpleAudioVolume) -> Self {
        Self { control, volume }
    }
}

/// Copy a CoTaskMem-allocated string and free it.
unsafe fn take_co_string(ptr: PWSTR) -> Result<String, AudioError> {
    if ptr.is_null() {
        return Ok(String::new());
    }
    let value = ptr
        .to_string()
        .map_err(|e| AudioError::StringConversion(e.to_string()));
    CoTaskMemFree(Some(ptr.0 as *const _));
    value
}

impl VolumeControl for WasapiSession {
    fn volume(&self) -> Result<f32, AudioError> {
        unsafe { Ok(self.volume.GetMasterVolume()?) }
    }

    fn set_volume(&self, level: f32) -> Result<(), AudioError> {
        let level = level.clamp(0.0, 1.0);
        unsafe {
            self.volume.SetMasterVolume(level, std::ptr::null())?;
        }
        Ok(())
    }

    fn is_muted(&self) -> Result<bool, AudioError> {
        unsafe { Ok(self.volume.GetMute()?.as_bool()) }
    }

    fn set_mute(&self, muted: bool) -> Result<(), AudioError> {
        unsafe {
            self.volume.SetMute(muted, std::ptr::null())?;
        }
        Ok(())
    }
}

impl AudioSession for WasapiSession {
    fn identifier(&self) -> Result<String, AudioError> {
        unsafe { take_co_string(self.control.GetSessionIdentifier()?) }
    }

    fn process_id(&self) -> Result<u32, AudioError> {
        unsafe { Ok(self.control.GetProcessId()?) }
    }

    fn display_name(&self) -> Result<String, AudioError> {
        unsafe { take_co_string(self.control.GetDisplayName()?) }
    }

    fn state(&self) -> Result<SessionState, AudioError> {
        let state = unsafe { self.control.GetState()? };
        Ok(if state == AudioSessionStateActive {
            SessionState::Active
        } else if state == AudioSessionStateExpired {
            SessionState::Expired
        } else {
            SessionState::Inactive
        })
    }

    fn as_volume_control(&self) -> &dyn VolumeControl {
        self
    }
}
