//! Endpoint volume control using IAudioEndpointVolume.

use super::backend::VolumeControl;
use super::device::AudioError;
use windows::Win32::Media::Audio::{Endpoints::IAudioEndpointVolume, IMMDevice};
use windows::Win32::System::Com::CLSCTX_ALL;

/// Master volume handle for a specific endpoint.
pub struct EndpointVolume {
    endpoint_volume: IAudioEndpointVolume,
}

impl EndpointVolume {
    /// Activate the endpoint volume interface for the given device.
    pub fn new(device: &IMMDevice) -> Result<Self, AudioError> {
        unsafe {
            let endpoint_volume: IAudioEndpointVolume = device.Activate(CLSCTX_ALL, None)?;
            Ok(Self { endpoint_volume })
        }
    }
}

impl VolumeControl for EndpointVolume {
    fn volume(&self) -> Result<f32, AudioError> {
        unsafe { Ok(self.endpoint_volume.GetMasterVolumeLevelScalar()?) }
    }

    fn set_volume(&self, level: f32) -> Result<(), AudioError> {
        let level = level.clamp(0.0, 1.0);
        unsafe {
            self.endpoint_volume
                .SetMasterVolumeLevelScalar(level, std::ptr::null())?;
        }
        Ok(())
    }

    fn is_muted(&self) -> Result<bool, AudioError> {
        unsafe { Ok(self.endpoint_volume.GetMute()?.as_bool()) }
    }

    fn set_mute(&self, muted: bool) -> Result<(), AudioError> {
        unsafe {
            self.endpoint_volume.SetMute(muted, std::ptr::null())?;
        }
        Ok(())
    }
}
