//! Audio device enumeration and the device/sample-rate configuration the
//! control plane exposes via `settings.json` (see stompbox-core::config).
//!
//! Device discovery goes through `cpal`'s cross-platform enumeration rather
//! than a platform-specific shell-out, since this host targets Linux/ALSA
//! single-board computers but shouldn't hard-code that assumption.

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

/// Sample rates the ALSA-like audio interface is required to support.
pub const SUPPORTED_SAMPLE_RATES: [u32; 4] = [44100, 48000, 88200, 96000];

/// Prefix recognized by [`crate::driver::open`] as a request for the dummy
/// driver rather than a real device.
pub const DUMMY_DEVICE_PREFIX: &str = "__DUMMY_AUDIO__";

/// An audio device discovered on the system.
#[derive(Debug, Clone)]
pub struct AudioDevice {
    pub name: String,
    pub input_channels: u16,
    pub output_channels: u16,
    pub is_default_input: bool,
    pub is_default_output: bool,
}

/// User-selected device and stream configuration, persisted under
/// `settings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDeviceConfig {
    /// `None` = system default device; a name prefixed with
    /// [`DUMMY_DEVICE_PREFIX`] selects the synthetic dummy driver.
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: u32,
    pub period_frames: u32,
    pub period_count: u32,
}

impl Default for AudioDeviceConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            sample_rate: 48000,
            period_frames: 256,
            period_count: 3,
        }
    }
}

impl AudioDeviceConfig {
    pub fn is_dummy(&self) -> bool {
        self.output_device
            .as_deref()
            .map(|n| n.starts_with(DUMMY_DEVICE_PREFIX))
            .unwrap_or(false)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(format!(
                "unsupported sample rate {} (expected one of {:?})",
                self.sample_rate, SUPPORTED_SAMPLE_RATES
            ));
        }
        if self.period_frames == 0 || self.period_count == 0 {
            return Err("period_frames and period_count must be nonzero".into());
        }
        Ok(())
    }
}

/// Enumerate duplex-capable devices visible to the default `cpal` host.
/// Never panics; a host/device enumeration failure yields an empty list so
/// callers can still fall back to the dummy driver.
pub fn enumerate_devices() -> Vec<AudioDevice> {
    let host = cpal::default_host();
    let default_in = host.default_input_device().and_then(|d| d.name().ok());
    let default_out = host.default_output_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    let Ok(cpal_devices) = host.devices() else {
        return devices;
    };

    for device in cpal_devices {
        let Ok(name) = device.name() else { continue };
        let input_channels = device
            .default_input_config()
            .map(|c| c.channels())
            .unwrap_or(0);
        let output_channels = device
            .default_output_config()
            .map(|c| c.channels())
            .unwrap_or(0);
        if input_channels == 0 && output_channels == 0 {
            continue;
        }
        devices.push(AudioDevice {
            is_default_input: default_in.as_deref() == Some(name.as_str()),
            is_default_output: default_out.as_deref() == Some(name.as_str()),
            name,
            input_channels,
            output_channels,
        });
    }
    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_a_supported_rate() {
        let cfg = AudioDeviceConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn unsupported_rate_is_rejected() {
        let mut cfg = AudioDeviceConfig::default();
        cfg.sample_rate = 22050;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn dummy_prefix_is_recognized() {
        let cfg = AudioDeviceConfig {
            output_device: Some(format!("{DUMMY_DEVICE_PREFIX}default")),
            ..AudioDeviceConfig::default()
        };
        assert!(cfg.is_dummy());
    }
}
