use std::path::PathBuf;

use serde::Deserialize;
use stompbox_audio::devices::AudioDeviceConfig;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    audio_device: AudioDeviceFile,
    #[serde(default)]
    control_plane: ControlPlaneConfig,
    log_level: Option<String>,
}

#[derive(Deserialize, Default)]
struct StorageConfig {
    data_root: Option<String>,
}

/// Mirrors `stompbox_audio::devices::AudioDeviceConfig` field-for-field,
/// but with everything optional so a user file can override just one
/// field. Empty strings in the embedded default mean "use the system
/// default device", matching `AudioDeviceConfig`'s `None`.
#[derive(Deserialize, Default)]
struct AudioDeviceFile {
    input_device: Option<String>,
    output_device: Option<String>,
    sample_rate: Option<u32>,
    period_frames: Option<u32>,
    period_count: Option<u32>,
}

#[derive(Deserialize, Default)]
struct ControlPlaneConfig {
    bind_address: Option<String>,
    port: Option<u16>,
}

pub struct Config {
    storage: StorageConfig,
    audio_device: AudioDeviceFile,
    control_plane: ControlPlaneConfig,
    log_level: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        let mut base: ConfigFile =
            toml::from_str(DEFAULT_CONFIG).expect("failed to parse embedded config.toml");

        if let Some(path) = user_config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                        Ok(user) => {
                            merge_storage(&mut base.storage, user.storage);
                            merge_audio_device(&mut base.audio_device, user.audio_device);
                            merge_control_plane(&mut base.control_plane, user.control_plane);
                            if user.log_level.is_some() {
                                base.log_level = user.log_level;
                            }
                        }
                        Err(e) => {
                            log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                        }
                    },
                    Err(e) => {
                        log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
                    }
                }
            }
        }

        Config {
            storage: base.storage,
            audio_device: base.audio_device,
            control_plane: base.control_plane,
            log_level: base.log_level,
        }
    }

    /// Root directory Storage (C6) persists banks, presets, and uploads
    /// under. `~` is expanded against `dirs::home_dir()`.
    pub fn data_root(&self) -> PathBuf {
        let raw = self.storage.data_root.as_deref().unwrap_or("~/.local/share/stompbox");
        expand_tilde(raw)
    }

    pub fn audio_device(&self) -> AudioDeviceConfig {
        let fallback = AudioDeviceConfig::default();
        AudioDeviceConfig {
            input_device: non_empty(self.audio_device.input_device.clone()).or(fallback.input_device),
            output_device: non_empty(self.audio_device.output_device.clone()).or(fallback.output_device),
            sample_rate: self.audio_device.sample_rate.unwrap_or(fallback.sample_rate),
            period_frames: self.audio_device.period_frames.unwrap_or(fallback.period_frames),
            period_count: self.audio_device.period_count.unwrap_or(fallback.period_count),
        }
    }

    pub fn control_plane_bind_address(&self) -> String {
        self.control_plane.bind_address.clone().unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn control_plane_port(&self) -> u16 {
        self.control_plane.port.unwrap_or(8080)
    }

    /// Log verbosity, overridable by the `--verbose` CLI flag
    ///; defaults to `Warn` if unset or unrecognized.
    pub fn log_level(&self) -> log::LevelFilter {
        self.log_level
            .as_deref()
            .and_then(parse_log_level)
            .unwrap_or(log::LevelFilter::Warn)
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

fn expand_tilde(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("stompbox").join("config.toml"))
}

fn merge_storage(base: &mut StorageConfig, user: StorageConfig) {
    if user.data_root.is_some() {
        base.data_root = user.data_root;
    }
}

fn merge_audio_device(base: &mut AudioDeviceFile, user: AudioDeviceFile) {
    if user.input_device.is_some() {
        base.input_device = user.input_device;
    }
    if user.output_device.is_some() {
        base.output_device = user.output_device;
    }
    if user.sample_rate.is_some() {
        base.sample_rate = user.sample_rate;
    }
    if user.period_frames.is_some() {
        base.period_frames = user.period_frames;
    }
    if user.period_count.is_some() {
        base.period_count = user.period_count;
    }
}

fn merge_control_plane(base: &mut ControlPlaneConfig, user: ControlPlaneConfig) {
    if user.bind_address.is_some() {
        base.bind_address = user.bind_address;
    }
    if user.port.is_some() {
        base.port = user.port;
    }
}

fn parse_log_level(s: &str) -> Option<log::LevelFilter> {
    match s.to_lowercase().as_str() {
        "off" => Some(log::LevelFilter::Off),
        "error" => Some(log::LevelFilter::Error),
        "warn" => Some(log::LevelFilter::Warn),
        "info" => Some(log::LevelFilter::Info),
        "debug" => Some(log::LevelFilter::Debug),
        "trace" => Some(log::LevelFilter::Trace),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_embedded_config() {
        let config = Config::load();
        assert_eq!(config.control_plane_port(), 8080);
        assert_eq!(config.control_plane_bind_address(), "0.0.0.0");
        assert_eq!(config.log_level(), log::LevelFilter::Warn);
        let audio = config.audio_device();
        assert_eq!(audio.sample_rate, 48000);
        assert_eq!(audio.period_frames, 256);
        assert!(audio.input_device.is_none());
    }

    #[test]
    fn data_root_expands_tilde() {
        let config = Config::load();
        let root = config.data_root();
        assert!(root.is_absolute() || !root.starts_with("~"));
    }

    #[test]
    fn parse_log_level_is_case_insensitive() {
        assert_eq!(parse_log_level("DEBUG"), Some(log::LevelFilter::Debug));
        assert_eq!(parse_log_level("bogus"), None);
    }
}
