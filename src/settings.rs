use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::audio::{CaptureOptions, ChannelOptions};

/// Returns the path to the config file: `~/.config/xyscope/config.json`
fn config_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("xyscope");
    path.push("config.json");
    path
}

/// Startup configuration.
///
/// Read once at launch from the platform config directory; none of these
/// values change at runtime. Fields use `#[serde(default)]` so a config
/// file written by an older build keeps working.
#[derive(Serialize, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Config {
    /// Points retained by the live history buffer.
    pub history_capacity: usize,

    /// Axis inversion, applied during decode.
    pub invert_x: bool,
    pub invert_y: bool,

    /// Sleep between empty endpoint polls, in milliseconds.
    pub poll_interval_ms: u64,

    /// Render/cursor tick, in milliseconds.
    pub render_tick_ms: u64,

    /// Half-width of the file-playback window, in samples.
    pub window_half_width: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            history_capacity: 2000,
            invert_x: true,
            invert_y: true,
            poll_interval_ms: 1,
            render_tick_ms: 16,
            window_half_width: 750,
        }
    }
}

impl Config {
    /// Load the config from disk, falling back to defaults on any error.
    pub fn load() -> Self {
        let path = config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("failed to parse config ({e}), using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                log::info!("no config file found ({e}), using defaults");
                Self::default()
            }
        }
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            invert_x: self.invert_x,
            invert_y: self.invert_y,
        }
    }

    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            channel: self.channel_options(),
            poll_interval: std::time::Duration::from_millis(self.poll_interval_ms.clamp(1, 5)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{ "invert_x": false }"#).unwrap();
        assert!(!config.invert_x);
        assert!(config.invert_y);
        assert_eq!(config.history_capacity, 2000);
        assert_eq!(config.window_half_width, 750);
    }

    #[test]
    fn round_trips_through_json() {
        let config = Config {
            history_capacity: 512,
            render_tick_ms: 33,
            ..Config::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.history_capacity, 512);
        assert_eq!(back.render_tick_ms, 33);
    }

    #[test]
    fn poll_interval_is_bounded() {
        let config = Config {
            poll_interval_ms: 50,
            ..Config::default()
        };
        assert!(config.capture_options().poll_interval <= std::time::Duration::from_millis(5));
    }
}
