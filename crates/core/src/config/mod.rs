use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::playback::DEFAULT_FPS;
use crate::{Color, PlayerError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub display: DisplayConfig,
    pub playback: PlaybackConfig,
    pub leds: LedConfig,
    pub audio: AudioConfig,
    pub library: LibraryConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|err| {
            PlayerError::config(format!("config file {}: {err}", path.display()))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.playback.fps == 0 {
            return Err(PlayerError::config("playback.fps must be positive"));
        }
        if self.display.width == 0 || self.display.height == 0 {
            return Err(PlayerError::config("display size must be positive"));
        }
        if self.audio.poll_interval_ms == 0 {
            return Err(PlayerError::config("audio.poll_interval_ms must be positive"));
        }
        Ok(())
    }
}

/// Control channel listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .map_err(|err| PlayerError::config(format!("bind address `{}`: {err}", self.bind)))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 9999,
        }
    }
}

/// Target panel geometry. Frames are resized to this size when loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    /// Framebuffer device the frames are written to, e.g. `/dev/fb1`.
    pub device: Option<PathBuf>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 160,
            height: 128,
            device: None,
        }
    }
}

/// Defaults applied to commands that omit an argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub image_dir: PathBuf,
    pub fps: u32,
    pub audio: PathBuf,
    pub color: Color,
    pub timeline: Option<PathBuf>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("."),
            fps: DEFAULT_FPS,
            audio: PathBuf::from("audio.wav"),
            color: Color::WHITE,
            timeline: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedConfig {
    pub count: usize,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self { count: 4 }
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub poll_interval_ms: u64,
}

impl AudioConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

/// Where converted videos are stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub root: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("videos"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = AppConfig::from_json(
            r##"{ "server": { "port": 7000 }, "playback": { "color": "#102030", "fps": 24 } }"##,
        )
        .unwrap();

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.playback.fps, 24);
        assert_eq!(config.playback.color, Color::new(0x10, 0x20, 0x30));
        assert_eq!(config.display.width, 160);
        assert_eq!(config.leds.count, 4);
        assert_eq!(config.audio.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn default_frame_rate_matches_playback() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config.playback.fps, DEFAULT_FPS);
        assert_eq!(DEFAULT_FPS, 10);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(AppConfig::from_json(r#"{ "playback": { "fps": 0 } }"#).is_err());
        assert!(AppConfig::from_json(r#"{ "playback": { "color": "red" } }"#).is_err());
        assert!(AppConfig::from_json("not json").is_err());
    }

    #[test]
    fn builds_listener_address() {
        let server = ServerConfig::default();
        assert_eq!(server.address().unwrap().port(), 9999);

        let bad = ServerConfig {
            bind: "not an ip".to_string(),
            port: 1,
        };
        assert!(matches!(bad.address(), Err(PlayerError::Config(_))));
    }

    #[test]
    fn reads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.json");
        fs::write(&path, r#"{ "leds": { "count": 8 } }"#).unwrap();

        assert_eq!(AppConfig::from_file(&path).unwrap().leds.count, 8);
        assert!(AppConfig::from_file(&dir.path().join("missing.json")).is_err());
    }
}
