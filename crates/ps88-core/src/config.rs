//! Configuration file support for ps88
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/ps88/config.toml`
//! - macOS: `~/Library/Application Support/ps88/config.toml`
//! - Windows: `%APPDATA%\ps88\config.toml`

use crate::error::{Error, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Script engine limits
    pub engine: EngineSettings,
    /// Audio block settings
    pub audio: AudioSettings,
    /// Session behavior
    pub session: SessionSettings,
}

impl Config {
    /// Load configuration from the default config file location
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Err(Error::Config(format!("Config file not found at {:?}", path)))
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return default if not found
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// Save configuration to the default config file location
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        project_dirs()
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
    }

    /// Directory used for persisted source text and save data.
    ///
    /// `session.storage_dir` wins when set, otherwise the platform data dir.
    pub fn storage_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.session.storage_dir {
            return Ok(dir.clone());
        }
        project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| Error::Config("Could not determine data directory".to_string()))
    }

    /// Reject values the host cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(Error::Config("audio.sample_rate must be positive".to_string()));
        }
        if self.audio.block_size == 0 {
            return Err(Error::Config("audio.block_size must be positive".to_string()));
        }
        if self.audio.channels == 0 {
            return Err(Error::Config("audio.channels must be positive".to_string()));
        }
        if !self.audio.bpm.is_finite() || self.audio.bpm < 0.0 {
            return Err(Error::Config("audio.bpm must be a non-negative number".to_string()));
        }
        Ok(())
    }

    /// Create a default config file with comments
    pub fn create_default_config_file() -> Result<PathBuf> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = r#"# ps88 configuration file

[engine]
# Maximum script operations per build or callback (0 = unlimited)
max_operations = 0

# Maximum function call nesting
max_call_levels = 256

# Maximum expression nesting
max_expr_depth = 256

# MIDI events queued between audio blocks before new ones are dropped
max_pending_midi = 1024

[audio]
sample_rate = 48000

# Samples per channel per block
block_size = 128

channels = 2

# Tempo reported to scripts
bpm = 120.0

[session]
# Quiet time after the last edit before a hot reload (milliseconds)
reload_debounce_ms = 1000

# Size of the draw surface
draw_width = 640
draw_height = 480

# Interval between draw requests (milliseconds)
frame_interval_ms = 33

# Where source text and save data are kept (defaults to the platform data dir)
# storage_dir = "/path/to/dir"
"#;

        fs::write(&path, content)?;
        Ok(path)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "ps88")
}

/// Limits applied to the script engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Operation budget per build or callback (0 = unlimited)
    pub max_operations: u64,
    /// Maximum function call nesting
    pub max_call_levels: usize,
    /// Maximum expression nesting
    pub max_expr_depth: usize,
    /// Capacity of the pending MIDI queue
    pub max_pending_midi: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_operations: 0,
            max_call_levels: 256,
            max_expr_depth: 256,
            max_pending_midi: 1024,
        }
    }
}

/// Audio block shape and transport defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub block_size: usize,
    pub channels: usize,
    pub bpm: f64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 128,
            channels: 2,
            bpm: 120.0,
        }
    }
}

impl AudioSettings {
    /// Wall-clock duration of one block.
    pub fn block_period(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / self.sample_rate.max(1) as f64)
    }
}

/// Session-level behavior of the orchestrator and CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub reload_debounce_ms: u64,
    pub draw_width: u32,
    pub draw_height: u32,
    pub frame_interval_ms: u64,
    pub storage_dir: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            reload_debounce_ms: 1000,
            draw_width: 640,
            draw_height: 480,
            frame_interval_ms: 33,
            storage_dir: None,
        }
    }
}

impl SessionSettings {
    pub fn reload_debounce(&self) -> Duration {
        Duration::from_millis(self.reload_debounce_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.audio.block_size, 128);
        assert_eq!(config.audio.bpm, 120.0);
        assert_eq!(config.session.reload_debounce_ms, 1000);
        assert_eq!(config.engine.max_operations, 0);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("[audio]\nblock_size = 256\n").unwrap();
        assert_eq!(config.audio.block_size, 256);
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.session, SessionSettings::default());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.audio.channels = 1;
        config.session.storage_dir = Some(dir.path().to_path_buf());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.storage_dir().unwrap(), dir.path());
    }

    #[test]
    fn test_validate_rejects_zero_block() {
        let mut config = Config::default();
        config.audio.block_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_block_period() {
        let settings = AudioSettings {
            sample_rate: 1000,
            block_size: 500,
            ..AudioSettings::default()
        };
        assert_eq!(settings.block_period(), Duration::from_millis(500));
    }
}
