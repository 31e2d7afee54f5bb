//! Configuration for the DPU replay driver
//!
//! Loads configuration from TOML file at `~/.config/dpu/config.toml`
//! Auto-generates default config file on first run if missing.

use anyhow::{Context, Result};
use dpu_core::device::DeconDt;
use dpu_core::window::PanelInfo;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub panel: PanelInfo,
    pub decon: DeconDt,
    pub protection: ProtectionConfig,
    pub debug: DebugConfig,
    pub replay: ReplayConfig,
}

impl Config {
    /// Load configuration from `path`, or from the default location.
    ///
    /// A missing file at the default location is created with defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            if path.is_some() {
                anyhow::bail!("Config file not found at {:?}", config_path);
            }
            info!("Config file not found at {:?}, using defaults", config_path);
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&content)
            .context("Failed to parse config file")?;

        info!("Configuration loaded from {:?}", config_path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get the path to the config file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("dpu");

        Ok(config_dir.join("config.toml"))
    }

    /// Save default configuration to file
    fn save_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string)
            .context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }
}

/// Simulated secure monitor behaviour
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    /// Secure ids whose calls report failure
    pub failing_ids: Vec<u32>,
    /// Status code returned for a failing call
    pub failure_code: i32,
}

/// Diagnostics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Stop the replay when the DMA attach counters look like a leak
    pub leak_is_fatal: bool,
    /// Frames assumed to be queued behind the current one
    pub remaining_frames: u32,
    /// Mapped readback buffers that make a leak report include readback counts
    pub readback_diff: u32,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            leak_is_fatal: true,
            remaining_frames: 1,
            readback_diff: 1,
        }
    }
}

/// Replay pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Wait one panel frame period between frames
    pub paced: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { paced: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpu_core::window::OutputType;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [panel]
            xres = 1440
            yres = 3200
            fps = 120

            [decon]
            out_type = "writeback"
            wb_win = 3

            [protection]
            failing_ids = [4]
            failure_code = -1

            [debug]
            readback_diff = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.panel.xres, 1440);
        assert_eq!(config.panel.fps, 120);
        assert_eq!(config.decon.out_type, OutputType::Writeback);
        assert_eq!(config.decon.wb_win, 3);
        assert_eq!(config.decon.max_win, DeconDt::default().max_win);
        assert_eq!(config.protection.failing_ids, vec![4]);
        assert!(config.debug.leak_is_fatal);
        assert_eq!(config.debug.remaining_frames, 1);
        assert_eq!(config.debug.readback_diff, 3);
        assert!(config.replay.paced);
    }

    #[test]
    fn test_default_config_round_trips() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.panel, PanelInfo::default());
        assert_eq!(back.decon.dpp_cnt, DeconDt::default().dpp_cnt);
    }
}
