//! Configuration loading and option merging.
//!
//! `svgplay.toml` (working directory first, then the platform config
//! dir) provides defaults; CLI flags parsed by the binary override them
//! field by field through [`PlayerOptions`]. Unknown TOML fields are
//! ignored so the file format can grow without breaking older builds.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use core_anim::RepeatMode;
use serde::Deserialize;
use tracing::info;

pub const DEFAULT_RENDER_SIZE: (u32, u32) = (800, 600);
const CONFIG_FILE_NAME: &str = "svgplay.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowMode {
    #[default]
    Windowed,
    Fullscreen,
    Maximized,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct WindowConfig {
    #[serde(default)]
    pub mode: WindowMode,
    /// `[x, y]` initial position hint.
    #[serde(default)]
    pub pos: Option<[i32; 2]>,
    /// `[w, h]` initial size.
    #[serde(default)]
    pub size: Option<[u32; 2]>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PlaybackFileConfig {
    #[serde(default)]
    pub rate: Option<f64>,
    /// `once | loop | pingpong | count:<k>`.
    #[serde(default)]
    pub repeat: Option<String>,
    #[serde(default)]
    pub sequential: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PreBufferFileConfig {
    #[serde(default = "PreBufferFileConfig::default_enabled")]
    pub enabled: bool,
}

impl Default for PreBufferFileConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
        }
    }
}

impl PreBufferFileConfig {
    const fn default_enabled() -> bool {
        true
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct RemoteFileConfig {
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub playback: PlaybackFileConfig,
    #[serde(default)]
    pub prebuffer: PreBufferFileConfig,
    #[serde(default)]
    pub remote: RemoteFileConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Original file text, when one was found.
    pub raw: Option<String>,
    pub file: ConfigFile,
}

/// Best-effort config path: working directory first, then the platform
/// config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("svgplay").join(CONFIG_FILE_NAME);
    }
    PathBuf::from(CONFIG_FILE_NAME)
}

/// Load from an explicit path or the discovered location. A missing
/// file yields defaults; a malformed file is an error.
pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let file: ConfigFile =
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    info!(target: "config", path = %path.display(), "config_loaded");
    Ok(Config {
        raw: Some(raw),
        file,
    })
}

/// Fully merged options the frontend consumes. Built from a config file
/// and then overridden by CLI flags in the binary.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerOptions {
    pub window_mode: WindowMode,
    pub position: Option<(i32, i32)>,
    pub size: (u32, u32),
    pub sequential: bool,
    /// Exit after this many seconds of playback.
    pub duration_limit: Option<f64>,
    /// Suppress stdout commentary; emit one JSON statistics record on
    /// exit.
    pub json_stats: bool,
    /// Capture frame #1 to this PPM path.
    pub screenshot: Option<PathBuf>,
    pub remote_port: Option<u16>,
    pub rate: f64,
    pub repeat: Option<RepeatMode>,
    pub prebuffer: bool,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            window_mode: WindowMode::default(),
            position: None,
            size: DEFAULT_RENDER_SIZE,
            sequential: false,
            duration_limit: None,
            json_stats: false,
            screenshot: None,
            remote_port: None,
            rate: 1.0,
            repeat: None,
            prebuffer: true,
        }
    }
}

impl PlayerOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        let file = &config.file;
        let repeat = match &file.playback.repeat {
            None => None,
            Some(raw) => Some(
                RepeatMode::from_str(raw)
                    .with_context(|| format!("config playback.repeat = `{raw}`"))?,
            ),
        };
        Ok(Self {
            window_mode: file.window.mode,
            position: file.window.pos.map(|[x, y]| (x, y)),
            size: file
                .window
                .size
                .map(|[w, h]| (w, h))
                .unwrap_or(DEFAULT_RENDER_SIZE),
            sequential: file.playback.sequential,
            rate: file.playback.rate.unwrap_or(1.0),
            repeat,
            prebuffer: file.prebuffer.enabled,
            remote_port: file.remote.port,
            ..Self::default()
        })
    }
}
