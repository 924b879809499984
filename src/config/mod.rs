// Configuration management for lyrebird
// Handles loading/saving settings, with sensible defaults when config is missing

use anyhow::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub music_directory: PathBuf,
    pub data_directory: PathBuf,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub covers: CoverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    pub extensions: Vec<String>,
    pub follow_links: bool,
    pub include_hidden: bool,
    pub max_file_size: u64, // bytes
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Past this many seconds, "previous" restarts the current track instead
    pub restart_threshold_seconds: f64,
    pub progress_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub skip_weight: f64,
    pub prior: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverConfig {
    pub tile_count: usize,
    pub size: u32, // pixels per side
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            extensions: ["mp3", "flac", "ogg", "oga", "mp4", "m4a", "aac", "wav"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            follow_links: true,
            include_hidden: false,
            max_file_size: 1_000_000_000,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            restart_threshold_seconds: 3.0,
            progress_interval_ms: 500,
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            skip_weight: 2.0,
            prior: 1.0,
        }
    }
}

impl Default for CoverConfig {
    fn default() -> Self {
        Self {
            tile_count: 4,
            size: 600,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lyrebird");

        Self {
            music_directory: dirs::audio_dir()
                .or_else(|| dirs::home_dir().map(|home| home.join("Music")))
                .unwrap_or_else(|| PathBuf::from("Music")),
            data_directory: data_dir,
            library: LibraryConfig::default(),
            playback: PlaybackConfig::default(),
            analytics: AnalyticsConfig::default(),
            covers: CoverConfig::default(),
        }
    }
}

impl Config {
    /// Config rooted in one directory: music under `music/`, state under `data/`.
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        Self {
            music_directory: root.join("music"),
            data_directory: root.join("data"),
            ..Self::default()
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_path()?)
    }

    pub fn load_from<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        if config_path.exists() {
            let content = fs::read_to_string(config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(config_path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(Self::config_path()?)
    }

    pub fn save_to<P: AsRef<Path>>(&self, config_path: P) -> Result<()> {
        let config_path = config_path.as_ref();

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(config_path, content)?;

        Ok(())
    }

    pub fn playlists_path(&self) -> PathBuf {
        self.data_directory.join("playlists.json")
    }

    pub fn favorites_path(&self) -> PathBuf {
        self.data_directory.join("favorites.json")
    }

    pub fn covers_directory(&self) -> PathBuf {
        self.data_directory.join("covers")
    }

    pub fn analytics_path(&self) -> PathBuf {
        self.data_directory.join("analytics.db")
    }

    pub fn log_directory(&self) -> PathBuf {
        self.data_directory.join("logs")
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join("lyrebird");

        Ok(config_dir.join("config.toml"))
    }
}
