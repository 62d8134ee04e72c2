//! Global settings and game-server config access
//!
//! Settings are read from `settings.json` (or a `.toml` file when pointed at
//! one). The game config is the server's own JSON file; only the fields needed
//! to reach the remote console and to switch scenarios are interpreted, every
//! other field is carried through untouched.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::store::write_atomic;

/// Supported settings file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Detect format from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(ConfigFormat::Toml),
            "json" => Some(ConfigFormat::Json),
            _ => None,
        }
    }

    /// Detect format from file path
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

/// Global application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Directory holding the server executable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addons_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles_path: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub watchdog_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_path: None,
            addons_path: None,
            profiles_path: None,
            watchdog_enabled: true,
        }
    }
}

impl Settings {
    /// Load settings; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let format = ConfigFormat::from_path(path).ok_or_else(|| {
            Error::ConfigError(format!(
                "Unsupported settings file extension: {}. Expected .json or .toml",
                path.display()
            ))
        })?;

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, format)
    }

    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        match format {
            ConfigFormat::Toml => Ok(toml::from_str(content)?),
            ConfigFormat::Json => Ok(serde_json::from_str(content)?),
        }
    }

    pub fn server_dir(&self) -> Option<&Path> {
        self.server_path.as_deref().filter(|p| !p.as_os_str().is_empty())
    }

    pub fn addons_dir(&self) -> Option<&Path> {
        self.addons_path.as_deref().filter(|p| !p.as_os_str().is_empty())
    }

    pub fn profiles_dir(&self) -> Option<&Path> {
        self.profiles_path.as_deref().filter(|p| !p.as_os_str().is_empty())
    }
}

/// Source of the current settings snapshot
pub trait SettingsProvider: Send + Sync {
    fn get(&self) -> Settings;
}

impl SettingsProvider for Settings {
    fn get(&self) -> Settings {
        self.clone()
    }
}

/// File-backed settings provider
pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<Settings>,
}

impl SettingsStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let current = Settings::load(&path)?;
        Ok(Self {
            path,
            current: RwLock::new(current),
        })
    }

    /// Replace and persist the settings
    pub fn set(&self, settings: Settings) -> Result<()> {
        let data = serde_json::to_vec_pretty(&settings)?;
        write_atomic(&self.path, &data)?;
        *self.current.write() = settings;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsProvider for SettingsStore {
    fn get(&self) -> Settings {
        self.current.read().clone()
    }
}

/// Address and secret of an instance's remote console
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconEndpoint {
    pub address: String,
    pub password: String,
}

/// A game-server JSON config kept as a generic document
#[derive(Debug, Clone)]
pub struct GameConfig {
    path: PathBuf,
    doc: Value,
}

impl GameConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read config file ({}): {}", path.display(), e))
        })?;
        let doc: Value = serde_json::from_str(&content).map_err(|e| {
            Error::config(format!("failed to parse config file ({}): {}", path.display(), e))
        })?;
        if !doc.is_object() {
            return Err(Error::config(format!(
                "config file {} is not a JSON object",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            doc,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Console port and password, from `rcon` or the legacy `game` keys
    pub fn rcon_endpoint(&self) -> Result<RconEndpoint> {
        let rcon = self.doc.get("rcon");
        let game = self.doc.get("game");

        let port = rcon
            .and_then(|r| r.get("port"))
            .and_then(Value::as_u64)
            .or_else(|| game.and_then(|g| g.get("rconPort")).and_then(Value::as_u64))
            .filter(|p| *p > 0 && *p <= u16::MAX as u64)
            .ok_or_else(|| Error::RconNotConfigured("RCON port not set in config".to_string()))?;

        let password = rcon
            .and_then(|r| r.get("password"))
            .and_then(Value::as_str)
            .or_else(|| game.and_then(|g| g.get("rconPassword")).and_then(Value::as_str))
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                Error::RconNotConfigured("RCON password not set in config".to_string())
            })?;

        Ok(RconEndpoint {
            address: format!("127.0.0.1:{}", port),
            password: password.to_string(),
        })
    }

    pub fn scenario_id(&self) -> Option<&str> {
        self.doc
            .get("game")
            .and_then(|g| g.get("scenarioId"))
            .and_then(Value::as_str)
    }

    /// Set `game.scenarioId`, creating the `game` section if needed
    pub fn set_scenario_id(&mut self, scenario_id: &str) -> Result<()> {
        let root = self
            .doc
            .as_object_mut()
            .ok_or_else(|| Error::config("config root is not an object"))?;
        let game = root
            .entry("game")
            .or_insert_with(|| Value::Object(Map::new()));
        let game = game
            .as_object_mut()
            .ok_or_else(|| Error::config("config 'game' section is not an object"))?;
        game.insert("scenarioId".to_string(), Value::String(scenario_id.to_string()));
        Ok(())
    }

    /// Write the document back in place
    pub fn save(&self) -> Result<()> {
        let data = serde_json::to_vec_pretty(&self.doc)?;
        write_atomic(&self.path, &data).map_err(|e| {
            Error::config(format!(
                "failed to write config file ({}): {}",
                self.path.display(),
                e
            ))
        })
    }
}
