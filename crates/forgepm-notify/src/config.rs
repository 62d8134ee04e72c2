//! Configuration types for notification system

use crate::error::{NotifyError, Result};
use crate::event::EVENT_TYPES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Get the default notification config path
pub fn notify_config_path() -> PathBuf {
    forgepm_core::forgepm_home().join(forgepm_core::NOTIFY_FILE)
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifyConfig {
    /// Discord webhook settings
    pub discord: Option<DiscordConfig>,

    /// Events to notify on (empty = all events)
    #[serde(default)]
    pub events: Vec<String>,
}

impl NotifyConfig {
    /// Load config from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(&notify_config_path())
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Notify config not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: NotifyConfig = toml::from_str(&content)?;
        config.validate_events()?;

        debug!("Loaded notify config from {:?}", path);
        Ok(config)
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&notify_config_path())
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, &content)?;

        // The webhook URL is a bearer secret
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
                tracing::warn!("Failed to set config file permissions: {}", e);
            }
        }

        info!("Saved notify config to {:?}", path);
        Ok(())
    }

    /// Check if any notification channel is configured
    pub fn is_configured(&self) -> bool {
        self.discord
            .as_ref()
            .map(|d| !d.webhook_url.is_empty())
            .unwrap_or(false)
    }

    pub fn set_discord(&mut self, webhook_url: String) {
        self.discord = Some(DiscordConfig {
            webhook_url,
            username: None,
        });
    }

    pub fn remove_discord(&mut self) {
        self.discord = None;
    }

    pub fn set_events(&mut self, events: Vec<String>) {
        self.events = events;
    }

    /// Validate event names
    pub fn validate_events(&self) -> Result<()> {
        for event in &self.events {
            if !EVENT_TYPES.contains(&event.as_str()) {
                return Err(NotifyError::config(format!(
                    "Invalid event type '{}'. Valid types: {:?}",
                    event, EVENT_TYPES
                )));
            }
        }
        Ok(())
    }
}

/// Discord webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub webhook_url: String,

    /// Overrides the webhook's display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}
