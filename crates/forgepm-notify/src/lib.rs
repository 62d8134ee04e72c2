//! forgepm notification system
//!
//! Instance events are rendered as a title, body and severity and posted to
//! a Discord webhook. An unconfigured manager accepts and drops everything.

pub mod config;
mod discord;
mod error;
mod event;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use config::{notify_config_path, DiscordConfig, NotifyConfig};
pub use discord::DiscordNotifier;
pub use error::{NotifyError, Result};
pub use event::{InstanceEvent, Severity, EVENT_TYPES};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Trait for notification backends
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one message
    async fn send(&self, title: &str, body: &str, severity: Severity) -> Result<()>;

    /// Deliver a formatted instance event
    async fn send_event(&self, event: &InstanceEvent) -> Result<()> {
        self.send(event.title(), &event.format_message(), event.severity())
            .await
    }

    /// Check if the notifier is configured and ready
    fn is_configured(&self) -> bool;
}

/// Fire-and-forget delivery; failures are logged and dropped
pub fn dispatch(notifier: &Arc<dyn Notifier>, event: InstanceEvent) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(e) = notifier.send_event(&event).await {
            warn!(
                "Failed to deliver {} notification for {}: {}",
                event.event_type(),
                event.instance(),
                e
            );
        }
    });
}

/// Manager for all notification channels
pub struct NotificationManager {
    discord: Option<DiscordNotifier>,
    config: NotifyConfig,
}

impl NotificationManager {
    pub fn new(config: NotifyConfig) -> Self {
        let discord = config
            .discord
            .as_ref()
            .filter(|d| !d.webhook_url.is_empty())
            .map(|d| DiscordNotifier::new(d.webhook_url.clone(), d.username.clone()));

        Self { discord, config }
    }

    /// Create a notification manager by loading config from default path
    pub fn from_config_file() -> Result<Self> {
        Ok(Self::new(NotifyConfig::load()?))
    }

    /// Check if this event type should trigger a notification
    fn should_notify(&self, event: &InstanceEvent) -> bool {
        if self.config.events.is_empty() {
            return true;
        }

        let event_type = event.event_type();
        self.config.events.iter().any(|e| e == event_type)
    }
}

#[async_trait]
impl Notifier for NotificationManager {
    async fn send(&self, title: &str, body: &str, severity: Severity) -> Result<()> {
        match self.discord {
            Some(ref discord) => discord.send(title, body, severity).await,
            None => Ok(()),
        }
    }

    async fn send_event(&self, event: &InstanceEvent) -> Result<()> {
        if !self.should_notify(event) {
            return Ok(());
        }
        self.send(event.title(), &event.format_message(), event.severity())
            .await
    }

    fn is_configured(&self) -> bool {
        self.discord
            .as_ref()
            .map(|d| d.is_configured())
            .unwrap_or(false)
    }
}
