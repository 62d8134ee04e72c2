//! Mock implementations for testing

use crate::error::{NotifyError, Result};
use crate::event::{InstanceEvent, Severity};
use crate::Notifier;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A mock notifier for testing that records all sent messages
#[derive(Default)]
pub struct MockNotifier {
    /// (title, body, severity) of every delivered message
    messages: Arc<Mutex<Vec<(String, String, Severity)>>>,
    events: Arc<Mutex<Vec<InstanceEvent>>>,
    call_count: AtomicUsize,
    should_fail: bool,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock notifier that always fails
    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub async fn messages(&self) -> Vec<(String, String, Severity)> {
        self.messages.lock().await.clone()
    }

    pub async fn events(&self) -> Vec<InstanceEvent> {
        self.events.lock().await.clone()
    }

    /// Check if any message title or body contains the text
    pub async fn was_message_sent(&self, text: &str) -> bool {
        self.messages
            .lock()
            .await
            .iter()
            .any(|(title, body, _)| title.contains(text) || body.contains(text))
    }

    pub async fn was_event_type_sent(&self, event_type: &str) -> bool {
        self.count_event_type(event_type).await > 0
    }

    pub async fn count_event_type(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    fn record_call(&self) -> Result<()> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(NotifyError::WebhookStatus(500));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, title: &str, body: &str, severity: Severity) -> Result<()> {
        self.record_call()?;
        self.messages
            .lock()
            .await
            .push((title.to_string(), body.to_string(), severity));
        Ok(())
    }

    async fn send_event(&self, event: &InstanceEvent) -> Result<()> {
        self.record_call()?;
        self.messages.lock().await.push((
            event.title().to_string(),
            event.format_message(),
            event.severity(),
        ));
        self.events.lock().await.push(event.clone());
        Ok(())
    }

    fn is_configured(&self) -> bool {
        true
    }
}
