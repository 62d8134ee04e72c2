//! Discord webhook backend

use crate::error::{NotifyError, Result};
use crate::event::Severity;
use crate::Notifier;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error};

const FOOTER: &str = "forgepm";

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    embeds: Vec<Embed<'a>>,
}

#[derive(Debug, Serialize)]
struct Embed<'a> {
    title: &'a str,
    description: &'a str,
    color: u32,
    timestamp: String,
    footer: Footer<'a>,
}

#[derive(Debug, Serialize)]
struct Footer<'a> {
    text: &'a str,
}

/// Posts one embed per notification to a webhook URL
pub struct DiscordNotifier {
    webhook_url: String,
    username: Option<String>,
    client: reqwest::Client,
}

impl DiscordNotifier {
    pub fn new(webhook_url: String, username: Option<String>) -> Self {
        Self::with_client(webhook_url, username, reqwest::Client::new())
    }

    /// Create with a custom HTTP client (useful for testing)
    pub fn with_client(webhook_url: String, username: Option<String>, client: reqwest::Client) -> Self {
        Self {
            webhook_url,
            username,
            client,
        }
    }

    fn payload<'a>(&'a self, title: &'a str, body: &'a str, severity: Severity) -> WebhookPayload<'a> {
        WebhookPayload {
            username: self.username.as_deref(),
            embeds: vec![Embed {
                title,
                description: body,
                color: severity.color(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                footer: Footer { text: FOOTER },
            }],
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, title: &str, body: &str, severity: Severity) -> Result<()> {
        if self.webhook_url.is_empty() {
            return Err(NotifyError::NotConfigured);
        }

        debug!("Posting {} notification: {}", severity.as_str(), title);

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&self.payload(title, body, severity))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            error!("Webhook returned HTTP {}", status);
            Err(NotifyError::WebhookStatus(status.as_u16()))
        }
    }

    fn is_configured(&self) -> bool {
        !self.webhook_url.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// One-shot HTTP endpoint that hands back the request body
    async fn spawn_endpoint(status_line: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut chunk = [0u8; 1024];

            let body = loop {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break String::new();
                }
                raw.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= split + 4 + length {
                        break text[split + 4..split + 4 + length].to_string();
                    }
                }
            };

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status_line
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = tx.send(body);
        });

        (url, rx)
    }

    #[test]
    fn test_notifier_not_configured() {
        let notifier = DiscordNotifier::new(String::new(), None);
        assert!(!notifier.is_configured());
        assert!(DiscordNotifier::new("http://x".to_string(), None).is_configured());
    }

    #[tokio::test]
    async fn test_send_not_configured() {
        let notifier = DiscordNotifier::new(String::new(), None);
        let result = notifier.send("t", "b", Severity::Info).await;
        assert!(matches!(result, Err(NotifyError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_send_posts_embed() {
        let (url, body) = spawn_endpoint("204 No Content").await;
        let notifier = DiscordNotifier::new(url, Some("Bot".to_string()));

        notifier
            .send("Server Started", "Server **EU** is now online.", Severity::Success)
            .await
            .unwrap();

        let json: serde_json::Value = serde_json::from_str(&body.await.unwrap()).unwrap();
        assert_eq!(json["username"], "Bot");
        let embed = &json["embeds"][0];
        assert_eq!(embed["title"], "Server Started");
        assert_eq!(embed["color"], 0x00FF00);
        assert_eq!(embed["footer"]["text"], FOOTER);
        assert!(embed["timestamp"].as_str().unwrap().contains('T'));
    }

    #[tokio::test]
    async fn test_send_reports_http_status() {
        let (url, _body) = spawn_endpoint("400 Bad Request").await;
        let notifier = DiscordNotifier::new(url, None);
        let result = notifier.send("t", "b", Severity::Error).await;
        assert!(matches!(result, Err(NotifyError::WebhookStatus(400))));
    }
}
