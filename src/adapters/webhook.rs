//! Webhook notifications
//!
//! Posts notifications either as the raw JSON notification or as a Feishu
//! (Lark) bot text message.

use crate::error::{Result, StrategosError};
use crate::services::{Notification, NotificationLevel, Notifier};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Payload shape expected by the receiving endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookFormat {
    #[default]
    Json,
    Feishu,
}

#[derive(Serialize)]
struct FeishuMessage {
    msg_type: &'static str,
    content: FeishuContent,
}

#[derive(Serialize)]
struct FeishuContent {
    text: String,
}

/// Webhook notification client
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
    format: WebhookFormat,
}

impl WebhookNotifier {
    pub fn new(webhook_url: String, format: WebhookFormat, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            webhook_url,
            format,
        })
    }

    fn emoji(level: NotificationLevel) -> &'static str {
        match level {
            NotificationLevel::Info => "\u{2139}\u{fe0f}",
            NotificationLevel::Warning => "\u{26a0}\u{fe0f}",
            NotificationLevel::Error => "\u{274c}",
            NotificationLevel::Critical => "\u{1f6a8}",
        }
    }

    /// Text body for chat-style receivers
    fn format_text(n: &Notification) -> String {
        format!(
            "{} {}\n{}\n{}",
            Self::emoji(n.level),
            n.title,
            n.message,
            n.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let request = self.client.post(&self.webhook_url);
        let request = match self.format {
            WebhookFormat::Json => request.json(notification),
            WebhookFormat::Feishu => request.json(&FeishuMessage {
                msg_type: "text",
                content: FeishuContent {
                    text: Self::format_text(notification),
                },
            }),
        };

        let resp = request.send().await?;
        if resp.status().is_success() {
            debug!(title = %notification.title, "Webhook notification sent");
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(StrategosError::Internal(format!(
                "webhook returned HTTP {status}: {body}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::NotificationEvent;

    #[test]
    fn test_text_format_carries_title_and_message() {
        let n = Notification::from(NotificationEvent::TickFailed {
            reason: "store unavailable".into(),
        });
        let text = WebhookNotifier::format_text(&n);
        assert!(text.contains("Engine tick failed"));
        assert!(text.contains("store unavailable"));
        assert!(text.starts_with("\u{274c}"));
    }

    #[test]
    fn test_format_parses_from_config() {
        let f: WebhookFormat = serde_json::from_str("\"feishu\"").unwrap();
        assert_eq!(f, WebhookFormat::Feishu);
    }
}
