//! Notification delivery backends
//!
//! Best-effort push of plain text to one fixed destination. Without Telegram
//! credentials the messages are written to the log instead.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::NotifyConfig;
use crate::error::{MonitorError, MonitorResult};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> MonitorResult<()>;

    /// Backend name for logs
    fn name(&self) -> &'static str {
        "custom"
    }
}

/// Telegram Bot API sender
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: &str, timeout: Duration) -> anyhow::Result<Self> {
        if bot_token.is_empty() {
            anyhow::bail!("Bot token is empty");
        }
        if chat_id.is_empty() {
            anyhow::bail!("Chat ID is empty");
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_base: TELEGRAM_API_BASE.to_string(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    /// Build from configuration; missing credentials are an error
    pub fn from_config(config: &NotifyConfig) -> MonitorResult<Self> {
        let (Some(token), Some(chat_id)) = (
            config.bot_token.as_deref().filter(|t| !t.is_empty()),
            config.chat_id.as_deref().filter(|c| !c.is_empty()),
        ) else {
            return Err(MonitorError::NotificationFailure(
                "TELEGRAM_BOT_TOKEN/TELEGRAM_CHAT_ID missing".to_string(),
            ));
        };
        Self::new(token, chat_id, Duration::from_secs(config.timeout_secs))
            .map_err(|e| MonitorError::NotificationFailure(format!("{:#}", e)))
    }

    /// Point the sender at a different Bot API host
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> MonitorResult<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let response = self
            .client
            .post(&url)
            .form(&[("chat_id", self.chat_id.as_str()), ("text", text)])
            .send()
            .await
            .map_err(|e| {
                MonitorError::NotificationFailure(format!(
                    "Failed to send Telegram message: {}",
                    e.without_url()
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MonitorError::NotificationFailure(format!(
                "Telegram returned {}: {}",
                status, body
            )));
        }

        debug!("Sent Telegram notification (length={})", text.len());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

/// Fallback sender that only logs
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> MonitorResult<()> {
        info!(target: "gridwatch::notify", "(no telegram) {}", text);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Pick the delivery backend for the worker: Telegram when credentials are
/// present, the log otherwise
pub fn notifier_from_config(config: &NotifyConfig) -> Arc<dyn Notifier> {
    match TelegramNotifier::from_config(config) {
        Ok(telegram) => Arc::new(telegram),
        Err(e) => {
            tracing::warn!("Telegram disabled ({}), logging notifications instead", e);
            Arc::new(LogNotifier)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telegram_requires_credentials() {
        assert!(TelegramNotifier::new("", "123", Duration::from_secs(1)).is_err());
        assert!(TelegramNotifier::new("token", "", Duration::from_secs(1)).is_err());
        assert!(TelegramNotifier::new("token", "123", Duration::from_secs(1)).is_ok());
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        assert!(LogNotifier.send("hello").await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_api_is_notification_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let notifier = TelegramNotifier::new("token", "123", Duration::from_secs(1))
            .unwrap()
            .with_api_base(format!("http://{}", addr));
        match notifier.send("hi").await {
            Err(MonitorError::NotificationFailure(msg)) => assert!(!msg.contains("token")),
            other => panic!("expected NotificationFailure, got {:?}", other),
        }
    }

    #[test]
    fn test_backend_selection() {
        let mut config = NotifyConfig::default();
        assert_eq!(notifier_from_config(&config).name(), "log");

        config.bot_token = Some("token".to_string());
        config.chat_id = Some(String::new());
        assert_eq!(notifier_from_config(&config).name(), "log");

        config.chat_id = Some("123".to_string());
        assert_eq!(notifier_from_config(&config).name(), "telegram");
    }

    #[test]
    fn test_from_config_rejects_missing_credentials() {
        let mut config = NotifyConfig {
            bot_token: Some("token".to_string()),
            ..NotifyConfig::default()
        };
        match TelegramNotifier::from_config(&config) {
            Err(MonitorError::NotificationFailure(msg)) => {
                assert!(msg.contains("TELEGRAM_BOT_TOKEN/TELEGRAM_CHAT_ID"))
            }
            other => panic!("expected NotificationFailure, got {:?}", other.map(|n| n.name())),
        }

        config.chat_id = Some("123".to_string());
        assert!(TelegramNotifier::from_config(&config).is_ok());
    }
}
