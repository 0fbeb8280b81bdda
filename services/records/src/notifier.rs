use crate::config::NotificationConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to reach notification endpoint: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Notifier is not configured: {0}")]
    NotConfigured(&'static str),
}

/// Outbound message sink
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), NotifyError>;
}

/// Sends messages to a chat through the Telegram bot API
pub struct TelegramNotifier {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

impl TelegramNotifier {
    pub fn new(config: &NotificationConfig, timeout: Duration) -> Result<Self, NotifyError> {
        let token = config
            .bot_token
            .as_deref()
            .ok_or(NotifyError::NotConfigured("bot_token"))?;
        let chat_id = config
            .target_chat_id
            .clone()
            .ok_or(NotifyError::NotConfigured("target_chat_id"))?;

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/bot{}/sendMessage",
                config.api_base.trim_end_matches('/'),
                token
            ),
            chat_id,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(chat_id = %self.chat_id, "Notification delivered");
        Ok(())
    }
}

/// Used when delivery is disabled; the message only reaches the log
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        info!(message = %text, "Notification (delivery disabled)");
        Ok(())
    }
}

/// Build the notifier selected by configuration
pub fn from_config(
    config: &NotificationConfig,
    timeout: Duration,
) -> Result<Arc<dyn Notifier>, NotifyError> {
    if config.enabled {
        Ok(Arc::new(TelegramNotifier::new(config, timeout)?))
    } else {
        Ok(Arc::new(LogNotifier))
    }
}

/// Fire-and-forget delivery. Failures are logged and counted, never returned.
pub fn dispatch(notifier: Arc<dyn Notifier>, text: String) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match notifier.send(&text).await {
            Ok(()) => metrics::counter!("records.notifications.sent").increment(1),
            Err(e) => {
                error!(error = %e, "Failed to send notification");
                metrics::counter!("records.notifications.failed").increment(1);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telegram_requires_token() {
        let config = NotificationConfig {
            enabled: true,
            ..NotificationConfig::default()
        };
        assert!(matches!(
            TelegramNotifier::new(&config, Duration::from_secs(1)),
            Err(NotifyError::NotConfigured("bot_token"))
        ));
    }

    #[test]
    fn test_telegram_endpoint() {
        let config = NotificationConfig {
            enabled: true,
            api_base: "https://api.telegram.org/".to_string(),
            bot_token: Some("42:secret".to_string()),
            target_chat_id: Some("-100".to_string()),
            ..NotificationConfig::default()
        };
        let notifier = TelegramNotifier::new(&config, Duration::from_secs(1)).unwrap();
        assert_eq!(
            notifier.endpoint,
            "https://api.telegram.org/bot42:secret/sendMessage"
        );
    }

    #[tokio::test]
    async fn test_dispatch_swallows_failures() {
        let mut mock = MockNotifier::new();
        mock.expect_send()
            .times(1)
            .returning(|_| Err(NotifyError::NotConfigured("test")));

        dispatch(Arc::new(mock), "hello".to_string()).await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_config_logs_only() {
        let notifier = from_config(&NotificationConfig::default(), Duration::from_secs(1)).unwrap();
        assert!(notifier.send("hello").await.is_ok());
    }
}
