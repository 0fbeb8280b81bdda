//! Relay of text messages posted in a source chat to the notification chat.
//!
//! Long-polls the bot API `getUpdates` endpoint and hands every text message
//! from the configured source chat to the [`Notifier`].

use crate::config::NotificationConfig;
use crate::notifier::{Notifier, NotifyError};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
    description: Option<String>,
}

/// One entry of a `getUpdates` response; non-message updates carry no `message`
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Texts to relay from one batch of updates, and the offset that
/// acknowledges the whole batch
pub fn select_relayed(updates: &[Update], source_chat_id: i64, offset: i64) -> (i64, Vec<String>) {
    let next_offset = updates
        .iter()
        .map(|u| u.update_id + 1)
        .max()
        .map_or(offset, |next| next.max(offset));

    let texts = updates
        .iter()
        .filter_map(|u| u.message.as_ref())
        .filter(|m| m.chat.id == source_chat_id)
        .filter_map(|m| m.text.clone())
        .filter(|text| !text.trim().is_empty())
        .collect();

    (next_offset, texts)
}

pub struct TelegramRelay {
    client: reqwest::Client,
    endpoint: String,
    source_chat_id: i64,
    poll_timeout: Duration,
    notifier: Arc<dyn Notifier>,
}

impl TelegramRelay {
    /// `None` unless notifications are enabled and a source chat is set
    pub fn new(
        config: &NotificationConfig,
        poll_timeout: Duration,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Option<Self>, NotifyError> {
        let source_chat_id = match config.relay_source_chat_id {
            Some(id) if config.enabled => id,
            _ => return Ok(None),
        };
        let token = config
            .bot_token
            .as_deref()
            .ok_or(NotifyError::NotConfigured("bot_token"))?;

        // The long poll itself must not trip the client timeout
        let client = reqwest::Client::builder()
            .timeout(poll_timeout + Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Some(Self {
            client,
            endpoint: format!(
                "{}/bot{}/getUpdates",
                config.api_base.trim_end_matches('/'),
                token
            ),
            source_chat_id,
            poll_timeout,
            notifier,
        }))
    }

    /// Poll until the task is aborted. Poll failures are logged and retried.
    pub async fn run(self) {
        info!(source_chat_id = self.source_chat_id, "Request relay started");
        let mut offset = 0;

        loop {
            let updates = match self.poll(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "Failed to poll bot updates");
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            let (next_offset, texts) = select_relayed(&updates, self.source_chat_id, offset);
            offset = next_offset;

            for text in texts {
                match self.notifier.send(&text).await {
                    Ok(()) => {
                        debug!(source_chat_id = self.source_chat_id, "Message relayed");
                        metrics::counter!("records.relay.forwarded").increment(1);
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to relay message");
                        metrics::counter!("records.relay.failed").increment(1);
                    }
                }
            }
        }
    }

    async fn poll(&self, offset: i64) -> Result<Vec<Update>, NotifyError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", self.poll_timeout.as_secs().to_string()),
            ])
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

        let body: UpdatesResponse = response.json().await?;
        if !body.ok {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body: body.description.unwrap_or_default(),
            });
        }
        Ok(body.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{extract::Query, routing::get, Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    const SOURCE: i64 = -100;

    struct ChannelNotifier(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl Notifier for ChannelNotifier {
        async fn send(&self, text: &str) -> Result<(), NotifyError> {
            let _ = self.0.send(text.to_string());
            Ok(())
        }
    }

    fn update(id: i64, chat: i64, text: Option<&str>) -> Value {
        let mut message = json!({ "message_id": id * 10, "chat": { "id": chat, "type": "group" } });
        if let Some(text) = text {
            message["text"] = json!(text);
        }
        json!({ "update_id": id, "message": message })
    }

    fn parse(updates: &[Value]) -> Vec<Update> {
        updates
            .iter()
            .map(|u| serde_json::from_value(u.clone()).unwrap())
            .collect()
    }

    fn config(api_base: &str) -> NotificationConfig {
        NotificationConfig {
            enabled: true,
            api_base: api_base.to_string(),
            bot_token: Some("test-token".to_string()),
            target_chat_id: Some("-200".to_string()),
            relay_source_chat_id: Some(SOURCE),
            ..NotificationConfig::default()
        }
    }

    /// Serves the given updates from `getUpdates`, honoring `offset`
    async fn bot_api(updates: Vec<Value>) -> String {
        let updates = Arc::new(updates);
        let app = Router::new().route(
            "/bottest-token/getUpdates",
            get(move |Query(query): Query<HashMap<String, String>>| {
                let updates = updates.clone();
                async move {
                    let offset: i64 = query
                        .get("offset")
                        .and_then(|o| o.parse().ok())
                        .unwrap_or(0);
                    let pending: Vec<Value> = updates
                        .iter()
                        .filter(|u| u["update_id"].as_i64().unwrap_or(0) >= offset)
                        .cloned()
                        .collect();
                    if pending.is_empty() {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    Json(json!({ "ok": true, "result": pending }))
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_select_relayed_filters_source_chat() {
        let updates = parse(&[
            update(5, SOURCE, Some("hello")),
            update(6, -300, Some("other chat")),
            update(7, SOURCE, None),
            update(8, SOURCE, Some("  ")),
            update(9, SOURCE, Some("second")),
        ]);

        let (offset, texts) = select_relayed(&updates, SOURCE, 0);
        assert_eq!(offset, 10);
        assert_eq!(texts, vec!["hello", "second"]);
    }

    #[test]
    fn test_empty_batch_keeps_offset() {
        let (offset, texts) = select_relayed(&[], SOURCE, 42);
        assert_eq!(offset, 42);
        assert!(texts.is_empty());
    }

    #[test]
    fn test_non_message_updates_are_acknowledged() {
        let updates = parse(&[json!({ "update_id": 3, "edited_message": {} })]);
        let (offset, texts) = select_relayed(&updates, SOURCE, 0);
        assert_eq!(offset, 4);
        assert!(texts.is_empty());
    }

    #[test]
    fn test_relay_needs_enabled_notifications_and_source() {
        let notifier: Arc<dyn Notifier> = Arc::new(crate::notifier::LogNotifier);

        let disabled = NotificationConfig {
            enabled: false,
            ..config("http://localhost")
        };
        assert!(TelegramRelay::new(&disabled, Duration::from_secs(1), notifier.clone())
            .unwrap()
            .is_none());

        let no_source = NotificationConfig {
            relay_source_chat_id: None,
            ..config("http://localhost")
        };
        assert!(TelegramRelay::new(&no_source, Duration::from_secs(1), notifier.clone())
            .unwrap()
            .is_none());

        let relay = TelegramRelay::new(&config("http://localhost/"), Duration::from_secs(1), notifier)
            .unwrap()
            .unwrap();
        assert_eq!(relay.endpoint, "http://localhost/bottest-token/getUpdates");
    }

    #[tokio::test]
    async fn test_relay_forwards_source_messages_in_order() {
        let base = bot_api(vec![
            update(1, SOURCE, Some("first")),
            update(2, -300, Some("ignored")),
            update(3, SOURCE, Some("second")),
        ])
        .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let relay = TelegramRelay::new(
            &config(&base),
            Duration::from_secs(0),
            Arc::new(ChannelNotifier(tx)),
        )
        .unwrap()
        .unwrap();
        let handle = tokio::spawn(relay.run());

        assert_eq!(rx.recv().await.unwrap(), "first");
        assert_eq!(rx.recv().await.unwrap(), "second");

        // Acknowledged updates are not delivered again
        let repeated = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(repeated.is_err());

        handle.abort();
    }
}
