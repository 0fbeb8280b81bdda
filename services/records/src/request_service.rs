use crate::error::LifecycleError;
use crate::notifier::{self, Notifier};
use crate::request_store::{NewRequest, RequestRecord, RequestStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};

/// Records contact requests and announces each one to the notification sink
pub struct RequestService {
    store: Arc<dyn RequestStore>,
    notifier: Arc<dyn Notifier>,
}

impl RequestService {
    pub fn new(store: Arc<dyn RequestStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Insert the request and dispatch its notification without waiting for
    /// delivery. Returns the new request id.
    #[instrument(skip_all)]
    pub async fn create_request(&self, request: NewRequest) -> Result<i64, LifecycleError> {
        let id = self.store.insert(&request, Utc::now()).await?;

        // Read back so the message carries the stored timestamp
        let record = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| LifecycleError::not_found(format!("Request with id {id}")))?;

        notifier::dispatch(self.notifier.clone(), format_message(&record));

        info!(id, "Request recorded");
        metrics::counter!("records.requests.created").increment(1);
        Ok(id)
    }
}

/// Notification text for a request
pub fn format_message(record: &RequestRecord) -> String {
    let full_name = [
        Some(record.surname.as_str()),
        Some(record.name.as_str()),
        record.patronymic.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ");

    format!(
        "{}\n{}\n{}\n{}\n{}",
        record.create_time.format("%d.%m.%Y %H:%M:%S"),
        full_name,
        record.phone,
        record.email.as_deref().unwrap_or("-"),
        record.text
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::NotifyError;
    use crate::request_store::memory::MemoryRequestStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    struct ChannelNotifier(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl Notifier for ChannelNotifier {
        async fn send(&self, text: &str) -> Result<(), NotifyError> {
            let _ = self.0.send(text.to_string());
            Ok(())
        }
    }

    fn request() -> NewRequest {
        NewRequest {
            name: "Ann".to_string(),
            surname: "Lee".to_string(),
            patronymic: Some("M".to_string()),
            phone: "1234567890".to_string(),
            email: None,
            text: "Please call back".to_string(),
        }
    }

    #[test]
    fn test_format_message() {
        let record = RequestRecord {
            id: 1,
            create_time: Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap(),
            name: "Ann".to_string(),
            surname: "Lee".to_string(),
            patronymic: None,
            phone: "1234567890".to_string(),
            email: Some("ann@example.com".to_string()),
            text: "Hi".to_string(),
        };
        assert_eq!(
            format_message(&record),
            "15.01.2024 10:30:45\nLee Ann\n1234567890\nann@example.com\nHi"
        );
    }

    #[tokio::test]
    async fn test_create_request_notifies() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let store = Arc::new(MemoryRequestStore::default());
        let service = RequestService::new(store.clone(), Arc::new(ChannelNotifier(tx)));

        let id = service.create_request(request()).await.unwrap();
        assert_eq!(id, 1);

        let message = rx.recv().await.unwrap();
        assert!(message.contains("Lee Ann M"));
        assert!(message.ends_with("-\nPlease call back"));
        assert!(store.find_by_id(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_request() {
        let mut notifier = crate::notifier::MockNotifier::new();
        notifier
            .expect_send()
            .returning(|_| Err(NotifyError::NotConfigured("test")));
        let service = RequestService::new(
            Arc::new(MemoryRequestStore::default()),
            Arc::new(notifier),
        );

        assert!(service.create_request(request()).await.is_ok());
    }
}
