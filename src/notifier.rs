//! Status notification client for the collaborator API server.
//!
//! Notifications are observability, not control flow: delivery runs on a
//! dedicated short-timeout client, and any failure is logged and absorbed so
//! it can never alter a pipeline outcome.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value, json};

use crate::config::Config;

/// Lifecycle states reported to the collaborator service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    /// A pipeline stage is underway.
    Processing,
    /// Ingestion finished and all chunks are persisted.
    Completed,
    /// Ingestion failed; the carried error is in the metadata.
    Failed,
}

impl DocumentStatus {
    /// Wire representation expected by the notification endpoint.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Sink for lifecycle status events.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one status event. Returns whether delivery succeeded; callers
    /// are free to ignore the answer.
    async fn notify(&self, file_id: &str, status: DocumentStatus, metadata: Value) -> bool;
}

/// HTTP notifier posting to the API server's internal notification route.
pub struct StatusNotifier {
    client: Client,
    base_url: String,
    api_key: String,
}

/// Notification deliveries give up quickly rather than stall the pipeline.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

impl StatusNotifier {
    /// Construct the notifier from configuration.
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent("docflow/0.1")
            .timeout(NOTIFY_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: config.notify_base_url.trim_end_matches('/').to_string(),
            api_key: config.internal_api_key.clone(),
        })
    }
}

#[async_trait]
impl Notifier for StatusNotifier {
    async fn notify(&self, file_id: &str, status: DocumentStatus, metadata: Value) -> bool {
        let body = json!({
            "fileId": file_id,
            "status": status.as_str(),
            "metadata": sanitize_metadata(metadata),
        });

        let result = self
            .client
            .post(format!(
                "{}/api/notifications/internal/notify",
                self.base_url
            ))
            .header("x-internal-api-key", &self.api_key)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(file_id, status = status.as_str(), "Status notification sent");
                true
            }
            Ok(response) => {
                tracing::warn!(
                    file_id,
                    status = status.as_str(),
                    http_status = %response.status(),
                    "Status notification rejected"
                );
                false
            }
            Err(err) => {
                tracing::warn!(
                    file_id,
                    status = status.as_str(),
                    error = %err,
                    "Status notification failed"
                );
                false
            }
        }
    }
}

/// Drop null entries from notification metadata, recursively for objects.
fn sanitize_metadata(metadata: Value) -> Value {
    match metadata {
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(key, value)| (key, sanitize_metadata(value)))
                .collect();
            Value::Object(cleaned)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    fn test_notifier(base_url: &str) -> StatusNotifier {
        StatusNotifier {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: "secret".to_string(),
        }
    }

    #[test]
    fn sanitize_drops_nulls_recursively() {
        let cleaned = sanitize_metadata(json!({
            "title": null,
            "stage": "chunking",
            "nested": {"kept": 1, "gone": null}
        }));
        assert_eq!(
            cleaned,
            json!({"stage": "chunking", "nested": {"kept": 1}})
        );
    }

    #[tokio::test]
    async fn delivers_payload_with_shared_secret() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/notifications/internal/notify")
                    .header("x-internal-api-key", "secret")
                    .json_body_partial(r#"{"fileId": "job-1", "status": "completed"}"#);
                then.status(200);
            })
            .await;

        let delivered = test_notifier(&server.base_url())
            .notify("job-1", DocumentStatus::Completed, json!({"chunks": 2}))
            .await;
        assert!(delivered);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_response_is_absorbed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/notifications/internal/notify");
                then.status(500).body("boom");
            })
            .await;

        let delivered = test_notifier(&server.base_url())
            .notify("job-1", DocumentStatus::Failed, json!({}))
            .await;
        assert!(!delivered);
    }
}
