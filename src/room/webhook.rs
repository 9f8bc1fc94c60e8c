//! Outbound webhook notifications

use std::time::Duration;

use serde::Serialize;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Fire-and-forget webhook poster
#[derive(Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Create a notifier for the given webhook URL
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        assert!(!url.is_empty(), "webhook URL must not be empty");
        Self {
            http: reqwest::Client::new(),
            url,
        }
    }

    /// Post one message to the webhook
    ///
    /// Failures are logged and swallowed; a notification is never worth
    /// failing the caller over.
    pub async fn notify(&self, content: &str) {
        #[derive(Serialize)]
        struct WebhookBody<'a> {
            content: &'a str,
        }

        let request = self.http.post(&self.url).json(&WebhookBody { content }).send();
        match tokio::time::timeout(NOTIFY_TIMEOUT, request).await {
            Err(_) => tracing::warn!("webhook notification timed out"),
            Ok(Err(err)) => tracing::warn!(error = %err, "webhook notification failed"),
            Ok(Ok(response)) if !response.status().is_success() => {
                tracing::warn!(status = %response.status(), "webhook rejected notification");
            }
            Ok(Ok(_)) => {}
        }
    }
}
