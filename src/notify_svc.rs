use serde::Serialize;
use std::{future::Future, time::Duration};
use tracing::debug;

use super::error::NotifyError;

/// Destination for composed anomaly alerts.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, message: String) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

#[derive(Serialize)]
struct WebhookMessage {
    text: String,
}

pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts `{"text": ...}` to an incoming-webhook URL (Slack style).
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Option<String>,
}

impl WebhookNotifier {
    /// `timeout` bounds each request from connect to the end of the response.
    pub fn new(url: Option<String>, timeout: Duration) -> Result<Self, NotifyError> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            url,
        })
    }
}

impl Notifier for WebhookNotifier {
    async fn notify(&self, message: String) -> Result<(), NotifyError> {
        let url = self.url.as_deref().ok_or(NotifyError::MissingEndpoint)?;

        let resp = self
            .client
            .post(url)
            .json(&WebhookMessage { text: message })
            .send()
            .await?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(NotifyError::NonOkResponse(resp.status().as_u16()));
        }

        debug!("notify_svc: webhook accepted alert");
        Ok(())
    }
}
