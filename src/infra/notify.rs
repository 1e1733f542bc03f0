use std::time::Duration;

use anyhow::{Context, Error};
use async_trait::async_trait;
use log::warn;
use reqwest::Client;

use crate::domain::port::Notifier;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Push notifications over ntfy. With no endpoint configured every call
/// is a no-op; delivery failures are logged, never surfaced.
pub struct NtfyNotifier {
    http: Client,
    endpoint: String,
    topic: String,
    token: String,
    click_url: String,
}

impl NtfyNotifier {
    pub fn new(
        endpoint: &str,
        topic: String,
        token: String,
        click_url: String,
    ) -> Result<NtfyNotifier, Error> {
        let http = Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
            .context("Can't build notification http client")?;
        Ok(NtfyNotifier {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            topic,
            token,
            click_url,
        })
    }
}

#[async_trait]
impl Notifier for NtfyNotifier {
    async fn notify(&self, title: &str, body: &str, priority: &str, tags: &str) {
        if self.endpoint.is_empty() {
            return;
        }
        let mut request = self
            .http
            .post(format!("{}/{}", self.endpoint, self.topic))
            .header("Title", title)
            .header("Priority", priority)
            .header("Tags", tags)
            .body(body.to_string());
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }
        if !self.click_url.is_empty() {
            request = request.header("Click", &self.click_url);
        }
        if let Err(e) = request.send().await {
            warn!("notify failed: {}", e);
        }
    }
}
