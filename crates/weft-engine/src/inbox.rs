use std::time::Duration;

use futures::future::BoxFuture;

use weft_core::config::InboxConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::InboxClient;
use weft_core::types::{MessageStatus, OutboundMessage, SendReceipt};

/// Inbox reached over HTTP: `POST {base}/messages`, `GET {base}/messages/{id}`.
pub struct HttpInboxClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpInboxClient {
    pub fn new(config: &InboxConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| WeftError::Inbox(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

async fn checked(resp: reqwest::Response) -> Result<reqwest::Response> {
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(WeftError::Inbox(format!("inbox error {}: {}", status, body)));
    }
    Ok(resp)
}

impl InboxClient for HttpInboxClient {
    fn send(&self, message: OutboundMessage) -> BoxFuture<'_, Result<SendReceipt>> {
        Box::pin(async move {
            let url = format!("{}/messages", self.base_url);
            let resp = self
                .authorize(self.client.post(&url).json(&message))
                .send()
                .await
                .map_err(|e| WeftError::Inbox(format!("send to {} failed: {}", message.to, e)))?;

            let text = checked(resp)
                .await?
                .text()
                .await
                .map_err(|e| WeftError::Inbox(e.to_string()))?;
            // Some inboxes answer with an empty body; dispatch then mints its own id
            Ok(serde_json::from_str(&text).unwrap_or_default())
        })
    }

    fn status(&self, message_id: &str) -> BoxFuture<'_, Result<MessageStatus>> {
        let url = format!("{}/messages/{}", self.base_url, message_id);
        Box::pin(async move {
            let resp = self
                .authorize(self.client.get(&url))
                .send()
                .await
                .map_err(|e| WeftError::Inbox(format!("status request failed: {}", e)))?;

            checked(resp)
                .await?
                .json()
                .await
                .map_err(|e| WeftError::Inbox(format!("bad status response: {}", e)))
        })
    }
}
