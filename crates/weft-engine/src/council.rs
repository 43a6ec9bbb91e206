use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;

use weft_core::config::CouncilConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::CouncilClient;
use weft_core::types::CouncilResult;

/// Council service reached over HTTP at `{base}/council/query`.
pub struct HttpCouncilClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct CouncilQuery {
    prompt: String,
    models: Vec<String>,
}

impl HttpCouncilClient {
    pub fn new(config: &CouncilConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| WeftError::Council(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

impl CouncilClient for HttpCouncilClient {
    fn query(&self, prompt: String, models: Vec<String>) -> BoxFuture<'_, Result<CouncilResult>> {
        Box::pin(async move {
            let url = format!("{}/council/query", self.base_url);
            let mut req = self.client.post(&url).json(&CouncilQuery { prompt, models });
            if let Some(ref key) = self.api_key {
                req = req.bearer_auth(key);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| WeftError::Council(format!("request failed: {}", e)))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(WeftError::Council(format!("council error {}: {}", status, body)));
            }

            resp.json()
                .await
                .map_err(|e| WeftError::Council(format!("bad council response: {}", e)))
        })
    }
}
