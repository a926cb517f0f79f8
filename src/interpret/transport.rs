use crate::config::ModelConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Sends one rendered prompt to the inference endpoint and returns the raw
/// response body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn complete(&self, prompt: &str) -> Result<String> {
        (**self).complete(prompt).await
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

/// `reqwest`-backed transport: POSTs `{model, prompt, max_tokens,
/// temperature, stream: false}` and returns the body as text.
pub struct HttpTransport {
    client: reqwest::Client,
    config: ModelConfig,
}

impl HttpTransport {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = GenerateRequest {
            model: &self.config.model,
            prompt,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        };

        debug!(
            "POST {} (model: {}, prompt: {} chars)",
            self.config.endpoint,
            self.config.model,
            prompt.len()
        );
        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("HTTP {}: {}", status, text)));
        }

        response
            .text()
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}
