//! Inference service client.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::ModelConfig;
use crate::{Error, Result};

/// A vision-capable completion model. No guarantee is made about the shape
/// of the returned text.
#[async_trait]
pub trait Model: Send + Sync {
    async fn infer(&self, prompt: &str, image: Option<&[u8]>, temperature: f32) -> Result<String>;
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    prompt: &'a str,
    image: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

/// Posts prompts as JSON to an HTTP inference endpoint.
pub struct HttpModel {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    max_tokens: u32,
}

impl HttpModel {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            max_tokens: config.max_tokens,
        })
    }
}

/// Pull the completion text out of either `{"text": ...}` or an
/// OpenAI-style `{"choices": [{"text": ...}]}` body.
fn completion_text(body: &Value) -> Option<&str> {
    body.get("text").and_then(Value::as_str).or_else(|| {
        let choice = body.get("choices")?.get(0)?;
        choice
            .get("text")
            .and_then(Value::as_str)
            .or_else(|| choice.get("message")?.get("content")?.as_str())
    })
}

#[async_trait]
impl Model for HttpModel {
    async fn infer(&self, prompt: &str, image: Option<&[u8]>, temperature: f32) -> Result<String> {
        let request = InferenceRequest {
            prompt,
            image: image.map(|bytes| BASE64.encode(bytes)),
            temperature,
            max_tokens: self.max_tokens,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            let msg = body["error"]["message"]
                .as_str()
                .or_else(|| body["error"].as_str())
                .unwrap_or("unknown error");
            return Err(Error::Model(format!("{}: {}", status, msg)));
        }

        let text = completion_text(&body)
            .ok_or_else(|| Error::Model(format!("no completion text in response: {}", body)))?;
        debug!("model replied with {} chars", text.len());
        Ok(text.to_string())
    }
}
