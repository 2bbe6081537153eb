//! Chat-completion backend.
//!
//! [`OllamaChat`] calls `POST /api/chat` on a local Ollama server with
//! `options.num_predict` (max output tokens) and `options.temperature`.
//! When streaming is enabled Ollama answers with newline-delimited JSON
//! frames; they are read to completion and concatenated, so callers always
//! get one reply string.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;

/// One message in a chat request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, messages: &[PromptMessage]) -> Result<String>;
}

pub struct OllamaChat {
    model: String,
    url: String,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            model: config.model.clone(),
            url: config.base_url.trim_end_matches('/').to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stream: config.stream,
            client: builder.build()?,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatFrame {
    #[serde(default)]
    message: Option<PromptMessage>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    done: bool,
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[PromptMessage]) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: self.stream,
            options: ChatOptions {
                num_predict: self.max_tokens,
                temperature: self.temperature,
            },
        };

        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            stream = self.stream,
            "chat request"
        );

        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url,
                    e
                )
            })?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            bail!("Ollama API error {}: {}", status, body.trim());
        }

        parse_chat_body(&body)
    }
}

/// Concatenate the message content of every frame in an Ollama chat body.
///
/// Works for both a single JSON object (`stream: false`) and NDJSON
/// frames (`stream: true`).
pub fn parse_chat_body(body: &str) -> Result<String> {
    let mut reply = String::new();
    let mut frames = 0usize;
    let mut done = false;

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let frame: ChatFrame =
            serde_json::from_str(line).context("Invalid Ollama chat response frame")?;
        if let Some(err) = frame.error {
            bail!("Ollama chat error: {}", err);
        }
        if let Some(msg) = frame.message {
            reply.push_str(&msg.content);
        }
        frames += 1;
        done |= frame.done;
    }

    if frames == 0 {
        bail!("Empty Ollama chat response");
    }
    if !done {
        tracing::warn!(frames, "Ollama chat stream ended without a done frame");
    }

    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_response() {
        let body = concat!(
            r#"{"model":"llama3:instruct","#,
            r#""message":{"role":"assistant","content":"Hello there"},"done":true}"#
        );
        assert_eq!(parse_chat_body(body).unwrap(), "Hello there");
    }

    #[test]
    fn concatenates_stream_frames() {
        let body = concat!(
            r#"{"message":{"role":"assistant","content":"It "},"done":false}"#,
            "\n",
            r#"{"message":{"role":"assistant","content":"prints "},"done":false}"#,
            "\n\n",
            r#"{"message":{"role":"assistant","content":"hello."},"done":false}"#,
            "\n",
            r#"{"message":{"role":"assistant","content":""},"done":true,"eval_count":3}"#,
            "\n",
        );
        assert_eq!(parse_chat_body(body).unwrap(), "It prints hello.");
    }

    #[test]
    fn surfaces_error_frames() {
        let err = parse_chat_body(r#"{"error":"model 'x' not found"}"#).unwrap_err();
        assert!(err.to_string().contains("model 'x' not found"));
    }

    #[test]
    fn rejects_empty_body() {
        assert!(parse_chat_body("  \n").is_err());
    }

    #[test]
    fn request_carries_sampling_options() {
        let messages = vec![PromptMessage::new("user", "hi")];
        let req = ChatRequest {
            model: "llama3:instruct",
            messages: &messages,
            stream: true,
            options: ChatOptions {
                num_predict: 250,
                temperature: 0.5,
            },
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["options"]["num_predict"], 250);
        assert_eq!(json["options"]["temperature"], 0.5);
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["content"], "hi");
    }
}
