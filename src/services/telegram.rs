// src/services/telegram.rs

//! Telegram Bot API sink.
//!
//! Talks to `sendMessage`, `sendDocument` and `getMe` over plain HTTPS.
//! HTTP 429 responses carry `parameters.retry_after`, which is surfaced as
//! [`SendOutcome::RateLimited`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, Result};
use crate::models::{Attachment, SinkConfig};
use crate::services::{SendOutcome, Sink};

/// Wait applied when a 429 arrives without `retry_after`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

/// Sink posting to a Telegram chat through a bot.
pub struct TelegramSink {
    client: Client,
    /// `{api_base}/bot{token}`; never logged
    endpoint: String,
    link_preview: bool,
}

impl TelegramSink {
    pub fn new(config: &SinkConfig, client: Client) -> Self {
        Self {
            client,
            endpoint: format!("{}/bot{}", config.api_base.trim_end_matches('/'), config.token),
            link_preview: config.link_preview,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.endpoint, method)
    }

    /// Verify the token and return the bot's `@username`.
    pub async fn get_me(&self) -> Result<String> {
        let response = self
            .client
            .get(self.method_url("getMe"))
            .send()
            .await
            .map_err(|e| AppError::sink(e.without_url()))?;
        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| AppError::sink(e.without_url()))?;

        if !body.ok {
            return Err(AppError::sink(
                body.description.unwrap_or_else(|| "getMe failed".to_string()),
            ));
        }

        let username = body
            .result
            .as_ref()
            .and_then(|r| r.get("username"))
            .and_then(|u| u.as_str())
            .ok_or_else(|| AppError::sink("getMe returned no username"))?;
        Ok(format!("@{username}"))
    }

    async fn finish(&self, sent: reqwest::Result<reqwest::Response>) -> SendOutcome {
        let response = match sent {
            Ok(response) => response,
            Err(e) => return SendOutcome::Failed(e.without_url().to_string()),
        };
        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => outcome_from_response(status, &body),
            Err(e) => SendOutcome::Failed(e.without_url().to_string()),
        }
    }
}

#[async_trait]
impl Sink for TelegramSink {
    async fn send_text(&self, target: &str, text: &str) -> SendOutcome {
        let payload = json!({
            "chat_id": target,
            "text": text,
            "disable_web_page_preview": !self.link_preview,
        });
        let sent = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&payload)
            .send()
            .await;
        self.finish(sent).await
    }

    async fn send_file(&self, target: &str, file: &Attachment, caption: &str) -> SendOutcome {
        let part = Part::bytes(file.bytes.clone())
            .file_name(file.filename.clone())
            .mime_str("application/octet-stream");
        let part = match part {
            Ok(part) => part,
            Err(e) => return SendOutcome::Failed(e.to_string()),
        };
        let form = Form::new()
            .text("chat_id", target.to_string())
            .text("caption", caption.to_string())
            .part("document", part);

        let sent = self
            .client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await;
        self.finish(sent).await
    }
}

/// Interpret a Bot API response.
fn outcome_from_response(status: u16, body: &str) -> SendOutcome {
    let parsed: Option<ApiResponse> = serde_json::from_str(body).ok();
    let retry_after = parsed
        .as_ref()
        .and_then(|r| r.parameters.as_ref())
        .and_then(|p| p.retry_after);

    if status == 429 || retry_after.is_some() {
        let secs = retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        return SendOutcome::RateLimited(Duration::from_secs(secs));
    }

    match parsed {
        Some(response) if response.ok => SendOutcome::Sent,
        Some(response) => SendOutcome::Failed(
            response
                .description
                .unwrap_or_else(|| format!("HTTP {status}")),
        ),
        None => SendOutcome::Failed(format!("HTTP {status}: unreadable response")),
    }
}
