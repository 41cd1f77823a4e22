//! Telegram Bot API client used for the single delivery attempt per event.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use taskrelay_core::truncate_for_error;

pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Why a delivery attempt failed. The webhook still acknowledges the inbound
/// event in every one of these cases; the upstream platform cannot fix a
/// downstream failure by retrying its own webhook.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("telegram request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("telegram sendMessage returned status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("telegram api rejected message: {0}")]
    Api(String),
}

#[derive(Debug, Clone, Deserialize)]
struct SendMessageResponse {
    ok: bool,
    description: Option<String>,
}

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    send_message_url: String,
}

impl TelegramClient {
    pub fn new(api_base: &str, bot_token: &str, request_timeout_ms: u64) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("taskrelay"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create telegram api client")?;

        Ok(Self {
            http,
            send_message_url: format!(
                "{}/bot{}/sendMessage",
                api_base.trim_end_matches('/'),
                bot_token.trim()
            ),
        })
    }

    /// Performs exactly one sendMessage call; the client timeout bounds it.
    /// No retry here: a failed delivery is reported, not re-attempted.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), DispatchError> {
        let payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": false,
        });
        let response = self
            .http
            .post(&self.send_message_url)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::HttpStatus {
                status: status.as_u16(),
                body: truncate_for_error(&body, 320),
            });
        }

        let parsed: SendMessageResponse = response.json().await?;
        if !parsed.ok {
            return Err(DispatchError::Api(
                parsed
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(())
    }
}
