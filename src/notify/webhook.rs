//! HTTP notifiers: a generic JSON webhook and the Telegram bot API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use super::{Notifier, NotifyError};
use crate::db::EntityId;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const TELEGRAM_API: &str = "https://api.telegram.org";

fn http_client() -> Result<reqwest::Client, NotifyError> {
    reqwest::Client::builder()
        .timeout(SEND_TIMEOUT)
        .build()
        .map_err(|e| NotifyError::Config(e.to_string()))
}

/// POSTs `{entity_id, message, sent_at}` to a URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self, NotifyError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(NotifyError::Config(format!("webhook URL must be http(s): {}", url)));
        }
        Ok(Self {
            client: http_client()?,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, entity_id: EntityId, message: &str) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "entity_id": entity_id,
            "message": message,
            "sent_at": Utc::now().to_rfc3339(),
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(format!("status {}", response.status())));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Sends alerts to one chat through a Telegram bot.
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_id: &str) -> Result<Self, NotifyError> {
        Self::with_api_base(TELEGRAM_API, token, chat_id)
    }

    pub fn with_api_base(api_base: &str, token: &str, chat_id: &str) -> Result<Self, NotifyError> {
        if token.is_empty() || chat_id.is_empty() {
            return Err(NotifyError::Config("telegram token and chat id are required".to_string()));
        }
        Ok(Self {
            client: http_client()?,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    fn send_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.token)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, _entity_id: EntityId, message: &str) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "chat_id": self.chat_id,
            "text": message,
            "parse_mode": "Markdown",
        });

        let response = self
            .client
            .post(self.send_url())
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?;

        let status = response.status();
        let body: TelegramResponse = response
            .json()
            .await
            .map_err(|e| NotifyError::Http(format!("unreadable response ({}): {}", status, e)))?;

        if status.is_success() && body.ok {
            Ok(())
        } else {
            Err(NotifyError::Rejected(
                body.description.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }
}
