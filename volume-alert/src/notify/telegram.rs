use super::{AlertPayload, Notifier, format_message};
use crate::error::AlertError;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info, warn};

/// Default Telegram Bot API base url.
pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Telegram Bot notifier posting HTML messages to a single chat.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: Client,
    api_url: String,
    bot_token: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

impl TelegramNotifier {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: TELEGRAM_API_URL.to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        }
    }

    /// Override the Bot API base url.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Build from `TELEGRAM_BOT_TOKEN` & `TELEGRAM_CHAT_ID`, returning `None` when either is
    /// missing or empty.
    pub fn from_env() -> Option<Self> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN").ok().filter(|v| !v.is_empty());
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok().filter(|v| !v.is_empty());

        match (bot_token, chat_id) {
            (Some(bot_token), Some(chat_id)) => {
                info!("Telegram notifier initialised");
                Some(Self::new(bot_token, chat_id))
            }
            _ => {
                warn!("Telegram notifier disabled: TELEGRAM_BOT_TOKEN / TELEGRAM_CHAT_ID not set");
                None
            }
        }
    }

    pub async fn send_message(&self, text: &str) -> Result<(), AlertError> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.bot_token);

        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|error| AlertError::Notification(error.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(AlertError::Notification(format!(
                "Telegram API error: {status} - {body}"
            )))
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, payload: &AlertPayload) -> bool {
        let text = format_message(payload, Utc::now());
        match self.send_message(&text).await {
            Ok(()) => {
                info!("📨 Telegram message sent");
                true
            }
            Err(error) => {
                error!(%error, "failed to send Telegram message");
                false
            }
        }
    }
}
