use crate::config::TelegramConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tidehunter_data::{DataError, notify::Notifier};
use tracing::debug;

/// Telegram Bot API base url.
///
/// See docs: <https://core.telegram.org/bots/api#making-requests>
pub const BASE_URL_TELEGRAM_BOT_API: &str = "https://api.telegram.org";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// `sendMessage` request body.
///
/// See docs: <https://core.telegram.org/bots/api#sendmessage>
#[derive(Clone, Eq, PartialEq, Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

/// [`Notifier`] posting messages through a Telegram bot.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    http: reqwest::Client,
    config: TelegramConfig,
    base_url: String,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            base_url: BASE_URL_TELEGRAM_BOT_API.to_string(),
        }
    }

    fn send_message_url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.base_url.trim_end_matches('/'),
            self.config.token
        )
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str, target: Option<&str>) -> Result<(), DataError> {
        let chat_id = target.unwrap_or(&self.config.chat_id);
        let body = SendMessage {
            chat_id,
            text: message,
            disable_web_page_preview: true,
        };

        self.http
            .post(self.send_message_url())
            .timeout(HTTP_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|error| DataError::Http(error.without_url().to_string()))?
            .error_for_status()
            .map_err(|error| DataError::DownstreamSendFailure(error.without_url().to_string()))?;

        debug!(chat_id, "delivered telegram message");
        Ok(())
    }
}
