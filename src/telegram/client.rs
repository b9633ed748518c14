use crate::config::FormattingOptions;
use crate::error::{RelayError, Result};
use crate::logging::{Timer, mask_token};
use crate::source::EnrichedMessage;
use crate::telegram::{ChatId, Dialect, Payload, render_message};
use tokio::sync::mpsc;

/// Posts rendered messages to the Telegram Bot API
///
/// Failures are pushed onto the error channel instead of being returned,
/// since each chat is delivered from its own task.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    errors: mpsc::Sender<RelayError>,
}

impl TelegramClient {
    pub fn new(api_base: impl Into<String>, errors: mpsc::Sender<RelayError>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            errors,
        }
    }

    pub fn bot_endpoint(&self, token: &str) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.api_base.trim_end_matches('/'),
            token
        )
    }

    /// Render and deliver one message to one chat, reporting any failure
    pub async fn send(
        &self,
        message: &EnrichedMessage,
        token: &str,
        chat_id: &ChatId,
        options: &FormattingOptions,
    ) {
        if let Err(e) = self.deliver(message, token, chat_id, options).await {
            self.report(e);
        }
    }

    async fn deliver(
        &self,
        message: &EnrichedMessage,
        token: &str,
        chat_id: &ChatId,
        options: &FormattingOptions,
    ) -> Result<()> {
        if token.is_empty() {
            return Err(RelayError::Config("telegram bot token is empty".to_string()));
        }
        if chat_id.as_str().is_empty() {
            return Err(RelayError::Config("telegram chat ID is empty".to_string()));
        }

        tracing::debug!(
            app_id = message.app_id(),
            app = %message.app_name,
            chat_id = %chat_id,
            "Preparing to send message to Telegram"
        );

        let text = render_message(message, options)?;
        let dialect: Dialect = options.parse_mode.parse()?;
        let payload = Payload {
            chat_id: chat_id.as_str(),
            text: &text,
            parse_mode: dialect.as_str(),
        };

        let endpoint = self.bot_endpoint(token);
        tracing::debug!(
            endpoint = %endpoint.replacen(token, "***", 1),
            bot_token = %mask_token(token),
            text_len = text.len(),
            "Sending request to Telegram API"
        );

        let _timer = Timer::new("telegram_send_message");
        self.post_message(&endpoint, &payload).await?;

        tracing::info!(
            app_id = message.app_id(),
            chat_id = %chat_id,
            "Message successfully sent to Telegram"
        );
        Ok(())
    }

    /// POST one `sendMessage` payload; anything but 200 is an error
    pub async fn post_message(&self, endpoint: &str, payload: &Payload<'_>) -> Result<()> {
        let body = serde_json::to_vec(payload)?;

        let response = self
            .http
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status != reqwest::StatusCode::OK {
            return Err(RelayError::Delivery {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(response = %body, "Received response from Telegram API");
        Ok(())
    }

    fn report(&self, error: RelayError) {
        if let Err(e) = self.errors.try_send(error) {
            tracing::warn!(error = %e, "Error channel unavailable, dropping delivery error");
        }
    }
}
