//! Telegram Bot API endpoint
//!
//! Registers the relay as the bot's webhook and sends echo replies through
//! the Bot HTTP API.
//!
//! API Reference: https://core.telegram.org/bots/api

use super::{bounded, RemoteConnector, RemoteEndpoint};
use crate::error::{RelayError, Result};
use crate::types::{InboundEvent, IncomingMessage};
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Default Bot API host
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Every update type the Bot API can deliver
const ALL_UPDATE_TYPES: &[&str] = &[
    "message",
    "edited_message",
    "channel_post",
    "edited_channel_post",
    "business_connection",
    "business_message",
    "edited_business_message",
    "deleted_business_messages",
    "message_reaction",
    "message_reaction_count",
    "inline_query",
    "chosen_inline_result",
    "callback_query",
    "shipping_query",
    "pre_checkout_query",
    "poll",
    "poll_answer",
    "my_chat_member",
    "chat_member",
    "chat_join_request",
    "chat_boost",
    "removed_chat_boost",
];

/// Telegram bot client bound to one token
pub struct TelegramEndpoint {
    client: reqwest::Client,
    api_base: String,
    token: String,
    timeout: Duration,
    username: RwLock<Option<String>>,
}

impl TelegramEndpoint {
    /// Create a client for `token` against `api_base`
    pub fn new(
        client: reqwest::Client,
        api_base: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            token: token.into(),
            timeout,
            username: RwLock::new(None),
        }
    }

    /// Look up the bot's username with `getMe` and remember it
    async fn refresh_username(&self) -> Result<()> {
        let me = self.api_call("getMe", &serde_json::json!({})).await?;
        let username = Self::parse_username(&me)
            .ok_or_else(|| RelayError::Remote("getMe returned no username".to_string()))?;
        *self.username.write().unwrap_or_else(|e| e.into_inner()) = Some(username);
        Ok(())
    }

    fn parse_username(me: &serde_json::Value) -> Option<String> {
        me.get("username")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
    }

    /// Build API URL for a method
    fn api_url(api_base: &str, token: &str, method: &str) -> String {
        format!("{}/bot{}/{}", api_base.trim_end_matches('/'), token, method)
    }

    /// Call a Bot API method and return its `result`
    async fn api_call(&self, method: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let url = Self::api_url(&self.api_base, &self.token, method);

        bounded(self.timeout, method, async {
            let resp = self
                .client
                .post(&url)
                .json(body)
                .send()
                .await
                .map_err(|e| RelayError::Remote(format!("Telegram {} request failed: {}", method, e)))?;

            let status = resp.status();
            let body: serde_json::Value = resp.json().await.map_err(|e| {
                RelayError::Remote(format!("Failed to parse Telegram {} response: {}", method, e))
            })?;

            if !status.is_success() || body.get("ok") != Some(&serde_json::Value::Bool(true)) {
                let description = body["description"].as_str().unwrap_or("unknown error");
                return Err(RelayError::Remote(format!(
                    "Telegram {} error ({}): {}",
                    method, status, description
                )));
            }

            Ok(body["result"].clone())
        })
        .await
    }

    /// Decode a Telegram `Update` object
    fn parse_update(update: &serde_json::Value) -> Result<Option<IncomingMessage>> {
        let update_id = update
            .get("update_id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| RelayError::Remote("Update is missing update_id".to_string()))?;

        let Some(message) = update.get("message") else {
            return Ok(None);
        };

        let chat_id = message
            .get("chat")
            .and_then(|c| c.get("id"))
            .and_then(|v| v.as_i64())
            .ok_or_else(|| RelayError::Remote(format!("Update {} has no chat id", update_id)))?;

        let message_id = message["message_id"].as_i64().unwrap_or(0);
        let text = message
            .get("text")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Ok(Some(IncomingMessage {
            update_id,
            chat_id,
            message_id,
            text,
        }))
    }
}

#[async_trait]
impl RemoteEndpoint for TelegramEndpoint {
    async fn register_webhook(&self, url: &str, secret: Option<&str>) -> Result<()> {
        let mut body = serde_json::json!({
            "url": url,
            "allowed_updates": ALL_UPDATE_TYPES,
        });
        if let Some(secret) = secret.filter(|s| !s.is_empty()) {
            body["secret_token"] = serde_json::Value::String(secret.to_string());
        }

        self.api_call("setWebhook", &body)
            .await
            .map_err(|e| RelayError::Registration(e.to_string()))?;

        tracing::info!(url = %url, "Telegram webhook set");

        if let Err(e) = self.refresh_username().await {
            tracing::warn!(error = %e, "Failed to look up bot username, accepting commands for any bot");
        }
        Ok(())
    }

    async fn webhook_url(&self) -> Result<String> {
        let info = self
            .api_call("getWebhookInfo", &serde_json::json!({}))
            .await?;
        Ok(info["url"].as_str().unwrap_or_default().to_string())
    }

    fn decode(&self, event: &InboundEvent) -> Result<Option<IncomingMessage>> {
        Self::parse_update(&event.payload)
    }

    async fn reply(&self, message: &IncomingMessage, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": message.chat_id,
            "text": text,
        });
        self.api_call("sendMessage", &body).await?;
        Ok(())
    }

    fn bot_username(&self) -> Option<String> {
        self.username
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

/// Connector producing [`TelegramEndpoint`]s that share one HTTP client
#[derive(Clone)]
pub struct TelegramConnector {
    client: reqwest::Client,
    api_base: String,
    timeout: Duration,
}

impl TelegramConnector {
    /// Create a connector for the given API host and per-call timeout
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
            timeout,
        }
    }
}

impl Default for TelegramConnector {
    fn default() -> Self {
        Self::new(TELEGRAM_API_BASE, Duration::from_secs(15))
    }
}

#[async_trait]
impl RemoteConnector for TelegramConnector {
    async fn connect(&self, credential: &str) -> Result<Arc<dyn RemoteEndpoint>> {
        let token = credential.trim();
        if token.is_empty() {
            return Err(RelayError::Config("Telegram bot token is empty".to_string()));
        }

        Ok(Arc::new(TelegramEndpoint::new(
            self.client.clone(),
            self.api_base.clone(),
            token,
            self.timeout,
        )))
    }
}
